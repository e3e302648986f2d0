//! Stateless PCM helpers: Int16 ⇄ Float32 conversion, mono downmix, and
//! sample-rate conversion.
//!
//! All PCM on the wire is 16-bit signed little-endian; everything handed to
//! or received from the audio devices is `f32` in `[-1.0, 1.0]`.

use rubato::{FftFixedIn, Resampler};

use crate::errors::AudioError;

/// FFT resampler input block size.
const RESAMPLE_CHUNK: usize = 1024;

/// FFT resampler sub-chunk count.
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Convert f32 samples to 16-bit little-endian PCM bytes.
pub fn f32_to_i16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert 16-bit little-endian PCM bytes to f32 samples.
///
/// A trailing odd byte is ignored.
pub fn i16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Downmix interleaved multi-channel samples to mono by averaging.
pub fn downmix_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample a complete mono buffer.
///
/// Returns the input unchanged when the rates match. The tail shorter than
/// one FFT block is flushed with a partial pass so no audio is dropped.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(RESAMPLE_CHUNK) {
        let frames = if chunk.len() == RESAMPLE_CHUNK {
            resampler.process(&[chunk.to_vec()], None)
        } else {
            resampler.process_partial(Some(&[chunk.to_vec()]), None)
        }
        .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend(frames[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

/// Streaming resampler for the capture path.
///
/// Capture callbacks deliver blocks smaller than one FFT chunk; input is
/// buffered across pushes and processed whenever a full chunk is available.
pub struct StreamResampler {
    inner: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl StreamResampler {
    /// Create a mono streaming resampler.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let inner = FftFixedIn::<f64>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLE_CHUNK,
            RESAMPLE_SUB_CHUNKS,
            1,
        )
        .map_err(|e| AudioError::Resample(e.to_string()))?;
        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Buffer input and return whatever full chunks produced.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>, AudioError> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK {
            let rest = self.pending.split_off(RESAMPLE_CHUNK);
            let chunk = std::mem::replace(&mut self.pending, rest);
            let frames = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resample(e.to_string()))?;
            output.extend(frames[0].iter().map(|&s| s as f32));
        }
        Ok(output)
    }
}
