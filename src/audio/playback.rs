//! Speaker playback engine.
//!
//! Model audio buffers are queued FIFO and played back-to-back in arrival
//! order. The queue counts scheduled-but-unfinished buffers; "speaking"
//! holds until the count reaches zero. An interruption flushes the queue and
//! clears the speaking flag immediately, queued buffers included.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use tokio::sync::mpsc;

use crate::errors::AudioError;

/// Preferred playback rate, matching inbound model audio.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Default)]
struct QueueState {
    buffers: VecDeque<Vec<f32>>,
    offset: usize,
    pending: usize,
}

/// FIFO queue of decoded playback buffers shared with the output callback.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    inner: parking_lot::Mutex<QueueState>,
    speaking: AtomicBool,
}

impl PlaybackQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule one buffer; increments the pending count and marks speaking.
    pub fn enqueue(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.inner.lock();
        state.buffers.push_back(samples);
        state.pending += 1;
        self.speaking.store(true, Ordering::Release);
    }

    /// Flush everything and stop speaking immediately.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.buffers.clear();
        state.offset = 0;
        state.pending = 0;
        self.speaking.store(false, Ordering::Release);
    }

    /// Whether scheduled buffers remain unfinished.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Count of scheduled-but-unfinished buffers.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending
    }

    /// Fill an interleaved output slice, replicating mono samples across
    /// channels and padding with silence when the queue runs dry.
    pub fn fill(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut state = self.inner.lock();
        for frame in out.chunks_mut(channels) {
            let sample = Self::next_sample(&mut state, &self.speaking);
            for slot in frame.iter_mut() {
                *slot = sample;
            }
        }
    }

    fn next_sample(state: &mut QueueState, speaking: &AtomicBool) -> f32 {
        loop {
            let Some(front) = state.buffers.front() else {
                return 0.0;
            };
            if state.offset < front.len() {
                let sample = front[state.offset];
                state.offset += 1;
                return sample;
            }
            // Buffer finished: decrement the pending count; at zero the
            // model is no longer speaking.
            state.buffers.pop_front();
            state.offset = 0;
            state.pending = state.pending.saturating_sub(1);
            if state.pending == 0 {
                speaking.store(false, Ordering::Release);
            }
        }
    }
}

/// Plays queued audio to the default output device on its own thread.
pub struct PlaybackEngine {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl PlaybackEngine {
    /// Open the default output device and start draining the queue.
    ///
    /// Prefers a native 24 kHz configuration (mono, then stereo) to match
    /// inbound model audio; otherwise the device default is used and the
    /// pipeline resamples at enqueue time.
    pub fn start(
        queue: Arc<PlaybackQueue>,
        fault_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;
        let (config, sample_format) = select_output_config(&device)?;
        let sample_rate = config.sample_rate.0;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            ?sample_format,
            "playback engine starting"
        );

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let thread = std::thread::Builder::new()
            .name("voicepay-playback".to_string())
            .spawn(move || {
                playback_thread(config, sample_format, queue, fault_tx, stop_rx, ready_tx);
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                thread: Some(thread),
                sample_rate,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Device(
                "playback thread died during startup".to_string(),
            )),
        }
    }

    /// Rate the output stream was opened with.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("playback engine stopped");
    }
}

fn select_output_config(
    device: &cpal::Device,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    for wanted_channels in [1u16, 2] {
        if let Ok(mut configs) = device.supported_output_configs()
            && let Some(supported) = configs.find(|c| {
                c.channels() == wanted_channels
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        {
            let supported = supported.with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE));
            let sample_format = supported.sample_format();
            return Ok((supported.config(), sample_format));
        }
    }

    let default = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let sample_format = default.sample_format();
    Ok((default.config(), sample_format))
}

fn playback_thread(
    config: StreamConfig,
    sample_format: SampleFormat,
    queue: Arc<PlaybackQueue>,
    fault_tx: mpsc::UnboundedSender<String>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: std::sync::mpsc::Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(AudioError::NoOutputDevice));
        return;
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, queue, fault_tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, queue, fault_tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, queue, fault_tx),
        other => {
            let _ = ready_tx.send(Err(AudioError::Device(format!(
                "unsupported playback sample format: {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<PlaybackQueue>,
    fault_tx: mpsc::UnboundedSender<String>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            queue.fill(&mut scratch, channels);
            for (slot, &sample) in data.iter_mut().zip(scratch.iter()) {
                *slot = T::from_sample(sample);
            }
        },
        move |err| {
            tracing::warn!(error = %err, "playback stream error");
            let _ = fault_tx.send(err.to_string());
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_marks_speaking() {
        let queue = PlaybackQueue::new();
        assert!(!queue.is_speaking());
        queue.enqueue(vec![0.1, 0.2]);
        assert!(queue.is_speaking());
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_empty_buffers_are_ignored() {
        let queue = PlaybackQueue::new();
        queue.enqueue(Vec::new());
        assert!(!queue.is_speaking());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_fill_drains_in_fifo_order() {
        let queue = PlaybackQueue::new();
        queue.enqueue(vec![0.1, 0.2]);
        queue.enqueue(vec![0.3]);

        let mut out = [0.0f32; 4];
        queue.fill(&mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0]);
        assert!(!queue.is_speaking());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_fill_replicates_across_channels() {
        let queue = PlaybackQueue::new();
        queue.enqueue(vec![0.5, -0.5]);

        let mut out = [0.0f32; 4];
        queue.fill(&mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_speaking_holds_until_all_buffers_finish() {
        let queue = PlaybackQueue::new();
        queue.enqueue(vec![0.1; 4]);
        queue.enqueue(vec![0.2; 4]);

        let mut out = [0.0f32; 4];
        queue.fill(&mut out, 1);
        // First buffer consumed exactly; the second is still scheduled.
        assert!(queue.is_speaking());
        assert_eq!(queue.pending(), 1);

        queue.fill(&mut out, 1);
        assert!(!queue.is_speaking());
    }

    #[test]
    fn test_interrupt_clears_queued_buffers_immediately() {
        let queue = PlaybackQueue::new();
        queue.enqueue(vec![0.1; 100]);
        queue.enqueue(vec![0.2; 100]);
        assert!(queue.is_speaking());

        queue.clear();
        assert!(!queue.is_speaking());
        assert_eq!(queue.pending(), 0);

        let mut out = [1.0f32; 4];
        queue.fill(&mut out, 1);
        assert_eq!(out, [0.0; 4]);
    }
}
