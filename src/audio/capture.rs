//! Microphone capture engine.
//!
//! A dedicated thread owns the `cpal` input stream (streams are not `Send`).
//! The capture callback does the minimum possible work: check the echo-gate
//! flag, copy the buffer, hand it to the convert worker over an unbounded
//! channel. Stream errors (e.g. a Bluetooth route disappearing) are reported
//! to the route supervisor, never handled in the callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use tokio::sync::mpsc;

use crate::errors::AudioError;

/// Target capture rate for the wire: 16 kHz.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Native format the capture stream was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Native sample rate
    pub sample_rate: u32,
    /// Native channel count
    pub channels: u16,
}

/// A raw capture block: samples plus the format they were captured in.
pub type CaptureBlock = (Vec<f32>, CaptureFormat);

/// Captures audio from the default input device on its own thread.
pub struct CaptureEngine {
    stop_tx: std::sync::mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
    format: CaptureFormat,
}

impl CaptureEngine {
    /// Open the default input device and start capturing.
    ///
    /// Prefers a native mono 16 kHz configuration so no resampling is
    /// needed; otherwise the device default is used and the convert worker
    /// downmixes/resamples.
    pub fn start(
        muted: Arc<AtomicBool>,
        raw_tx: mpsc::UnboundedSender<CaptureBlock>,
        fault_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;
        let (config, sample_format) = select_input_config(&device)?;
        let format = CaptureFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            ?sample_format,
            "capture engine starting"
        );

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

        let thread = std::thread::Builder::new()
            .name("voicepay-capture".to_string())
            .spawn(move || {
                capture_thread(
                    config,
                    sample_format,
                    format,
                    muted,
                    raw_tx,
                    fault_tx,
                    stop_rx,
                    ready_tx,
                );
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                thread: Some(thread),
                format,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(AudioError::Device(
                "capture thread died during startup".to_string(),
            )),
        }
    }

    /// Format the stream was opened with.
    pub fn format(&self) -> CaptureFormat {
        self.format
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("capture engine stopped");
    }
}

/// Pick the input configuration: native mono 16 kHz if available, else the
/// device default.
fn select_input_config(
    device: &cpal::Device,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    if let Ok(mut configs) = device.supported_input_configs()
        && let Some(supported) = configs.find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
        })
    {
        let supported = supported.with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE));
        let sample_format = supported.sample_format();
        return Ok((supported.config(), sample_format));
    }

    let default = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let sample_format = default.sample_format();
    Ok((default.config(), sample_format))
}

#[allow(clippy::too_many_arguments)]
fn capture_thread(
    config: StreamConfig,
    sample_format: SampleFormat,
    format: CaptureFormat,
    muted: Arc<AtomicBool>,
    raw_tx: mpsc::UnboundedSender<CaptureBlock>,
    fault_tx: mpsc::UnboundedSender<String>,
    stop_rx: std::sync::mpsc::Receiver<()>,
    ready_tx: std::sync::mpsc::Sender<Result<(), AudioError>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(AudioError::NoInputDevice));
        return;
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, format, muted, raw_tx, fault_tx),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, format, muted, raw_tx, fault_tx),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, format, muted, raw_tx, fault_tx),
        other => {
            let _ = ready_tx.send(Err(AudioError::Device(format!(
                "unsupported capture sample format: {other:?}"
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

    // Park until told to stop; the stream lives as long as this thread.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    format: CaptureFormat,
    muted: Arc<AtomicBool>,
    raw_tx: mpsc::UnboundedSender<CaptureBlock>,
    fault_tx: mpsc::UnboundedSender<String>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Echo gate: while the model speaks, the tap drops everything.
            if muted.load(Ordering::Relaxed) {
                return;
            }
            let samples: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
            let _ = raw_tx.send((samples, format));
        },
        move |err| {
            tracing::warn!(error = %err, "capture stream error");
            let _ = fault_tx.send(err.to_string());
        },
        None,
    )
}
