//! The audio pipeline: capture → convert → chunk, and playback.
//!
//! Owns both device engines, the convert worker, and the route-change
//! supervisor. Capture callbacks hand raw buffers to the convert worker,
//! which downmixes, resamples to 16 kHz, converts to 16-bit PCM, and emits
//! complete 3200-byte chunks in capture order. Playback enqueues decoded
//! model audio into the FIFO queue the output stream drains.
//!
//! When the underlying route changes and an engine dies (e.g. a Bluetooth
//! headset drops), the supervisor rebuilds both engines with increasing
//! backoff; exhaustion is reported as a fatal capture failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::AudioError;

use super::capture::{CAPTURE_SAMPLE_RATE, CaptureBlock, CaptureEngine};
use super::codec;
use super::frame::FrameBuffer;
use super::playback::{PLAYBACK_SAMPLE_RATE, PlaybackEngine, PlaybackQueue};

/// Route-recovery backoff ladder.
const ROUTE_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// Capacity of the outbound chunk channel.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Pipeline tuning.
#[derive(Debug, Clone, Default)]
pub struct AudioPipelineConfig {
    /// If set, capture audio is also written to this WAV file
    pub debug_dump: Option<PathBuf>,
}

/// Channels handed to the session when the pipeline starts.
pub struct AudioStreams {
    /// Complete 3200-byte outbound chunks, in capture order
    pub chunks: mpsc::Receiver<Bytes>,
    /// Fatal pipeline failures (route recovery exhausted)
    pub faults: mpsc::UnboundedReceiver<AudioError>,
}

/// Microphone capture and speaker playback, wired for a live session.
pub struct AudioPipeline {
    config: AudioPipelineConfig,
    /// Echo gate / side-effect mute. Shared with the tool orchestrator;
    /// last-writer-wins by design, both writers only ever set values
    /// consistent with the current conversation step.
    muted: Arc<AtomicBool>,
    /// Whether capture is still wanted; aborts route recovery when cleared
    capture_desired: Arc<AtomicBool>,
    queue: Arc<PlaybackQueue>,
    /// Rate the playback stream runs at; zero until started
    playback_rate: Arc<AtomicU32>,
    /// Cancellation for the worker and supervisor of the current run
    shutdown: Mutex<Option<CancellationToken>>,
}

impl AudioPipeline {
    /// Create a stopped pipeline. No devices are touched until `start`.
    pub fn new(config: AudioPipelineConfig) -> Self {
        Self {
            config,
            muted: Arc::new(AtomicBool::new(false)),
            capture_desired: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(PlaybackQueue::new()),
            playback_rate: Arc::new(AtomicU32::new(0)),
            shutdown: Mutex::new(None),
        }
    }

    /// The shared mute flag, handed to the tool orchestrator for muting
    /// around side effects.
    pub fn mute_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.muted)
    }

    /// Set the capture mute (echo gate / side-effect guard).
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Whether capture is currently muted.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Whether model audio is still scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        self.queue.is_speaking()
    }

    /// Schedule model audio (24 kHz mono 16-bit PCM) for playback.
    pub fn play(&self, pcm: &[u8]) {
        let samples = codec::i16_bytes_to_f32(pcm);
        let device_rate = self.playback_rate.load(Ordering::Relaxed);
        let samples = if device_rate != 0 && device_rate != PLAYBACK_SAMPLE_RATE {
            match codec::resample(&samples, PLAYBACK_SAMPLE_RATE, device_rate) {
                Ok(resampled) => resampled,
                Err(e) => {
                    tracing::warn!(error = %e, "playback resample failed, using raw samples");
                    samples
                }
            }
        } else {
            samples
        };
        self.queue.enqueue(samples);
    }

    /// Stop playback immediately, discarding queued buffers.
    pub fn interrupt(&self) {
        self.queue.clear();
    }

    /// Open the devices and start capture and playback.
    pub async fn start(&self) -> Result<AudioStreams, AudioError> {
        let mut guard = self.shutdown.lock().await;
        if guard.is_some() {
            return Err(AudioError::Device("audio pipeline already running".to_string()));
        }

        self.capture_desired.store(true, Ordering::SeqCst);
        self.set_muted(false);
        self.queue.clear();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<CaptureBlock>();
        let (engine_fault_tx, engine_fault_rx) = mpsc::unbounded_channel::<String>();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel::<AudioError>();

        let capture = CaptureEngine::start(
            Arc::clone(&self.muted),
            raw_tx.clone(),
            engine_fault_tx.clone(),
        )?;
        let playback = PlaybackEngine::start(Arc::clone(&self.queue), engine_fault_tx.clone())?;
        self.playback_rate
            .store(playback.sample_rate(), Ordering::Relaxed);

        let token = CancellationToken::new();

        tokio::spawn(convert_worker(
            raw_rx,
            chunk_tx,
            self.config.debug_dump.clone(),
            token.clone(),
        ));

        tokio::spawn(route_supervisor(SupervisorContext {
            capture: Some(capture),
            playback: Some(playback),
            engine_fault_rx,
            engine_fault_tx,
            raw_tx,
            fatal_tx,
            muted: Arc::clone(&self.muted),
            capture_desired: Arc::clone(&self.capture_desired),
            queue: Arc::clone(&self.queue),
            playback_rate: Arc::clone(&self.playback_rate),
            token: token.clone(),
        }));

        *guard = Some(token);
        tracing::info!("audio pipeline started");
        Ok(AudioStreams {
            chunks: chunk_rx,
            faults: fatal_rx,
        })
    }

    /// Tear down capture and playback. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.capture_desired.store(false, Ordering::SeqCst);
        if let Some(token) = self.shutdown.lock().await.take() {
            token.cancel();
            tracing::info!("audio pipeline stopped");
        }
        self.queue.clear();
        self.set_muted(false);
    }
}

/// Convert worker: downmix → resample → 16-bit PCM → 3200-byte chunks.
///
/// Runs off the capture callback so the real-time thread never blocks. The
/// native format rides along with every block because a route recovery can
/// reopen the device with different parameters.
async fn convert_worker(
    mut raw_rx: mpsc::UnboundedReceiver<CaptureBlock>,
    chunk_tx: mpsc::Sender<Bytes>,
    debug_dump: Option<PathBuf>,
    token: CancellationToken,
) {
    let mut frames = FrameBuffer::new();
    let mut resampler: Option<(u32, codec::StreamResampler)> = None;
    let mut dump_writer = debug_dump.and_then(|path| {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        match hound::WavWriter::create(&path, spec) {
            Ok(writer) => Some(writer),
            Err(e) => {
                tracing::warn!(error = %e, ?path, "could not open debug audio dump");
                None
            }
        }
    });

    loop {
        let (samples, format) = tokio::select! {
            _ = token.cancelled() => break,
            block = raw_rx.recv() => match block {
                Some(block) => block,
                None => break,
            },
        };

        let mono = codec::downmix_mono(&samples, format.channels);
        let converted = if format.sample_rate == CAPTURE_SAMPLE_RATE {
            mono
        } else {
            // A route recovery can reopen the device at a new rate; rebuild
            // the resampler when the block's format disagrees.
            if !matches!(&resampler, Some((rate, _)) if *rate == format.sample_rate) {
                match codec::StreamResampler::new(format.sample_rate, CAPTURE_SAMPLE_RATE) {
                    Ok(new) => resampler = Some((format.sample_rate, new)),
                    Err(e) => {
                        tracing::warn!(error = %e, "could not build capture resampler");
                        continue;
                    }
                }
            }
            let Some((_, active)) = resampler.as_mut() else {
                continue;
            };
            match active.push(&mono) {
                Ok(resampled) => resampled,
                Err(e) => {
                    tracing::warn!(error = %e, "capture resample failed, dropping block");
                    continue;
                }
            }
        };

        if converted.is_empty() {
            continue;
        }

        if let Some(writer) = dump_writer.as_mut() {
            for &sample in &converted {
                let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                let _ = writer.write_sample(value);
            }
        }

        let bytes = codec::f32_to_i16_bytes(&converted);
        for frame in frames.push(&bytes) {
            if chunk_tx.send(frame).await.is_err() {
                tracing::debug!("chunk receiver dropped");
                return;
            }
        }
    }

    // Session stopping: any partial remainder is discarded, not emitted.
    frames.reset();
    if let Some(writer) = dump_writer {
        let _ = writer.finalize();
    }
    tracing::debug!("convert worker ended");
}

struct SupervisorContext {
    capture: Option<CaptureEngine>,
    playback: Option<PlaybackEngine>,
    engine_fault_rx: mpsc::UnboundedReceiver<String>,
    engine_fault_tx: mpsc::UnboundedSender<String>,
    raw_tx: mpsc::UnboundedSender<CaptureBlock>,
    fatal_tx: mpsc::UnboundedSender<AudioError>,
    muted: Arc<AtomicBool>,
    capture_desired: Arc<AtomicBool>,
    queue: Arc<PlaybackQueue>,
    playback_rate: Arc<AtomicU32>,
    token: CancellationToken,
}

/// Route-change supervisor.
///
/// On an engine fault: deactivate both engines, wait out the backoff,
/// rebuild capture/convert/playback resources, and re-arm the tap. The chain
/// aborts when capture is no longer desired; exhaustion is fatal.
async fn route_supervisor(mut ctx: SupervisorContext) {
    loop {
        let fault = tokio::select! {
            _ = ctx.token.cancelled() => break,
            fault = ctx.engine_fault_rx.recv() => match fault {
                Some(fault) => fault,
                None => break,
            },
        };

        if !ctx.capture_desired.load(Ordering::SeqCst) {
            break;
        }
        tracing::warn!(%fault, "audio route failure, starting restart chain");

        // Deactivate before rebuilding.
        ctx.capture.take();
        ctx.playback.take();

        let mut recovered = false;
        for (attempt, backoff_ms) in ROUTE_BACKOFF_MS.iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            if ctx.token.is_cancelled() || !ctx.capture_desired.load(Ordering::SeqCst) {
                tracing::info!("capture no longer desired, aborting route recovery");
                return;
            }

            tracing::info!(attempt = attempt + 1, "rebuilding audio engines");
            match rebuild_engines(&ctx) {
                Ok((capture, playback)) => {
                    ctx.playback_rate
                        .store(playback.sample_rate(), Ordering::Relaxed);
                    ctx.capture = Some(capture);
                    ctx.playback = Some(playback);
                    recovered = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt = attempt + 1, "audio engine rebuild failed");
                }
            }
        }

        if recovered {
            // Faults raised by the engines we just replaced are stale.
            while ctx.engine_fault_rx.try_recv().is_ok() {}
            tracing::info!("audio route recovered");
        } else {
            tracing::error!("audio route recovery exhausted");
            let _ = ctx
                .fatal_tx
                .send(AudioError::CaptureExhausted(ROUTE_BACKOFF_MS.len() as u32));
            break;
        }
    }
    tracing::debug!("route supervisor ended");
}

fn rebuild_engines(
    ctx: &SupervisorContext,
) -> Result<(CaptureEngine, PlaybackEngine), AudioError> {
    let capture = CaptureEngine::start(
        Arc::clone(&ctx.muted),
        ctx.raw_tx.clone(),
        ctx.engine_fault_tx.clone(),
    )?;
    let playback = PlaybackEngine::start(Arc::clone(&ctx.queue), ctx.engine_fault_tx.clone())?;
    Ok((capture, playback))
}
