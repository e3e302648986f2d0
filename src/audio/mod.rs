//! Real-time audio: codec utilities, frame accumulation, device engines,
//! and the pipeline that ties them together.

pub mod capture;
pub mod codec;
pub mod frame;
pub mod pipeline;
pub mod playback;

pub use capture::{CAPTURE_SAMPLE_RATE, CaptureEngine, CaptureFormat};
pub use frame::{FRAME_BYTES, FrameBuffer};
pub use pipeline::{AudioPipeline, AudioPipelineConfig, AudioStreams};
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackEngine, PlaybackQueue};
