//! Crate-level error taxonomy.
//!
//! Each subsystem owns its own error enum; `AgentError` rolls them up for
//! callers that sit above the subsystems (the coordinator and the binary).
//! Tool handler failures never surface here: they are returned to the remote
//! model as structured results so the session stays alive.

use thiserror::Error;

/// Errors raised by the live session protocol client.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Opening the transport failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The setup handshake did not complete in time
    #[error("Setup timed out after {0}s")]
    SetupTimeout(u64),

    /// WebSocket-level failure
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Wire message could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No open transport to send on
    #[error("Not connected")]
    NotConnected,

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors raised by the audio capture/playback pipeline.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable input device
    #[error("No input device available")]
    NoInputDevice,

    /// No usable output device
    #[error("No output device available")]
    NoOutputDevice,

    /// Device or stream failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Sample-rate conversion failure
    #[error("Resampler error: {0}")]
    Resample(String),

    /// Route-change recovery ran out of restart attempts
    #[error("Capture failed after {0} restart attempts")]
    CaptureExhausted(u32),
}

/// Top-level error for the assistant core.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Protocol client error
    #[error(transparent)]
    Live(#[from] LiveError),

    /// Audio pipeline error
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for assistant operations.
pub type AgentResult<T> = Result<T, AgentError>;
