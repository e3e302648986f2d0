//! Session events and the protocol state machine types.
//!
//! Inbound server records are classified into a closed set of
//! [`InboundEvent`] variants and delivered over a channel; consumers never
//! see raw wire frames. Outbound traffic is the [`OutboundMessage`] union,
//! queued per-message to preserve ordering.

use std::fmt;

use base64::prelude::*;
use bytes::Bytes;

use super::messages::ServerFrame;

/// Protocol state machine states.
///
/// `Disconnected → Connecting → SettingUp → Ready`, with `Error` reachable
/// from any state and looping back to `Connecting` when auto-recovery
/// applies. Owned exclusively by the protocol client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No transport
    #[default]
    Disconnected,
    /// Transport opening
    Connecting,
    /// Transport open, setup handshake in flight
    SettingUp,
    /// Setup complete, session live
    Ready,
    /// Recoverable failure; the session may still be recovered
    Error(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::SettingUp => write!(f, "SettingUp"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Error(msg) => write!(f, "Error({msg})"),
        }
    }
}

/// Outbound message union.
///
/// The setup request is not represented here: it is built and sent by the
/// client itself during the handshake.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// One complete 16 kHz mono PCM chunk
    AudioChunk(Bytes),
    /// One encoded camera frame
    VideoFrame(Bytes),
    /// Result for a served function call
    ToolResponse {
        /// Originating call id
        call_id: String,
        /// Function name
        name: String,
        /// Structured result
        result: serde_json::Value,
    },
    /// Free-text context injected as a completed user turn
    ContextText(String),
}

/// Classified inbound events.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Setup handshake accepted
    SetupComplete,
    /// Refreshed resumption handle
    ResumptionUpdate(String),
    /// Server will terminate this connection deliberately
    GoAway,
    /// Function call request
    ToolCall {
        /// Call id to correlate the response
        id: String,
        /// Function name
        name: String,
        /// Structured arguments
        args: serde_json::Value,
    },
    /// Withdraw in-flight function calls
    ToolCallCancellation(Vec<String>),
    /// Model audio, 24 kHz mono 16-bit PCM
    ModelAudio(Bytes),
    /// Transcription of user audio
    InputTranscript(String),
    /// Transcription of model audio
    OutputTranscript(String),
    /// The model turn finished
    TurnComplete,
    /// Model generation interrupted by user speech
    Interrupted,
    /// Record kind this client does not understand
    Unrecognized,
}

/// Classify a decoded server record into zero or more events.
///
/// A single `serverContent` record can carry audio parts, transcripts, an
/// interruption, and a turn-complete marker at once; events are emitted in
/// document order. A record matching no known kind yields `Unrecognized`.
pub fn classify_frame(frame: ServerFrame) -> Vec<InboundEvent> {
    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(InboundEvent::SetupComplete);
    }

    if let Some(update) = frame.session_resumption_update
        && let Some(handle) = update.handle
        && !handle.is_empty()
    {
        events.push(InboundEvent::ResumptionUpdate(handle));
    }

    if frame.go_away.is_some() {
        events.push(InboundEvent::GoAway);
    }

    if let Some(tool_call) = frame.tool_call {
        for call in tool_call.function_calls {
            events.push(InboundEvent::ToolCall {
                id: call.id,
                name: call.name,
                args: call.args,
            });
        }
    }

    if let Some(cancellation) = frame.tool_call_cancellation {
        events.push(InboundEvent::ToolCallCancellation(cancellation.ids));
    }

    if let Some(content) = frame.server_content {
        if content.interrupted.unwrap_or(false) {
            events.push(InboundEvent::Interrupted);
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data
                    && blob.mime_type.starts_with("audio/pcm")
                {
                    match BASE64_STANDARD.decode(&blob.data) {
                        Ok(pcm) => events.push(InboundEvent::ModelAudio(Bytes::from(pcm))),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to decode model audio part");
                        }
                    }
                }
            }
        }

        if let Some(t) = content.input_transcription
            && let Some(text) = t.text
        {
            events.push(InboundEvent::InputTranscript(text));
        }

        if let Some(t) = content.output_transcription
            && let Some(text) = t.text
        {
            events.push(InboundEvent::OutputTranscript(text));
        }

        if content.turn_complete.unwrap_or(false) {
            events.push(InboundEvent::TurnComplete);
        }
    }

    if events.is_empty() {
        events.push(InboundEvent::Unrecognized);
    }

    events
}
