//! Wire message types for the bidirectional speech-model stream.
//!
//! The wire format is a duplex stream of JSON records, each keyed by exactly
//! one top-level field naming the record kind.
//!
//! # Protocol Overview
//!
//! Client records (sent to server):
//! - `setup` - session configuration handshake
//! - `realtimeInput` - audio chunk or camera frame
//! - `toolResponse` - function call results
//! - `clientContent` - free-text turns injected into the conversation
//!
//! Server records (received from server):
//! - `setupComplete` - handshake accepted, session ready
//! - `sessionResumptionUpdate` - refreshed resumption handle
//! - `goAway` - connection will be terminated deliberately
//! - `toolCall` - function call request(s)
//! - `toolCallCancellation` - withdraw in-flight function calls
//! - `serverContent` - model audio, transcripts, turn lifecycle

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::{OUTBOUND_AUDIO_MIME, VIDEO_FRAME_MIME};

// =============================================================================
// Client Records (sent to server)
// =============================================================================

/// Client records sent over the wire.
///
/// Externally tagged: each variant serializes as a single-key record, e.g.
/// `{"setup": {...}}` or `{"realtimeInput": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration handshake
    Setup(Setup),
    /// Streaming media input
    RealtimeInput(RealtimeInput),
    /// Function call results
    ToolResponse(ToolResponsePayload),
    /// Free-text conversation content
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Build an audio-chunk record from raw PCM bytes.
    pub fn audio_chunk(data: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: OUTBOUND_AUDIO_MIME.to_string(),
                data: BASE64_STANDARD.encode(data),
            }),
            video: None,
        })
    }

    /// Build a camera-frame record from encoded image bytes.
    pub fn video_frame(data: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: None,
            video: Some(Blob {
                mime_type: VIDEO_FRAME_MIME.to_string(),
                data: BASE64_STANDARD.encode(data),
            }),
        })
    }

    /// Build a single-result tool response record.
    pub fn tool_response(call_id: &str, name: &str, result: serde_json::Value) -> Self {
        ClientMessage::ToolResponse(ToolResponsePayload {
            function_responses: vec![FunctionResponse {
                id: call_id.to_string(),
                name: name.to_string(),
                response: result,
            }],
        })
    }

    /// Build a user-role text turn that completes immediately.
    pub fn context_text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }
}

/// Setup handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model path
    pub model: String,

    /// Generation configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    /// Voice-activity-detection configuration for realtime input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,

    /// Tool declarations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSet>>,

    /// Resumption request; an empty record enables handle updates,
    /// a populated one continues a prior session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_resumption: Option<SessionResumption>,

    /// Enable transcription of user audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,

    /// Enable transcription of model audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

/// Generation configuration within setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Response modalities (the live stream supports one: AUDIO)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Speech synthesis configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

/// Voice selection wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Prebuilt voice selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prebuilt_voice_config: Option<PrebuiltVoiceConfig>,
}

/// Named prebuilt voice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name
    pub voice_name: String,
}

/// Voice-activity-detection configuration for realtime input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    /// Server-side automatic activity detection tuning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_activity_detection: Option<AutomaticActivityDetection>,
}

/// Server-side VAD tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    /// Disable server VAD entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    /// Silence duration before end of turn (ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

/// Marker record enabling a transcription stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

/// Resumption request within setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumption {
    /// Handle of the session to continue; absent to start fresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// A set of tool declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    /// Function declarations exposed to the model
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Declaration of a single callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// What the function does, for the model
    pub description: String,
    /// JSON-Schema-like parameter description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Streaming media input record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Audio chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    /// Camera frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
}

/// Base64-encoded media payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Mime type (e.g. "audio/pcm;rate=16000")
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

/// Function call results record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponsePayload {
    /// One response per answered call
    pub function_responses: Vec<FunctionResponse>,
}

/// A single function call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    /// Originating call id
    pub id: String,
    /// Function name
    pub name: String,
    /// Structured result
    pub response: serde_json::Value,
}

/// Free-text conversation content record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    /// Conversation turns
    pub turns: Vec<Content>,
    /// Whether the client turn is complete
    pub turn_complete: bool,
}

/// A conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Turn role ("user" or "model")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Turn parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A part within a turn: text or inline media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline media content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

// =============================================================================
// Server Records (received from server)
// =============================================================================

/// A decoded server record.
///
/// The wire keys each record by kind; unknown kinds leave every field `None`
/// and classify as `Unrecognized` downstream instead of failing the receive
/// loop.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerFrame {
    /// Setup handshake accepted
    pub setup_complete: Option<SetupComplete>,
    /// Refreshed resumption handle
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    /// Deliberate connection termination notice
    pub go_away: Option<GoAway>,
    /// Function call request(s)
    pub tool_call: Option<ToolCallFrame>,
    /// Withdraw in-flight function calls
    pub tool_call_cancellation: Option<ToolCallCancellationFrame>,
    /// Model output and turn lifecycle
    pub server_content: Option<ServerContent>,
}

/// Empty record confirming setup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

/// Refreshed resumption handle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    /// Opaque handle for continuing this session on a new connection
    #[serde(alias = "newHandle")]
    pub handle: Option<String>,
    /// Whether the session is resumable at this point
    pub resumable: Option<bool>,
}

/// Deliberate termination notice.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Remaining time before the server closes the connection
    pub time_left: Option<String>,
}

/// Function call request(s).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFrame {
    /// Requested calls
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A single requested function call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Call id to correlate the response
    pub id: String,
    /// Function name
    pub name: String,
    /// Structured arguments
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Withdrawal of in-flight function calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallCancellationFrame {
    /// Ids of the calls to cancel
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Model output and turn lifecycle record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    /// Model generation was interrupted by user speech
    pub interrupted: Option<bool>,
    /// The model turn finished
    pub turn_complete: Option<bool>,
    /// Model output parts (audio arrives as inline data)
    pub model_turn: Option<Content>,
    /// Transcription of user audio
    pub input_transcription: Option<Transcription>,
    /// Transcription of model audio
    pub output_transcription: Option<Transcription>,
}

/// A transcription fragment.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    /// Transcribed text
    pub text: Option<String>,
}
