//! Configuration and constants for the live session protocol client.

use serde::{Deserialize, Serialize};

use crate::live::messages::FunctionDeclaration;

/// Default WebSocket endpoint for the bidirectional speech-model stream.
pub const LIVE_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Seconds a `connect()` attempt may take before it resolves as failed.
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Seconds between transport-level keepalive pings while `Ready`.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Outbound audio: 16 kHz mono 16-bit PCM.
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Inbound model audio: 24 kHz mono 16-bit PCM.
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

/// Mime type for outbound audio chunks.
pub const OUTBOUND_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Mime type for outbound camera frames.
pub const VIDEO_FRAME_MIME: &str = "image/jpeg";

/// Capacity of the outbound WebSocket send queue.
pub const WS_CHANNEL_CAPACITY: usize = 256;

/// Reconnection tuning for the recovery routine.
///
/// All three trigger paths (server-initiated close, terminal socket error,
/// `goAway`) converge on one recovery loop governed by this policy. The
/// delay is fixed, not exponential: the service closes connections on a
/// schedule and expects prompt resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum reconnection attempts before giving up.
    /// Set to 0 to disable automatic reconnection.
    pub max_attempts: u32,

    /// Delay before each attempt (milliseconds).
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 500,
        }
    }
}

impl ReconnectPolicy {
    /// Check whether another attempt is allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Configuration for a live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model identifier (e.g. "gemini-2.0-flash-live-001")
    pub model: String,

    /// Voice for audio output
    pub voice: Option<String>,

    /// System instructions for the assistant
    pub system_prompt: Option<String>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Tool declarations sent with the setup request
    pub tools: Vec<FunctionDeclaration>,

    /// Reconnection tuning
    pub reconnect: ReconnectPolicy,

    /// Endpoint override (tests, proxies); `None` uses [`LIVE_WS_URL`]
    pub endpoint: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: String::new(),
            voice: None,
            system_prompt: None,
            temperature: None,
            tools: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            endpoint: None,
        }
    }
}

impl LiveConfig {
    /// Build the WebSocket URL with the API key attached.
    pub fn endpoint_url(&self) -> String {
        let base = self.endpoint.as_deref().unwrap_or(LIVE_WS_URL);
        format!("{}?key={}", base, self.api_key)
    }

    /// Fully qualified model path as the wire expects it.
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_policy_default() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_ms, 500);
    }

    #[test]
    fn test_reconnect_should_retry() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));

        let disabled = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(!disabled.should_retry(0));
    }

    #[test]
    fn test_endpoint_url() {
        let config = LiveConfig {
            api_key: "k123".to_string(),
            model: "gemini-2.0-flash-live-001".to_string(),
            ..Default::default()
        };
        let url = config.endpoint_url();
        assert!(url.starts_with("wss://generativelanguage.googleapis.com"));
        assert!(url.ends_with("?key=k123"));
    }

    #[test]
    fn test_endpoint_override() {
        let config = LiveConfig {
            api_key: "k".to_string(),
            endpoint: Some("ws://127.0.0.1:9999".to_string()),
            ..Default::default()
        };
        assert_eq!(config.endpoint_url(), "ws://127.0.0.1:9999?key=k");
    }

    #[test]
    fn test_model_path() {
        let mut config = LiveConfig {
            model: "gemini-2.0-flash-live-001".to_string(),
            ..Default::default()
        };
        assert_eq!(config.model_path(), "models/gemini-2.0-flash-live-001");

        config.model = "models/custom".to_string();
        assert_eq!(config.model_path(), "models/custom");
    }
}
