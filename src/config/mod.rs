//! Configuration for the voice payment assistant.
//!
//! Configuration is loaded from environment variables (a `.env` file is read
//! by the binary before this module runs). Priority: process env vars > .env
//! values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use voicepay_agent::config::AgentConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::from_env()?;
//! println!("using model {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::errors::{AgentError, AgentResult};
use crate::live::ReconnectPolicy;

/// Default speech model identifier.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-live-001";

/// Default voice for audio output.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Agent configuration.
///
/// Contains everything needed to run a session: the speech-model credentials
/// and identity, the system prompt, reconnection tuning, and debug switches.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// API key for the speech-model service
    pub api_key: String,

    /// Model identifier (e.g. "gemini-2.0-flash-live-001")
    pub model: String,

    /// Voice for audio output
    pub voice: String,

    /// System prompt override; `None` uses the built-in payment prompt
    pub system_prompt: Option<String>,

    /// Custom WebSocket endpoint (used by tests and proxies)
    pub endpoint: Option<String>,

    /// Reconnection tuning
    pub reconnect: ReconnectPolicy,

    /// If set, outbound capture audio is also written to this WAV file
    pub debug_audio_dump: Option<PathBuf>,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `GEMINI_API_KEY` (required) - speech-model API key
    /// - `VOICEPAY_MODEL` - model identifier
    /// - `VOICEPAY_VOICE` - output voice name
    /// - `VOICEPAY_SYSTEM_PROMPT` - system prompt override
    /// - `VOICEPAY_ENDPOINT` - WebSocket endpoint override
    /// - `VOICEPAY_RECONNECT_ATTEMPTS` - max reconnection attempts
    /// - `VOICEPAY_RECONNECT_DELAY_MS` - delay between attempts
    /// - `VOICEPAY_AUDIO_DUMP` - path for a debug WAV dump of capture audio
    pub fn from_env() -> AgentResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AgentError::Config("GEMINI_API_KEY is not set".to_string()))?;

        let mut reconnect = ReconnectPolicy::default();
        if let Some(attempts) = read_parsed::<u32>("VOICEPAY_RECONNECT_ATTEMPTS")? {
            reconnect.max_attempts = attempts;
        }
        if let Some(delay) = read_parsed::<u64>("VOICEPAY_RECONNECT_DELAY_MS")? {
            reconnect.delay_ms = delay;
        }

        let config = Self {
            api_key,
            model: std::env::var("VOICEPAY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            voice: std::env::var("VOICEPAY_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string()),
            system_prompt: std::env::var("VOICEPAY_SYSTEM_PROMPT").ok(),
            endpoint: std::env::var("VOICEPAY_ENDPOINT").ok(),
            reconnect,
            debug_audio_dump: std::env::var("VOICEPAY_AUDIO_DUMP").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AgentResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AgentError::Config("API key must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| AgentError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(AgentError::Config(format!(
                    "endpoint must be a ws:// or wss:// URL, got {endpoint}"
                )));
            }
        }
        Ok(())
    }
}

/// Read and parse an optional environment variable.
fn read_parsed<T: std::str::FromStr>(name: &str) -> AgentResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AgentConfig {
        AgentConfig {
            api_key: "test-key".to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_prompt: None,
            endpoint: None,
            reconnect: ReconnectPolicy::default(),
            debug_audio_dump: None,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_api_key() {
        let mut config = test_config();
        config.api_key = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let mut config = test_config();
        config.model = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = test_config();
        config.endpoint = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.endpoint = Some("https://example.com".to_string());
        assert!(config.validate().is_err());

        config.endpoint = Some("wss://example.com/live".to_string());
        assert!(config.validate().is_ok());
    }
}
