pub mod audio;
pub mod config;
pub mod errors;
pub mod live;
pub mod payments;
pub mod session;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::AgentConfig;
pub use errors::{AgentError, AgentResult, AudioError, LiveError};
pub use live::{InboundEvent, LiveClient, LiveConfig, OutboundMessage, SessionState};
pub use session::{Collaborators, SessionCoordinator, SessionStatus};
pub use tools::{ToolOrchestrator, ToolRegistry};
