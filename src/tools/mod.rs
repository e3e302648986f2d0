//! Tool handlers and the orchestrator dispatching the model's function
//! calls.
//!
//! Handlers never panic or bubble errors upward: every failure becomes a
//! structured result sent back to the model so the session stays alive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::live::FunctionDeclaration;

pub mod market;
pub mod orchestrator;
pub mod payment;
pub mod scanner;

pub use market::MarketPriceTool;
pub use orchestrator::ToolOrchestrator;
pub use payment::{CancelPaymentTool, ConfirmPaymentTool, PreparePaymentTool, SetPaymentAmountTool};
pub use scanner::ScanQrTool;

/// One handler per declared tool name.
///
/// Handlers are cooperatively cancellable: long-running steps should check
/// the token between side effects. The orchestrator never sends a response
/// for a cancelled call regardless.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Declaration advertised to the model during setup.
    fn declaration(&self) -> FunctionDeclaration;

    /// Execute the call. The returned value is sent verbatim as the
    /// function response.
    async fn call(&self, args: serde_json::Value, cancel: CancellationToken) -> serde_json::Value;
}

/// Registry of handlers keyed by declared name.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared name. A later registration
    /// with the same name replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        self.handlers.insert(name, handler);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Declarations for the setup request.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<_> = self
            .handlers
            .values()
            .map(|handler| handler.declaration())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// A bare `{"status": ...}` result.
pub(crate) fn status_result(status: &str) -> serde_json::Value {
    serde_json::json!({ "status": status })
}

/// A structured error result; sent to the model, never thrown.
pub(crate) fn error_result(message: impl AsRef<str>) -> serde_json::Value {
    serde_json::json!({ "status": "error", "message": message.as_ref() })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn declaration(&self) -> FunctionDeclaration {
            FunctionDeclaration {
                name: "echo".to_string(),
                description: "Echo the arguments".to_string(),
                parameters: None,
            }
        }

        async fn call(
            &self,
            args: serde_json::Value,
            _cancel: CancellationToken,
        ) -> serde_json::Value {
            args
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_declarations_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let declarations = registry.declarations();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "echo");
    }

    #[test]
    fn test_result_helpers() {
        assert_eq!(status_result("ok")["status"], "ok");
        let err = error_result("nope");
        assert_eq!(err["status"], "error");
        assert_eq!(err["message"], "nope");
    }
}
