//! External payment collaborators, specified by interface only.
//!
//! The session core never constructs payments itself: the flow state
//! machine, wallet approval, QR scanning, and market data all live behind
//! these traits and are injected into the coordinator. In-process reference
//! implementations for the CLI and tests live in [`memory`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

/// Errors surfaced by payment collaborators.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The operation is not valid in the current flow state
    #[error("Invalid flow state: {0}")]
    InvalidState(String),

    /// The collaborator rejected the operation
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The collaborator is unavailable
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Result type for collaborator operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Payment flow states as exposed by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Nothing in progress; listening for a merchant
    Idle,
    /// Camera scan running
    Scanning,
    /// Merchant known, amount missing
    Prepared,
    /// Merchant and amount known, awaiting confirmation
    AmountSet,
    /// Confirmation side effect running
    Confirming,
    /// Payment finished
    Completed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::Scanning => "scanning",
            FlowState::Prepared => "prepared",
            FlowState::AmountSet => "amount_set",
            FlowState::Confirming => "confirming",
            FlowState::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// Parameters of the payment currently held by the flow collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    /// Destination wallet address
    pub merchant_wallet: String,
    /// Display name, when known
    pub merchant_name: Option<String>,
    /// Amount, once set
    pub amount: Option<f64>,
}

/// A merchant code detected by the camera collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrDetection {
    /// Destination wallet address
    pub merchant_wallet: String,
    /// Display name, when encoded
    pub merchant_name: Option<String>,
    /// Requested amount, when encoded
    pub amount: Option<f64>,
}

/// The payment flow state machine (prepare → set amount → confirm).
#[async_trait]
pub trait PaymentFlow: Send + Sync {
    /// Current flow state.
    async fn state(&self) -> FlowState;

    /// Parameters of the in-progress payment, if any.
    async fn current(&self) -> Option<PaymentDetails>;

    /// Begin a payment to a merchant.
    async fn prepare(&self, merchant_wallet: &str, merchant_name: Option<&str>) -> FlowResult<()>;

    /// Set the amount of the prepared payment.
    async fn set_amount(&self, amount: f64) -> FlowResult<()>;

    /// Execute the payment. Returns a receipt identifier.
    async fn confirm(&self) -> FlowResult<String>;

    /// Abandon the in-progress payment.
    async fn cancel(&self) -> FlowResult<()>;
}

/// Wallet approval / security check run before a confirmation.
#[async_trait]
pub trait WalletSecurity: Send + Sync {
    /// Approve or reject a payment before it executes.
    async fn approve(&self, merchant_wallet: &str, amount: f64) -> FlowResult<()>;
}

/// Camera collaborator that resolves to a detected merchant code.
#[async_trait]
pub trait QrScanner: Send + Sync {
    /// Activate the camera and wait for a detection. May take a long time;
    /// callers bound it with a timeout.
    async fn scan(&self) -> FlowResult<QrDetection>;
}

/// A market quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    /// Asset symbol
    pub symbol: String,
    /// Price in USD
    pub price_usd: f64,
    /// 24-hour change in percent, when known
    pub change_24h: Option<f64>,
}

/// Market data lookups.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Quote an asset by symbol.
    async fn quote(&self, symbol: &str) -> FlowResult<MarketQuote>;
}

/// The in-progress payment parameters as heard over voice.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentVoiceContext {
    /// Destination wallet address
    pub merchant_wallet: String,
    /// Display name, when known
    pub merchant_name: Option<String>,
    /// Amount, once spoken
    pub amount: Option<f64>,
}

/// Side-channel cache mirroring in-progress payment parameters.
///
/// The authoritative flow state can be reset by unrelated user-interface
/// actions while a voice-driven multi-step tool sequence is still executing;
/// this cache lets a later step recover the intent. Cleared on success,
/// explicit cancel, and session teardown; never read once cleared.
#[derive(Debug, Clone, Default)]
pub struct VoiceContextCache {
    inner: Arc<parking_lot::Mutex<Option<PaymentVoiceContext>>>,
}

impl VoiceContextCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached context.
    pub fn set(&self, context: PaymentVoiceContext) {
        *self.inner.lock() = Some(context);
    }

    /// Record the spoken amount, keeping the cached merchant.
    pub fn set_amount(&self, amount: f64) {
        if let Some(context) = self.inner.lock().as_mut() {
            context.amount = Some(amount);
        }
    }

    /// Snapshot of the cached context.
    pub fn get(&self) -> Option<PaymentVoiceContext> {
        self.inner.lock().clone()
    }

    /// Drop the cached context.
    pub fn clear(&self) {
        *self.inner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_context_set_get_clear() {
        let cache = VoiceContextCache::new();
        assert!(cache.get().is_none());

        cache.set(PaymentVoiceContext {
            merchant_wallet: "0xabc".to_string(),
            merchant_name: Some("Cafe Rust".to_string()),
            amount: None,
        });
        assert_eq!(cache.get().unwrap().merchant_wallet, "0xabc");

        cache.clear();
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_voice_context_amount_merges() {
        let cache = VoiceContextCache::new();
        cache.set(PaymentVoiceContext {
            merchant_wallet: "0xabc".to_string(),
            merchant_name: None,
            amount: None,
        });
        cache.set_amount(12.5);
        let context = cache.get().unwrap();
        assert_eq!(context.amount, Some(12.5));
        assert_eq!(context.merchant_wallet, "0xabc");
    }

    #[test]
    fn test_set_amount_without_context_is_noop() {
        let cache = VoiceContextCache::new();
        cache.set_amount(5.0);
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_flow_state_display() {
        assert_eq!(FlowState::Idle.to_string(), "idle");
        assert_eq!(FlowState::AmountSet.to_string(), "amount_set");
    }
}
