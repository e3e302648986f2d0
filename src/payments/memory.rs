//! In-process reference collaborators.
//!
//! Used by the CLI when no real wallet/camera integration is wired in, and
//! by the test suite. The flow state machine mirrors the transitions a real
//! payment collaborator exposes, including the out-of-band `reset()` a user
//! interface can trigger mid-sequence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    FlowError, FlowResult, FlowState, MarketData, MarketQuote, PaymentDetails, PaymentFlow,
    QrDetection, QrScanner, WalletSecurity,
};

#[derive(Debug, Default)]
struct FlowInner {
    state: Option<FlowState>,
    merchant_wallet: Option<String>,
    merchant_name: Option<String>,
    amount: Option<f64>,
}

/// In-memory payment flow state machine.
#[derive(Debug, Default)]
pub struct InMemoryPaymentFlow {
    inner: Mutex<FlowInner>,
}

impl InMemoryPaymentFlow {
    /// Create an idle flow.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reset to idle, as a user-interface action would. Not part of the
    /// [`PaymentFlow`] contract: the voice layer cannot trigger this.
    pub fn reset(&self) {
        *self.inner.lock() = FlowInner::default();
    }
}

#[async_trait]
impl PaymentFlow for InMemoryPaymentFlow {
    async fn state(&self) -> FlowState {
        self.inner.lock().state.unwrap_or(FlowState::Idle)
    }

    async fn current(&self) -> Option<PaymentDetails> {
        let inner = self.inner.lock();
        inner.merchant_wallet.clone().map(|merchant_wallet| PaymentDetails {
            merchant_wallet,
            merchant_name: inner.merchant_name.clone(),
            amount: inner.amount,
        })
    }

    async fn prepare(&self, merchant_wallet: &str, merchant_name: Option<&str>) -> FlowResult<()> {
        if merchant_wallet.is_empty() {
            return Err(FlowError::Rejected("empty merchant wallet".to_string()));
        }
        let mut inner = self.inner.lock();
        inner.state = Some(FlowState::Prepared);
        inner.merchant_wallet = Some(merchant_wallet.to_string());
        inner.merchant_name = merchant_name.map(str::to_string);
        inner.amount = None;
        Ok(())
    }

    async fn set_amount(&self, amount: f64) -> FlowResult<()> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(FlowError::Rejected(format!("invalid amount: {amount}")));
        }
        let mut inner = self.inner.lock();
        match inner.state {
            Some(FlowState::Prepared) | Some(FlowState::AmountSet) => {
                inner.amount = Some(amount);
                inner.state = Some(FlowState::AmountSet);
                Ok(())
            }
            other => Err(FlowError::InvalidState(format!(
                "cannot set amount while {}",
                other.unwrap_or(FlowState::Idle)
            ))),
        }
    }

    async fn confirm(&self) -> FlowResult<String> {
        {
            let mut inner = self.inner.lock();
            if inner.state != Some(FlowState::AmountSet) {
                return Err(FlowError::InvalidState(format!(
                    "cannot confirm while {}",
                    inner.state.unwrap_or(FlowState::Idle)
                )));
            }
            inner.state = Some(FlowState::Confirming);
        }
        let receipt = uuid::Uuid::new_v4().to_string();
        let mut inner = self.inner.lock();
        inner.state = Some(FlowState::Completed);
        Ok(receipt)
    }

    async fn cancel(&self) -> FlowResult<()> {
        self.reset();
        Ok(())
    }
}

/// Wallet approval that accepts everything under a configurable limit.
#[derive(Debug)]
pub struct LimitWallet {
    limit: f64,
}

impl LimitWallet {
    /// Approve payments up to `limit` (in the payment currency).
    pub fn new(limit: f64) -> Arc<Self> {
        Arc::new(Self { limit })
    }
}

#[async_trait]
impl WalletSecurity for LimitWallet {
    async fn approve(&self, _merchant_wallet: &str, amount: f64) -> FlowResult<()> {
        if amount > self.limit {
            return Err(FlowError::Rejected(format!(
                "amount {amount} exceeds approval limit {}",
                self.limit
            )));
        }
        Ok(())
    }
}

/// Scanner that resolves to a scripted detection after a delay, or never.
#[derive(Debug, Default)]
pub struct ScriptedScanner {
    detection: Mutex<Option<QrDetection>>,
    delay: Duration,
}

impl ScriptedScanner {
    /// A scanner that reports `detection` after `delay`.
    pub fn with_detection(detection: QrDetection, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            detection: Mutex::new(Some(detection)),
            delay,
        })
    }

    /// A scanner that never sees a code; callers hit their timeout.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl QrScanner for ScriptedScanner {
    async fn scan(&self) -> FlowResult<QrDetection> {
        tokio::time::sleep(self.delay).await;
        let detection = self.detection.lock().clone();
        match detection {
            Some(detection) => Ok(detection),
            // Keep the camera "open" until the caller times out.
            None => std::future::pending().await,
        }
    }
}

/// Market data backed by a fixed table.
#[derive(Debug, Default)]
pub struct FixedMarketData {
    prices: HashMap<String, f64>,
}

impl FixedMarketData {
    /// Build from symbol/price pairs.
    pub fn new<I: IntoIterator<Item = (&'static str, f64)>>(prices: I) -> Arc<Self> {
        Arc::new(Self {
            prices: prices
                .into_iter()
                .map(|(symbol, price)| (symbol.to_uppercase(), price))
                .collect(),
        })
    }
}

#[async_trait]
impl MarketData for FixedMarketData {
    async fn quote(&self, symbol: &str) -> FlowResult<MarketQuote> {
        let key = symbol.to_uppercase();
        match self.prices.get(&key) {
            Some(&price_usd) => Ok(MarketQuote {
                symbol: key,
                price_usd,
                change_24h: None,
            }),
            None => Err(FlowError::Unavailable(format!("no quote for {symbol}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flow_happy_path() {
        let flow = InMemoryPaymentFlow::new();
        assert_eq!(flow.state().await, FlowState::Idle);

        flow.prepare("0xabc", Some("Cafe Rust")).await.unwrap();
        assert_eq!(flow.state().await, FlowState::Prepared);

        flow.set_amount(4.5).await.unwrap();
        assert_eq!(flow.state().await, FlowState::AmountSet);

        let receipt = flow.confirm().await.unwrap();
        assert!(!receipt.is_empty());
        assert_eq!(flow.state().await, FlowState::Completed);
    }

    #[tokio::test]
    async fn test_flow_rejects_out_of_order_steps() {
        let flow = InMemoryPaymentFlow::new();
        assert!(flow.set_amount(1.0).await.is_err());
        assert!(flow.confirm().await.is_err());

        flow.prepare("0xabc", None).await.unwrap();
        assert!(flow.confirm().await.is_err());
    }

    #[tokio::test]
    async fn test_flow_rejects_bad_amounts() {
        let flow = InMemoryPaymentFlow::new();
        flow.prepare("0xabc", None).await.unwrap();
        assert!(flow.set_amount(0.0).await.is_err());
        assert!(flow.set_amount(-3.0).await.is_err());
        assert!(flow.set_amount(f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_flow_reset_clears_everything() {
        let flow = InMemoryPaymentFlow::new();
        flow.prepare("0xabc", None).await.unwrap();
        flow.set_amount(2.0).await.unwrap();
        flow.reset();
        assert_eq!(flow.state().await, FlowState::Idle);
        assert!(flow.current().await.is_none());
    }

    #[tokio::test]
    async fn test_limit_wallet() {
        let wallet = LimitWallet::new(100.0);
        assert!(wallet.approve("0xabc", 50.0).await.is_ok());
        assert!(wallet.approve("0xabc", 150.0).await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_market_data() {
        let market = FixedMarketData::new([("SOL", 95.0)]);
        let quote = market.quote("sol").await.unwrap();
        assert_eq!(quote.symbol, "SOL");
        assert!((quote.price_usd - 95.0).abs() < f64::EPSILON);
        assert!(market.quote("DOGE").await.is_err());
    }
}
