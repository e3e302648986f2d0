//! Payment tool handlers: prepare → set amount → confirm, plus cancel.
//!
//! The confirm step recovers a reset flow from the voice-context cache
//! before failing: the authoritative flow state can be cleared by unrelated
//! user-interface actions while the spoken sequence is still in progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::live::FunctionDeclaration;
use crate::payments::{
    FlowState, PaymentFlow, PaymentVoiceContext, VoiceContextCache, WalletSecurity,
};

use super::{ToolHandler, error_result};

fn arg_str(args: &serde_json::Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn arg_f64(args: &serde_json::Value, key: &str) -> Option<f64> {
    args.get(key).and_then(serde_json::Value::as_f64)
}

/// `prepare_payment` - begin a payment to a merchant.
pub struct PreparePaymentTool {
    flow: Arc<dyn PaymentFlow>,
    voice_ctx: VoiceContextCache,
}

impl PreparePaymentTool {
    /// Create the handler.
    pub fn new(flow: Arc<dyn PaymentFlow>, voice_ctx: VoiceContextCache) -> Arc<Self> {
        Arc::new(Self { flow, voice_ctx })
    }
}

#[async_trait]
impl ToolHandler for PreparePaymentTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "prepare_payment".to_string(),
            description: "Begin a payment to a merchant. Uses the merchant from the last QR scan \
                          when no wallet address is given."
                .to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "merchant_wallet": {
                        "type": "string",
                        "description": "Destination wallet address"
                    },
                    "merchant_name": {
                        "type": "string",
                        "description": "Merchant display name"
                    }
                }
            })),
        }
    }

    async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        let cached = self.voice_ctx.get();
        let merchant_wallet = arg_str(&args, "merchant_wallet")
            .or_else(|| cached.as_ref().map(|c| c.merchant_wallet.clone()));
        let Some(merchant_wallet) = merchant_wallet else {
            return error_result("no merchant wallet known; scan a QR code first");
        };
        let merchant_name = arg_str(&args, "merchant_name")
            .or_else(|| cached.as_ref().and_then(|c| c.merchant_name.clone()));

        match self
            .flow
            .prepare(&merchant_wallet, merchant_name.as_deref())
            .await
        {
            Ok(()) => {
                self.voice_ctx.set(PaymentVoiceContext {
                    merchant_wallet: merchant_wallet.clone(),
                    merchant_name: merchant_name.clone(),
                    amount: cached.and_then(|c| c.amount),
                });
                serde_json::json!({
                    "status": "prepared",
                    "merchant_wallet": merchant_wallet,
                    "merchant_name": merchant_name,
                })
            }
            Err(e) => error_result(format!("could not prepare payment: {e}")),
        }
    }
}

/// `set_payment_amount` - set the amount of the prepared payment.
pub struct SetPaymentAmountTool {
    flow: Arc<dyn PaymentFlow>,
    voice_ctx: VoiceContextCache,
}

impl SetPaymentAmountTool {
    /// Create the handler.
    pub fn new(flow: Arc<dyn PaymentFlow>, voice_ctx: VoiceContextCache) -> Arc<Self> {
        Arc::new(Self { flow, voice_ctx })
    }

    /// Re-prepare from the cache when the primary flow state was reset.
    async fn recover_if_reset(&self) {
        if self.flow.state().await == FlowState::Idle
            && let Some(context) = self.voice_ctx.get()
        {
            tracing::info!("flow state was reset; re-preparing from voice context");
            if let Err(e) = self
                .flow
                .prepare(&context.merchant_wallet, context.merchant_name.as_deref())
                .await
            {
                tracing::warn!(error = %e, "re-prepare from voice context failed");
            }
        }
    }
}

#[async_trait]
impl ToolHandler for SetPaymentAmountTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "set_payment_amount".to_string(),
            description: "Set the amount of the prepared payment.".to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {
                    "amount": {
                        "type": "number",
                        "description": "Payment amount"
                    }
                },
                "required": ["amount"]
            })),
        }
    }

    async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        let Some(amount) = arg_f64(&args, "amount") else {
            return error_result("missing amount");
        };
        if !(amount.is_finite() && amount > 0.0) {
            return error_result(format!("invalid amount: {amount}"));
        }

        self.recover_if_reset().await;

        match self.flow.set_amount(amount).await {
            Ok(()) => {
                self.voice_ctx.set_amount(amount);
                serde_json::json!({ "status": "amount_set", "amount": amount })
            }
            Err(e) => error_result(format!("could not set amount: {e}")),
        }
    }
}

/// `confirm_payment` - run the wallet check and execute the payment.
pub struct ConfirmPaymentTool {
    flow: Arc<dyn PaymentFlow>,
    wallet: Arc<dyn WalletSecurity>,
    voice_ctx: VoiceContextCache,
    /// Shared with the audio pipeline; held high around the side effect so
    /// the model does not hear confirmation chimes as user speech
    muted: Arc<AtomicBool>,
}

impl ConfirmPaymentTool {
    /// Create the handler.
    pub fn new(
        flow: Arc<dyn PaymentFlow>,
        wallet: Arc<dyn WalletSecurity>,
        voice_ctx: VoiceContextCache,
        muted: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            flow,
            wallet,
            voice_ctx,
            muted,
        })
    }

    /// Rebuild the flow from the voice cache when it was reset mid-sequence.
    async fn recover_from_cache(&self) -> Result<(), String> {
        let Some(context) = self.voice_ctx.get() else {
            return Err("no payment is ready to confirm".to_string());
        };
        let Some(amount) = context.amount else {
            return Err("no amount has been set".to_string());
        };
        tracing::info!("flow state was reset; recovering payment intent from voice context");
        self.flow
            .prepare(&context.merchant_wallet, context.merchant_name.as_deref())
            .await
            .map_err(|e| format!("could not re-prepare payment: {e}"))?;
        self.flow
            .set_amount(amount)
            .await
            .map_err(|e| format!("could not restore amount: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl ToolHandler for ConfirmPaymentTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "confirm_payment".to_string(),
            description: "Execute the prepared payment after the wallet security check. Requires \
                          a prepared payment with an amount."
                .to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {}
            })),
        }
    }

    async fn call(&self, _args: serde_json::Value, cancel: CancellationToken) -> serde_json::Value {
        if self.flow.state().await != FlowState::AmountSet
            && let Err(message) = self.recover_from_cache().await
        {
            return error_result(message);
        }

        let Some(details) = self.flow.current().await else {
            return error_result("no payment is ready to confirm");
        };
        let Some(amount) = details.amount else {
            return error_result("no amount has been set");
        };

        if let Err(e) = self.wallet.approve(&details.merchant_wallet, amount).await {
            return error_result(format!("wallet rejected the payment: {e}"));
        }

        if cancel.is_cancelled() {
            return error_result("cancelled");
        }

        self.muted.store(true, Ordering::Relaxed);
        let outcome = self.flow.confirm().await;
        self.muted.store(false, Ordering::Relaxed);

        match outcome {
            Ok(receipt) => {
                self.voice_ctx.clear();
                serde_json::json!({
                    "status": "confirmed",
                    "receipt": receipt,
                    "merchant_wallet": details.merchant_wallet,
                    "amount": amount,
                })
            }
            Err(e) => error_result(format!("payment failed: {e}")),
        }
    }
}

/// `cancel_payment` - abandon the in-progress payment.
pub struct CancelPaymentTool {
    flow: Arc<dyn PaymentFlow>,
    voice_ctx: VoiceContextCache,
}

impl CancelPaymentTool {
    /// Create the handler.
    pub fn new(flow: Arc<dyn PaymentFlow>, voice_ctx: VoiceContextCache) -> Arc<Self> {
        Arc::new(Self { flow, voice_ctx })
    }
}

#[async_trait]
impl ToolHandler for CancelPaymentTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "cancel_payment".to_string(),
            description: "Abandon the in-progress payment.".to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {}
            })),
        }
    }

    async fn call(&self, _args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        let outcome = self.flow.cancel().await;
        // The cache never outlives an explicit cancel.
        self.voice_ctx.clear();
        match outcome {
            Ok(()) => serde_json::json!({ "status": "cancelled" }),
            Err(e) => error_result(format!("could not cancel: {e}")),
        }
    }
}
