//! The QR scan tool: a long-running side effect with an immediate
//! acknowledgement.
//!
//! Camera activation is slow. If the handler waited for a detection, the
//! model would see a call that never returns and retry or cancel it, so the
//! handler acknowledges immediately ("scanning started") and a follow-up
//! task pushes the real outcome into the conversation as injected context
//! once the detection (or a timeout) is known.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::live::{FunctionDeclaration, OutboundMessage};
use crate::payments::{FlowState, PaymentFlow, PaymentVoiceContext, QrScanner, VoiceContextCache};

use super::{ToolHandler, status_result};

/// How long the camera may look for a code before the scan fails.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// `scan_qr` - activate the camera and look for a merchant code.
pub struct ScanQrTool {
    scanner: Arc<dyn QrScanner>,
    flow: Arc<dyn PaymentFlow>,
    voice_ctx: VoiceContextCache,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    scan_in_progress: Arc<AtomicBool>,
    follow_up: parking_lot::Mutex<Option<JoinHandle<()>>>,
    scan_timeout: Duration,
}

impl ScanQrTool {
    /// Create the handler with the default scan timeout.
    pub fn new(
        scanner: Arc<dyn QrScanner>,
        flow: Arc<dyn PaymentFlow>,
        voice_ctx: VoiceContextCache,
        outbound_tx: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Self> {
        Self::with_timeout(scanner, flow, voice_ctx, outbound_tx, SCAN_TIMEOUT)
    }

    /// Create the handler with a custom scan timeout.
    pub fn with_timeout(
        scanner: Arc<dyn QrScanner>,
        flow: Arc<dyn PaymentFlow>,
        voice_ctx: VoiceContextCache,
        outbound_tx: mpsc::Sender<OutboundMessage>,
        scan_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            scanner,
            flow,
            voice_ctx,
            outbound_tx,
            scan_in_progress: Arc::new(AtomicBool::new(false)),
            follow_up: parking_lot::Mutex::new(None),
            scan_timeout,
        })
    }

    /// Whether a scan follow-up is currently running.
    pub fn is_scanning(&self) -> bool {
        self.scan_in_progress.load(Ordering::SeqCst)
    }

    /// Abort any running follow-up. Called on session teardown.
    pub fn abort_follow_up(&self) {
        if let Some(handle) = self.follow_up.lock().take() {
            handle.abort();
        }
        self.scan_in_progress.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ToolHandler for ScanQrTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "scan_qr".to_string(),
            description: "Activate the camera and scan a merchant QR code. Responds immediately; \
                          the scan result arrives as a separate message once the camera sees a \
                          code."
                .to_string(),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {}
            })),
        }
    }

    async fn call(&self, _args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        // Guard conditions: never start duplicate work, report why instead.
        if let Some(context) = self.voice_ctx.get() {
            return serde_json::json!({
                "status": "already_scanned",
                "merchant_wallet": context.merchant_wallet,
                "merchant_name": context.merchant_name,
            });
        }
        if self.scan_in_progress.load(Ordering::SeqCst) {
            return status_result("scan_in_progress");
        }
        let state = self.flow.state().await;
        if !matches!(state, FlowState::Idle) {
            return serde_json::json!({
                "status": "busy",
                "flow_state": state.to_string(),
            });
        }

        self.scan_in_progress.store(true, Ordering::SeqCst);

        let scanner = Arc::clone(&self.scanner);
        let flow = Arc::clone(&self.flow);
        let voice_ctx = self.voice_ctx.clone();
        let outbound_tx = self.outbound_tx.clone();
        let scan_in_progress = Arc::clone(&self.scan_in_progress);
        let scan_timeout = self.scan_timeout;

        let handle = tokio::spawn(async move {
            let text = match tokio::time::timeout(scan_timeout, scanner.scan()).await {
                Ok(Ok(detection)) => on_detection(&flow, &voice_ctx, detection).await,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "QR scan failed");
                    format!("The QR scan failed: {e}. Tell the user and offer to retry.")
                }
                Err(_) => {
                    tracing::warn!("QR scan timed out");
                    "The QR scan timed out without seeing a code. Tell the user and offer to \
                     retry."
                        .to_string()
                }
            };
            scan_in_progress.store(false, Ordering::SeqCst);
            let _ = outbound_tx.send(OutboundMessage::ContextText(text)).await;
        });

        if let Some(previous) = self.follow_up.lock().replace(handle) {
            previous.abort();
        }

        status_result("scanning_started")
    }
}

/// Apply a detection to the flow and cache, and phrase the context push.
async fn on_detection(
    flow: &Arc<dyn PaymentFlow>,
    voice_ctx: &VoiceContextCache,
    detection: crate::payments::QrDetection,
) -> String {
    tracing::info!(
        merchant = detection.merchant_name.as_deref().unwrap_or("<unnamed>"),
        "QR code detected"
    );

    if let Err(e) = flow
        .prepare(&detection.merchant_wallet, detection.merchant_name.as_deref())
        .await
    {
        return format!("A QR code was scanned but the payment could not be prepared: {e}.");
    }

    voice_ctx.set(PaymentVoiceContext {
        merchant_wallet: detection.merchant_wallet.clone(),
        merchant_name: detection.merchant_name.clone(),
        amount: detection.amount,
    });

    let merchant = detection
        .merchant_name
        .clone()
        .unwrap_or_else(|| detection.merchant_wallet.clone());
    match detection.amount {
        Some(amount) => {
            if let Err(e) = flow.set_amount(amount).await {
                tracing::warn!(error = %e, "could not apply scanned amount");
            }
            format!(
                "QR code scanned: payment of {amount} to {merchant} is ready. Ask the user to \
                 confirm."
            )
        }
        None => format!(
            "QR code scanned: merchant {merchant}. Ask the user for the amount to pay."
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::payments::QrDetection;
    use crate::payments::memory::{InMemoryPaymentFlow, ScriptedScanner};

    use super::*;

    fn detection() -> QrDetection {
        QrDetection {
            merchant_wallet: "0xmerchant".to_string(),
            merchant_name: Some("Cafe Rust".to_string()),
            amount: None,
        }
    }

    #[tokio::test]
    async fn test_scan_acknowledges_immediately_then_pushes_context() {
        let flow = InMemoryPaymentFlow::new();
        let cache = VoiceContextCache::new();
        let (tx, mut rx) = mpsc::channel(8);
        let scanner = ScriptedScanner::with_detection(detection(), Duration::from_millis(20));
        let tool = ScanQrTool::new(scanner, flow.clone(), cache.clone(), tx);

        let ack = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(ack["status"], "scanning_started");
        assert!(tool.is_scanning());

        // The real outcome arrives later as injected context.
        let message = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            OutboundMessage::ContextText(text) => assert!(text.contains("Cafe Rust")),
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(flow.state().await, FlowState::Prepared);
        assert_eq!(cache.get().unwrap().merchant_wallet, "0xmerchant");
        assert!(!tool.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_with_encoded_amount_sets_it() {
        let flow = InMemoryPaymentFlow::new();
        let cache = VoiceContextCache::new();
        let (tx, mut rx) = mpsc::channel(8);
        let scanner = ScriptedScanner::with_detection(
            QrDetection {
                amount: Some(7.5),
                ..detection()
            },
            Duration::from_millis(5),
        );
        let tool = ScanQrTool::new(scanner, flow.clone(), cache.clone(), tx);

        tool.call(serde_json::json!({}), CancellationToken::new())
            .await;
        let _ = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap();
        assert_eq!(flow.state().await, FlowState::AmountSet);
        assert_eq!(cache.get().unwrap().amount, Some(7.5));
    }

    #[tokio::test]
    async fn test_scan_rejected_when_already_scanned() {
        let flow = InMemoryPaymentFlow::new();
        let cache = VoiceContextCache::new();
        cache.set(PaymentVoiceContext {
            merchant_wallet: "0xmerchant".to_string(),
            merchant_name: None,
            amount: None,
        });
        let (tx, _rx) = mpsc::channel(8);
        let tool = ScanQrTool::new(ScriptedScanner::empty(), flow, cache, tx);

        let result = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(result["status"], "already_scanned");
        assert!(!tool.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_rejected_while_in_progress() {
        let flow = InMemoryPaymentFlow::new();
        let (tx, _rx) = mpsc::channel(8);
        let scanner = ScriptedScanner::with_detection(detection(), Duration::from_millis(200));
        let tool = ScanQrTool::new(scanner, flow, VoiceContextCache::new(), tx);

        let first = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(first["status"], "scanning_started");
        let second = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(second["status"], "scan_in_progress");
        tool.abort_follow_up();
    }

    #[tokio::test]
    async fn test_scan_rejected_when_flow_busy() {
        let flow = InMemoryPaymentFlow::new();
        flow.prepare("0xother", None).await.unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let tool = ScanQrTool::new(
            ScriptedScanner::empty(),
            flow,
            VoiceContextCache::new(),
            tx,
        );

        let result = tool
            .call(serde_json::json!({}), CancellationToken::new())
            .await;
        assert_eq!(result["status"], "busy");
        assert_eq!(result["flow_state"], "prepared");
    }

    #[tokio::test]
    async fn test_scan_timeout_pushes_failure_context() {
        let flow = InMemoryPaymentFlow::new();
        let (tx, mut rx) = mpsc::channel(8);
        let tool = ScanQrTool::with_timeout(
            ScriptedScanner::empty(),
            flow,
            VoiceContextCache::new(),
            tx,
            Duration::from_millis(30),
        );

        tool.call(serde_json::json!({}), CancellationToken::new())
            .await;
        let message = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            OutboundMessage::ContextText(text) => assert!(text.contains("timed out")),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(!tool.is_scanning());
    }
}
