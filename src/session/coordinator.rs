//! Session coordinator: the composition root.
//!
//! Wires the audio pipeline's chunk stream into the protocol client, the
//! client's event stream into playback / tool dispatch / status, and owns
//! the high-level lifecycle (`start`, `stop`, `preconnect`). Collaborators
//! are injected; nothing here reads ambient globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{AudioPipeline, AudioPipelineConfig};
use crate::config::AgentConfig;
use crate::errors::{AgentResult, LiveError};
use crate::live::{InboundEvent, LiveClient, LiveConfig, OutboundMessage, SessionState};
use crate::payments::{MarketData, PaymentFlow, QrScanner, VoiceContextCache, WalletSecurity};
use crate::tools::{
    CancelPaymentTool, ConfirmPaymentTool, MarketPriceTool, PreparePaymentTool, ScanQrTool,
    SetPaymentAmountTool, ToolOrchestrator, ToolRegistry,
};

/// Capacity of the outbound message channel shared by tools and pushes.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Built-in system prompt for the payment assistant.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice payment assistant. You help the user pay \
merchants by scanning QR codes, setting amounts, and confirming payments, and you can quote \
market prices. Keep answers short and always confirm amounts aloud before paying. Use the \
provided tools for every payment action; never invent wallet addresses or amounts.";

/// Externally-owned collaborators injected into the session.
#[derive(Clone)]
pub struct Collaborators {
    /// Payment flow state machine
    pub flow: Arc<dyn PaymentFlow>,
    /// Wallet approval / security check
    pub wallet: Arc<dyn WalletSecurity>,
    /// Camera / QR scanning
    pub scanner: Arc<dyn QrScanner>,
    /// Market data lookups
    pub market: Arc<dyn MarketData>,
}

/// Session status surfaced to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    /// Protocol state
    pub state: SessionState,
    /// Whether model audio is playing or scheduled
    pub is_speaking: bool,
    /// Last human-readable error, if any
    pub last_error: Option<String>,
    /// Last transcription of user audio
    pub last_input_transcript: Option<String>,
    /// Last transcription of model audio
    pub last_output_transcript: Option<String>,
}

/// Composition root for one live voice-agent session.
pub struct SessionCoordinator {
    client: Arc<LiveClient>,
    audio: Arc<AudioPipeline>,
    orchestrator: Arc<ToolOrchestrator>,
    scan_tool: Arc<ScanQrTool>,
    voice_ctx: VoiceContextCache,
    status_tx: watch::Sender<SessionStatus>,
    status_rx: watch::Receiver<SessionStatus>,
    /// Pumps tied to one `start()`/`stop()` cycle
    run_tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl SessionCoordinator {
    /// Build the session from configuration and injected collaborators.
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Self {
        let voice_ctx = VoiceContextCache::new();
        let audio = Arc::new(AudioPipeline::new(AudioPipelineConfig {
            debug_dump: config.debug_audio_dump.clone(),
        }));

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let scan_tool = ScanQrTool::new(
            Arc::clone(&collaborators.scanner),
            Arc::clone(&collaborators.flow),
            voice_ctx.clone(),
            outbound_tx.clone(),
        );

        let mut registry = ToolRegistry::new();
        registry.register(scan_tool.clone());
        registry.register(PreparePaymentTool::new(
            Arc::clone(&collaborators.flow),
            voice_ctx.clone(),
        ));
        registry.register(SetPaymentAmountTool::new(
            Arc::clone(&collaborators.flow),
            voice_ctx.clone(),
        ));
        registry.register(ConfirmPaymentTool::new(
            Arc::clone(&collaborators.flow),
            Arc::clone(&collaborators.wallet),
            voice_ctx.clone(),
            audio.mute_flag(),
        ));
        registry.register(CancelPaymentTool::new(
            Arc::clone(&collaborators.flow),
            voice_ctx.clone(),
        ));
        registry.register(MarketPriceTool::new(Arc::clone(&collaborators.market)));

        let declarations = registry.declarations();
        let orchestrator = ToolOrchestrator::new(registry, outbound_tx);

        let live_config = LiveConfig {
            api_key: config.api_key,
            model: config.model,
            voice: Some(config.voice),
            system_prompt: Some(
                config
                    .system_prompt
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            ),
            temperature: None,
            tools: declarations,
            reconnect: config.reconnect,
            endpoint: config.endpoint,
        };
        let (client, events_rx) = LiveClient::new(live_config);

        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        // The event loop and outbound pump live for the coordinator's
        // lifetime; a stopped session simply has no traffic on them.
        tokio::spawn(event_loop(
            events_rx,
            Arc::clone(&audio),
            Arc::clone(&orchestrator),
            Arc::clone(&client),
            status_tx.clone(),
        ));
        tokio::spawn(outbound_pump(outbound_rx, Arc::clone(&client)));

        Self {
            client,
            audio,
            orchestrator,
            scan_tool,
            voice_ctx,
            status_tx,
            status_rx,
            run_tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Status stream for the presentation layer.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Whether `start()` has run and `stop()` has not.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Establish the session without starting audio, hiding connect latency
    /// from the first spoken turn.
    pub async fn preconnect(&self) -> bool {
        self.client.connect().await
    }

    /// Start audio and connect the session.
    pub async fn start(&self) -> AgentResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let streams = match self.audio.start().await {
            Ok(streams) => streams,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        if !self.client.is_ready() && !self.client.connect().await {
            self.audio.stop().await;
            self.running.store(false, Ordering::SeqCst);
            return Err(LiveError::ConnectionFailed(
                "could not establish the live session".to_string(),
            )
            .into());
        }

        let mut tasks = self.run_tasks.lock().await;

        // Mic chunks → wire, in capture order. Chunks produced while the
        // client reconnects are dropped, not queued.
        let client = Arc::clone(&self.client);
        let mut chunks = streams.chunks;
        tasks.push(tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                if let Err(e) = client.send(OutboundMessage::AudioChunk(chunk)).await {
                    tracing::debug!(error = %e, "audio chunk dropped while not connected");
                }
            }
        }));

        // Fatal audio faults → status surface.
        let status_tx = self.status_tx.clone();
        let mut faults = streams.faults;
        tasks.push(tokio::spawn(async move {
            while let Some(fault) = faults.recv().await {
                tracing::error!(error = %fault, "fatal audio failure");
                status_tx.send_modify(|status| status.last_error = Some(fault.to_string()));
            }
        }));

        tracing::info!("session started");
        Ok(())
    }

    /// Tear down the session: cancel tool work, stop keepalive and audio,
    /// close the transport, reset per-session caches.
    ///
    /// Idempotent, and unconditionally reachable even mid-reconnection.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.scan_tool.abort_follow_up();
        self.orchestrator.shutdown();
        self.client.disconnect().await;
        self.audio.stop().await;
        self.voice_ctx.clear();
        for task in self.run_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Disconnected;
            status.is_speaking = false;
        });
        tracing::info!("session stopped");
    }

    /// Inject free text into the conversation as a completed user turn.
    pub async fn inject_text(&self, text: &str) -> AgentResult<()> {
        self.client
            .send(OutboundMessage::ContextText(text.to_string()))
            .await
            .map_err(Into::into)
    }

    /// Forward one encoded camera frame while a scan is active.
    pub async fn send_video_frame(&self, frame: bytes::Bytes) -> AgentResult<()> {
        self.client
            .send(OutboundMessage::VideoFrame(frame))
            .await
            .map_err(Into::into)
    }

    /// Suspend keepalive pings (e.g. during silent tool execution).
    pub async fn suspend_keepalive(&self) {
        self.client.stop_keepalive().await;
    }

    /// Resume keepalive pings after a suspension.
    pub async fn resume_keepalive(&self) {
        self.client.start_keepalive().await;
    }
}

/// Forward tool responses and context pushes to the client, in order.
async fn outbound_pump(mut rx: mpsc::Receiver<OutboundMessage>, client: Arc<LiveClient>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = client.send(message).await {
            tracing::warn!(error = %e, "outbound message dropped while not connected");
        }
    }
}

/// React to classified inbound events.
async fn event_loop(
    mut events: mpsc::Receiver<InboundEvent>,
    audio: Arc<AudioPipeline>,
    orchestrator: Arc<ToolOrchestrator>,
    client: Arc<LiveClient>,
    status_tx: watch::Sender<SessionStatus>,
) {
    while let Some(event) = events.recv().await {
        match event {
            InboundEvent::ModelAudio(pcm) => {
                // Echo gate: the model must not hear its own output.
                audio.set_muted(true);
                audio.play(&pcm);
            }
            InboundEvent::TurnComplete => {
                audio.set_muted(false);
            }
            InboundEvent::Interrupted => {
                audio.interrupt();
                audio.set_muted(false);
            }
            InboundEvent::ToolCall { id, name, args } => {
                orchestrator.dispatch(id, name, args);
            }
            InboundEvent::ToolCallCancellation(ids) => {
                orchestrator.cancel(&ids);
            }
            InboundEvent::InputTranscript(text) => {
                tracing::debug!(%text, "user transcript");
                status_tx.send_modify(|status| status.last_input_transcript = Some(text.clone()));
            }
            InboundEvent::OutputTranscript(text) => {
                tracing::debug!(%text, "model transcript");
                status_tx.send_modify(|status| status.last_output_transcript = Some(text.clone()));
            }
            InboundEvent::SetupComplete
            | InboundEvent::ResumptionUpdate(_)
            | InboundEvent::GoAway
            | InboundEvent::Unrecognized => {}
        }

        let state = client.state().await;
        let is_speaking = audio.is_speaking();
        status_tx.send_modify(|status| {
            if let SessionState::Error(message) = &state {
                status.last_error = Some(message.clone());
            }
            status.state = state.clone();
            status.is_speaking = is_speaking;
        });
    }
    tracing::debug!("event loop ended");
}

#[cfg(test)]
mod tests {
    use crate::config::AgentConfig;
    use crate::live::ReconnectPolicy;
    use crate::payments::memory::{
        FixedMarketData, InMemoryPaymentFlow, LimitWallet, ScriptedScanner,
    };

    use super::*;

    fn test_coordinator() -> SessionCoordinator {
        let config = AgentConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash-live-001".to_string(),
            voice: "Aoede".to_string(),
            system_prompt: None,
            // Nothing listens here; connect attempts fail fast.
            endpoint: Some("ws://127.0.0.1:1".to_string()),
            reconnect: ReconnectPolicy {
                max_attempts: 0,
                delay_ms: 1,
            },
            debug_audio_dump: None,
        };
        let collaborators = Collaborators {
            flow: InMemoryPaymentFlow::new(),
            wallet: LimitWallet::new(100.0),
            scanner: ScriptedScanner::empty(),
            market: FixedMarketData::new([("SOL", 95.0)]),
        };
        SessionCoordinator::new(config, collaborators)
    }

    #[tokio::test]
    async fn test_initial_status_is_disconnected() {
        let coordinator = test_coordinator();
        let status = coordinator.status();
        assert_eq!(status.borrow().state, SessionState::Disconnected);
        assert!(!status.borrow().is_speaking);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_stop_twice_is_safe_and_leaves_disconnected() {
        let coordinator = test_coordinator();
        coordinator.stop().await;
        coordinator.stop().await;
        assert_eq!(coordinator.status().borrow().state, SessionState::Disconnected);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_inject_text_requires_connection() {
        let coordinator = test_coordinator();
        assert!(coordinator.inject_text("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_preconnect_fails_fast_against_closed_port() {
        let coordinator = test_coordinator();
        assert!(!coordinator.preconnect().await);
    }
}
