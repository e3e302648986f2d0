//! Live session protocol client.
//!
//! Owns the WebSocket transport and drives the connect → setup → ready
//! lifecycle: the setup handshake, keepalive pings, inbound record
//! classification, and the reconnection/resumption machinery.
//!
//! Three failure paths converge on one recovery routine: a server-initiated
//! close while the session is live, a terminal socket error in the receive
//! loop, and a `goAway` record. Exactly one recovery may run at a time; a
//! client-initiated disconnect never triggers recovery.
//!
//! Consumers receive classified [`InboundEvent`]s over a channel handed out
//! by [`LiveClient::new`]; the client itself is deliberately unaware of who
//! is listening.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::errors::LiveError;

use super::config::{CONNECT_TIMEOUT_SECS, KEEPALIVE_INTERVAL_SECS, LiveConfig, WS_CHANNEL_CAPACITY};
use super::events::{InboundEvent, OutboundMessage, SessionState, classify_frame};
use super::messages::{
    ClientMessage, Content, GenerationConfig, Part, PrebuiltVoiceConfig, ServerFrame,
    SessionResumption, Setup, SpeechConfig, ToolSet, TranscriptionConfig, VoiceConfig,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Commands routed through the outbound sender task.
#[derive(Debug)]
enum WsCommand {
    /// Serialize and send a wire message
    Message(ClientMessage),
    /// Transport-level keepalive ping
    Ping,
    /// Close the transport and end the sender loop
    Close,
}

/// Why the recovery routine was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryReason {
    /// Server announced deliberate termination
    GoAway,
    /// Terminal socket error
    TransportError,
    /// Transport closed while the session was live
    ServerClose,
}

/// Severity classification for receive-loop errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorClass {
    /// Restart the receive loop, keep the connection
    Transient,
    /// The connection is dead, run recovery
    Terminal,
}

/// Classify a WebSocket error as transient or terminal.
///
/// Socket-level failures (reset, aborted, not-connected, timed-out) mean the
/// connection is gone; protocol or capacity hiccups only restart the read.
pub(crate) fn classify_ws_error(error: &tungstenite::Error) -> ErrorClass {
    use std::io::ErrorKind;
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ErrorClass::Terminal
        }
        tungstenite::Error::Io(io) => match io.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ErrorClass::Terminal,
            _ => ErrorClass::Transient,
        },
        _ => ErrorClass::Transient,
    }
}

/// Handles for the per-connection tasks.
struct TransportTasks {
    receiver: JoinHandle<()>,
    // The sender task is not aborted: dropping the command channel lets it
    // drain a queued close frame and exit on its own.
    _sender: JoinHandle<()>,
}

/// Live session protocol client.
///
/// All session-state mutation happens on the client's own tasks (receive
/// loop and recovery supervisor); consumers interact through `connect`,
/// `disconnect`, `send`, and the event channel.
pub struct LiveClient {
    config: LiveConfig,
    /// Self-handle for spawning tasks from `&self` methods
    weak_self: Weak<LiveClient>,

    /// Protocol state machine; owned exclusively by this client
    state: RwLock<SessionState>,
    /// Fast readiness flag shared with the spawned tasks
    connected: AtomicBool,
    /// Set by `disconnect()`; suppresses every recovery path
    intentional_disconnect: AtomicBool,
    /// Single-flight guard: at most one recovery runs at a time
    is_reconnecting: AtomicBool,
    /// Transport generation. Callbacks from a replaced transport compare
    /// against this and are ignored.
    epoch: AtomicU64,

    /// Server-issued resumption handle for the current logical session
    resumption: RwLock<Option<String>>,

    /// Outbound command queue for the current transport
    ws_sender: Mutex<Option<mpsc::Sender<WsCommand>>>,
    /// Resolver for the in-flight `connect()` attempt, tagged with the
    /// attempt's transport generation
    pending_setup: Mutex<Option<(u64, oneshot::Sender<bool>)>>,
    /// Per-connection task handles
    transport_tasks: Mutex<Option<TransportTasks>>,
    /// Keepalive task handle
    keepalive: Mutex<Option<JoinHandle<()>>>,

    /// Classified events delivered to the consumer
    events_tx: mpsc::Sender<InboundEvent>,
    /// Recovery triggers funneled to the supervisor task
    recovery_tx: mpsc::UnboundedSender<RecoveryReason>,
}

impl LiveClient {
    /// Create a client and the channel its classified events arrive on.
    pub fn new(config: LiveConfig) -> (Arc<Self>, mpsc::Receiver<InboundEvent>) {
        let (events_tx, events_rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();

        let client = Arc::new_cyclic(|weak| Self {
            config,
            weak_self: weak.clone(),
            state: RwLock::new(SessionState::Disconnected),
            connected: AtomicBool::new(false),
            intentional_disconnect: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            resumption: RwLock::new(None),
            ws_sender: Mutex::new(None),
            pending_setup: Mutex::new(None),
            transport_tasks: Mutex::new(None),
            keepalive: Mutex::new(None),
            events_tx,
            recovery_tx,
        });

        client.spawn_recovery_task(recovery_rx);
        (client, events_rx)
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.weak_self.upgrade()
    }

    /// Current protocol state.
    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Whether the session is `Ready`.
    pub fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Resumption handle for the current logical session, if any.
    pub async fn resumption_handle(&self) -> Option<String> {
        self.resumption.read().await.clone()
    }

    /// Connect and run the setup handshake.
    ///
    /// Resolves `true` once the server confirms setup, `false` if the
    /// attempt fails or the 15 s timeout elapses. Only one attempt may be
    /// outstanding: a new call resolves any stale pending attempt as failed
    /// before proceeding.
    pub async fn connect(&self) -> bool {
        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.connect_attempt().await
    }

    /// Close the session. Never triggers auto-reconnect.
    pub async fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        if let Some((_, pending)) = self.pending_setup.lock().await.take() {
            let _ = pending.send(false);
        }
        let _ = self.send_command(WsCommand::Close).await;
        self.teardown_transport().await;
        self.connected.store(false, Ordering::SeqCst);
        *self.resumption.write().await = None;
        self.set_state(SessionState::Disconnected).await;
        tracing::info!("disconnected");
    }

    /// Queue an outbound message. Messages are serialized and sent one at a
    /// time in submission order.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), LiveError> {
        let wire = match message {
            OutboundMessage::AudioChunk(bytes) => ClientMessage::audio_chunk(&bytes),
            OutboundMessage::VideoFrame(bytes) => ClientMessage::video_frame(&bytes),
            OutboundMessage::ToolResponse {
                call_id,
                name,
                result,
            } => ClientMessage::tool_response(&call_id, &name, result),
            OutboundMessage::ContextText(text) => ClientMessage::context_text(&text),
        };
        self.send_command(WsCommand::Message(wire)).await
    }

    /// Start (or restart) the keepalive ping task.
    ///
    /// Runs automatically when setup completes; exposed so the coordinator
    /// can suspend pings during silent tool execution and resume afterward.
    pub async fn start_keepalive(&self) {
        let Some(client) = self.strong() else { return };
        let mut guard = self.keepalive.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if !client.connected.load(Ordering::SeqCst) {
                    break;
                }
                if client.send_command(WsCommand::Ping).await.is_err() {
                    tracing::warn!("keepalive ping could not be queued");
                    break;
                }
                tracing::trace!("keepalive ping sent");
            }
        }));
    }

    /// Stop the keepalive ping task.
    pub async fn stop_keepalive(&self) {
        if let Some(task) = self.keepalive.lock().await.take() {
            task.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn set_state(&self, next: SessionState) {
        let mut guard = self.state.write().await;
        if *guard != next {
            tracing::debug!(from = %*guard, to = %next, "session state transition");
            *guard = next;
        }
    }

    /// Remove the pending resolver iff it still belongs to `epoch`.
    async fn clear_pending_for(&self, epoch: u64) {
        let mut guard = self.pending_setup.lock().await;
        if matches!(*guard, Some((pending_epoch, _)) if pending_epoch == epoch) {
            guard.take();
        }
    }

    /// One connect attempt, shared by `connect()` and the recovery routine.
    async fn connect_attempt(&self) -> bool {
        // Only one attempt may be outstanding: resolve any stale pending
        // result as failed before proceeding.
        if let Some((_, stale)) = self.pending_setup.lock().await.take() {
            let _ = stale.send(false);
        }
        self.set_state(SessionState::Connecting).await;

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        *self.pending_setup.lock().await = Some((epoch, tx));

        let attempt = async {
            if let Err(e) = self.open_transport(epoch).await {
                tracing::warn!(error = %e, "failed to open transport");
                self.set_state(SessionState::Error(e.to_string())).await;
                return false;
            }
            rx.await.unwrap_or(false)
        };

        match tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), attempt).await {
            Ok(ready) => {
                if !ready {
                    self.clear_pending_for(epoch).await;
                }
                ready
            }
            Err(_) => {
                tracing::warn!("setup did not complete within {CONNECT_TIMEOUT_SECS}s");
                self.set_state(SessionState::Error("setup timed out".to_string()))
                    .await;
                self.clear_pending_for(epoch).await;
                false
            }
        }
    }

    /// Open the WebSocket, spawn the per-connection tasks, send setup.
    async fn open_transport(&self, epoch: u64) -> Result<(), LiveError> {
        let client = self.strong().ok_or(LiveError::NotConnected)?;
        let url = self.config.endpoint_url();
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;
        tracing::info!("transport open");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel::<WsCommand>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let sender = tokio::spawn(sender_loop(
            sink,
            rx,
            self.recovery_tx.clone(),
            Arc::clone(&client),
        ));
        let receiver = tokio::spawn(client.receive_loop(stream, epoch));
        *self.transport_tasks.lock().await = Some(TransportTasks {
            receiver,
            _sender: sender,
        });

        let setup = self.build_setup().await;
        self.send_command(WsCommand::Message(ClientMessage::Setup(setup)))
            .await?;
        self.set_state(SessionState::SettingUp).await;
        Ok(())
    }

    /// Build the setup request, attaching the resumption handle when held.
    async fn build_setup(&self) -> Setup {
        let handle = self.resumption.read().await.clone();
        Setup {
            model: self.config.model_path(),
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                temperature: self.config.temperature,
                speech_config: self.config.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: Some(VoiceConfig {
                        prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        }),
                    }),
                }),
            }),
            system_instruction: self.config.system_prompt.as_ref().map(|prompt| Content {
                role: Some("system".to_string()),
                parts: vec![Part {
                    text: Some(prompt.clone()),
                    inline_data: None,
                }],
            }),
            realtime_input_config: None,
            tools: if self.config.tools.is_empty() {
                None
            } else {
                Some(vec![ToolSet {
                    function_declarations: self.config.tools.clone(),
                }])
            },
            session_resumption: Some(SessionResumption { handle }),
            input_audio_transcription: Some(TranscriptionConfig {}),
            output_audio_transcription: Some(TranscriptionConfig {}),
        }
    }

    async fn send_command(&self, command: WsCommand) -> Result<(), LiveError> {
        let tx = {
            let guard = self.ws_sender.lock().await;
            guard.as_ref().cloned()
        };
        match tx {
            Some(tx) => tx.send(command).await.map_err(|_| LiveError::NotConnected),
            None => Err(LiveError::NotConnected),
        }
    }

    /// Receive loop for one transport connection.
    async fn receive_loop(self: Arc<Self>, mut stream: WsStream, epoch: u64) {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => self.handle_record(text.as_str(), epoch).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_record(text, epoch).await,
                    Err(_) => tracing::warn!("dropped non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "transport closed by server");
                    self.on_transport_down(RecoveryReason::ServerClose, epoch).await;
                    break;
                }
                Some(Ok(_)) => {} // ping/pong are answered by the library
                Some(Err(e)) => match classify_ws_error(&e) {
                    ErrorClass::Transient => {
                        tracing::warn!(error = %e, "transient receive error, continuing");
                    }
                    ErrorClass::Terminal => {
                        tracing::error!(error = %e, "terminal receive error");
                        self.set_state(SessionState::Error(e.to_string())).await;
                        self.on_transport_down(RecoveryReason::TransportError, epoch)
                            .await;
                        break;
                    }
                },
                None => {
                    tracing::info!("transport stream ended");
                    self.on_transport_down(RecoveryReason::ServerClose, epoch).await;
                    break;
                }
            }
        }
        tracing::debug!("receive loop ended");
    }

    /// Parse, classify, bookkeep, and forward one inbound record.
    async fn handle_record(&self, text: &str, epoch: u64) {
        // Records from a transport that has since been replaced are stale.
        if epoch != self.epoch.load(Ordering::SeqCst) {
            tracing::debug!("record from a replaced transport dropped");
            return;
        }

        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable server record");
                let _ = self.events_tx.send(InboundEvent::Unrecognized).await;
                return;
            }
        };

        for event in classify_frame(frame) {
            let is_go_away = matches!(event, InboundEvent::GoAway);
            match &event {
                InboundEvent::SetupComplete => {
                    self.connected.store(true, Ordering::SeqCst);
                    self.set_state(SessionState::Ready).await;
                    if let Some((_, pending)) = self.pending_setup.lock().await.take() {
                        let _ = pending.send(true);
                    }
                    self.start_keepalive().await;
                    tracing::info!("session ready");
                }
                InboundEvent::ResumptionUpdate(handle) => {
                    *self.resumption.write().await = Some(handle.clone());
                    tracing::debug!("resumption handle refreshed");
                }
                _ => {}
            }

            if self.events_tx.send(event).await.is_err() {
                tracing::debug!("event receiver dropped");
                return;
            }

            // Trigger recovery only after the event is forwarded: the
            // recovery teardown replaces this receive loop.
            if is_go_away {
                tracing::warn!("server sent goAway");
                let _ = self.recovery_tx.send(RecoveryReason::GoAway);
            }
        }
    }

    /// Bookkeeping shared by every transport-loss path.
    async fn on_transport_down(&self, reason: RecoveryReason, epoch: u64) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            tracing::debug!(?reason, "loss of a replaced transport ignored");
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        if let Some((_, pending)) = self.pending_setup.lock().await.take() {
            let _ = pending.send(false);
        }
        if self.intentional_disconnect.load(Ordering::SeqCst) {
            return;
        }
        let was_live = matches!(
            *self.state.read().await,
            SessionState::Ready | SessionState::SettingUp | SessionState::Error(_)
        );
        if was_live {
            let _ = self.recovery_tx.send(reason);
        }
    }

    /// Supervisor task: funnels every recovery trigger through one routine.
    fn spawn_recovery_task(&self, mut rx: mpsc::UnboundedReceiver<RecoveryReason>) {
        let Some(client) = self.strong() else { return };
        tokio::spawn(async move {
            while let Some(reason) = rx.recv().await {
                if client.intentional_disconnect.load(Ordering::SeqCst) {
                    continue;
                }
                if client.is_reconnecting.swap(true, Ordering::SeqCst) {
                    tracing::debug!(?reason, "recovery already running, trigger ignored");
                    continue;
                }
                tracing::warn!(?reason, "connection lost, starting recovery");
                client.run_recovery().await;
                // Triggers raised while we were recovering describe the
                // connection we already replaced.
                while rx.try_recv().is_ok() {}
                client.is_reconnecting.store(false, Ordering::SeqCst);
            }
        });
    }

    /// The recovery routine: tear down, wait, reconnect (with resumption).
    async fn run_recovery(&self) {
        self.set_state(SessionState::Connecting).await;
        self.teardown_transport().await;

        let policy = self.config.reconnect.clone();
        let mut attempt = 0u32;
        while policy.should_retry(attempt) {
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(policy.delay_ms)).await;
            if self.intentional_disconnect.load(Ordering::SeqCst) {
                tracing::info!("disconnect requested during recovery");
                return;
            }
            tracing::info!(attempt, max = policy.max_attempts, "reconnecting");
            if self.connect_attempt().await {
                tracing::info!("session recovered");
                return;
            }
            // A reconnection that did not use the handle successfully
            // invalidates it; later attempts start fresh.
            *self.resumption.write().await = None;
            self.teardown_transport().await;
        }

        tracing::error!("reconnection attempts exhausted");
        *self.resumption.write().await = None;
        self.set_state(SessionState::Disconnected).await;
    }

    async fn teardown_transport(&self) {
        self.stop_keepalive().await;
        *self.ws_sender.lock().await = None;
        if let Some(tasks) = self.transport_tasks.lock().await.take() {
            tasks.receiver.abort();
        }
    }
}

/// Outbound sender loop for one transport connection.
///
/// Serializes commands one at a time in submission order. A sink failure is
/// treated like any other terminal transport error unless the disconnect was
/// client-initiated.
async fn sender_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<WsCommand>,
    recovery_tx: mpsc::UnboundedSender<RecoveryReason>,
    client: Arc<LiveClient>,
) {
    while let Some(command) = rx.recv().await {
        let closing = matches!(command, WsCommand::Close);
        let result = match command {
            WsCommand::Message(message) => match serde_json::to_string(&message) {
                Ok(json) => sink.send(Message::Text(json.into())).await,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            },
            WsCommand::Ping => sink.send(Message::Ping(Vec::new().into())).await,
            WsCommand::Close => sink.send(Message::Close(None)).await,
        };

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to send on transport");
            if !client.intentional_disconnect.load(Ordering::SeqCst) {
                let _ = recovery_tx.send(RecoveryReason::TransportError);
            }
            break;
        }
        if closing {
            break;
        }
    }
    tracing::debug!("sender loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LiveConfig {
        LiveConfig {
            api_key: "test-key".to_string(),
            model: "gemini-2.0-flash-live-001".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_client_starts_disconnected() {
        let (client, _events) = LiveClient::new(test_config());
        assert_eq!(client.state().await, SessionState::Disconnected);
        assert!(!client.is_ready());
        assert!(client.resumption_handle().await.is_none());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (client, _events) = LiveClient::new(test_config());
        let result = client
            .send(OutboundMessage::AudioChunk(bytes::Bytes::from_static(
                &[0u8; 4],
            )))
            .await;
        assert!(matches!(result, Err(LiveError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_resolves_false() {
        let config = LiveConfig {
            // Nothing listens on this port; the attempt fails fast.
            endpoint: Some("ws://127.0.0.1:1".to_string()),
            reconnect: super::super::config::ReconnectPolicy {
                max_attempts: 0,
                delay_ms: 1,
            },
            ..test_config()
        };
        let (client, _events) = LiveClient::new(config);
        assert!(!client.connect().await);
        assert!(matches!(client.state().await, SessionState::Error(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, _events) = LiveClient::new(test_config());
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state().await, SessionState::Disconnected);
    }

    #[test]
    fn test_classify_terminal_io_errors() {
        use std::io::{Error as IoError, ErrorKind};
        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::NotConnected,
            ErrorKind::TimedOut,
            ErrorKind::BrokenPipe,
        ] {
            let err = tungstenite::Error::Io(IoError::new(kind, "boom"));
            assert_eq!(classify_ws_error(&err), ErrorClass::Terminal, "{kind:?}");
        }
    }

    #[test]
    fn test_classify_transient_errors() {
        let err = tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "interrupted",
        ));
        assert_eq!(classify_ws_error(&err), ErrorClass::Transient);

        let err = tungstenite::Error::Capacity(tungstenite::error::CapacityError::MessageTooLong {
            size: 10,
            max_size: 1,
        });
        assert_eq!(classify_ws_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_closed_is_terminal() {
        assert_eq!(
            classify_ws_error(&tungstenite::Error::ConnectionClosed),
            ErrorClass::Terminal
        );
    }
}
