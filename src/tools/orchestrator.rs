//! Tool-call orchestration: dispatch, in-flight tracking, cancellation.
//!
//! One task per call; the receive loop is never blocked by a running
//! handler. Responses carry the originating call id so the remote side can
//! correlate them regardless of completion order.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::live::OutboundMessage;

use super::{ToolRegistry, error_result};

struct InflightCall {
    cancel: CancellationToken,
    started: Instant,
}

/// Dispatches server-issued tool calls against registered handlers.
pub struct ToolOrchestrator {
    registry: ToolRegistry,
    /// In-flight calls keyed by call id; at most one active task per id.
    /// Shared with the per-call tasks for self-deregistration.
    inflight: Arc<DashMap<String, InflightCall>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
}

impl ToolOrchestrator {
    /// Create an orchestrator sending responses through `outbound_tx`.
    pub fn new(registry: ToolRegistry, outbound_tx: mpsc::Sender<OutboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            inflight: Arc::new(DashMap::new()),
            outbound_tx,
        })
    }

    /// Declarations for the setup request.
    pub fn declarations(&self) -> Vec<crate::live::FunctionDeclaration> {
        self.registry.declarations()
    }

    /// Number of calls currently executing.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Dispatch one tool call.
    ///
    /// Unknown names answer immediately with an "unknown tool" result. A
    /// duplicate id while the original is still running is ignored.
    pub fn dispatch(&self, id: String, name: String, args: serde_json::Value) {
        if self.inflight.contains_key(&id) {
            tracing::warn!(call_id = %id, "duplicate tool call id ignored");
            return;
        }

        let Some(handler) = self.registry.get(&name) else {
            tracing::warn!(call_id = %id, tool = %name, "unknown tool requested");
            let outbound = self.outbound_tx.clone();
            tokio::spawn(async move {
                let _ = outbound
                    .send(OutboundMessage::ToolResponse {
                        call_id: id,
                        result: error_result(format!("unknown tool: {name}")),
                        name,
                    })
                    .await;
            });
            return;
        };

        let cancel = CancellationToken::new();
        self.inflight.insert(
            id.clone(),
            InflightCall {
                cancel: cancel.clone(),
                started: Instant::now(),
            },
        );

        tracing::debug!(call_id = %id, tool = %name, "tool call dispatched");
        let inflight = Arc::clone(&self.inflight);
        let outbound = self.outbound_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = handler.call(args, cancel.clone()) => Some(result),
            };

            match result {
                // Handlers check for cancellation before responding; the
                // orchestrator enforces it regardless.
                Some(result) if !cancel.is_cancelled() => {
                    let elapsed = inflight.get(&id).map(|call| call.started.elapsed());
                    tracing::debug!(call_id = %id, tool = %name, ?elapsed, "tool call finished");
                    let _ = outbound
                        .send(OutboundMessage::ToolResponse {
                            call_id: id.clone(),
                            name,
                            result,
                        })
                        .await;
                }
                _ => {
                    tracing::debug!(call_id = %id, tool = %name, "tool call cancelled, no response sent");
                }
            }

            inflight.remove(&id);
        });
    }

    /// Cancel in-flight calls by id. Ids with no matching task are no-ops.
    pub fn cancel(&self, ids: &[String]) {
        for id in ids {
            match self.inflight.remove(id) {
                Some((_, call)) => {
                    tracing::info!(call_id = %id, "cancelling tool call");
                    call.cancel.cancel();
                }
                None => {
                    tracing::debug!(call_id = %id, "cancellation for unknown call id ignored");
                }
            }
        }
    }

    /// Cancel every in-flight call. Used on session teardown.
    pub fn shutdown(&self) {
        for entry in self.inflight.iter() {
            entry.value().cancel.cancel();
        }
        self.inflight.clear();
    }
}
