//! Orchestrator scenarios: concurrent calls, cancellation, response
//! correlation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicepay_agent::live::{FunctionDeclaration, OutboundMessage};
use voicepay_agent::tools::orchestrator::ToolOrchestrator;
use voicepay_agent::tools::{ToolHandler, ToolRegistry};

/// Sleeps for a per-call duration taken from the arguments.
struct TimedTool;

#[async_trait]
impl ToolHandler for TimedTool {
    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: "timed".to_string(),
            description: "Sleep for args.ms milliseconds".to_string(),
            parameters: None,
        }
    }

    async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> serde_json::Value {
        let ms = args.get("ms").and_then(serde_json::Value::as_u64).unwrap_or(1);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        serde_json::json!({ "status": "ok", "slept_ms": ms })
    }
}

fn build() -> (Arc<ToolOrchestrator>, mpsc::Receiver<OutboundMessage>) {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(TimedTool));
    let (tx, rx) = mpsc::channel(16);
    (ToolOrchestrator::new(registry, tx), rx)
}

fn call_id(message: &OutboundMessage) -> String {
    match message {
        OutboundMessage::ToolResponse { call_id, .. } => call_id.clone(),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_same_tool_concurrent_ids_execute_independently() {
    let (orchestrator, mut rx) = build();

    // Same tool name, different ids, launched together.
    orchestrator.dispatch("slow".into(), "timed".into(), serde_json::json!({"ms": 150}));
    orchestrator.dispatch("fast".into(), "timed".into(), serde_json::json!({"ms": 10}));

    // Responses carry the originating id, so completion order is the
    // handlers' own: fast first, slow second.
    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call_id(&first), "fast");

    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call_id(&second), "slow");
}

#[tokio::test]
async fn test_cancelling_one_id_leaves_the_other_running() {
    let (orchestrator, mut rx) = build();

    orchestrator.dispatch("a".into(), "timed".into(), serde_json::json!({"ms": 200}));
    orchestrator.dispatch("b".into(), "timed".into(), serde_json::json!({"ms": 200}));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.inflight_count(), 2);

    orchestrator.cancel(&["a".to_string()]);

    let survivor = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call_id(&survivor), "b");

    // The cancelled call never answers.
    let nothing = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_cancellation_without_matching_task_is_a_noop() {
    let (orchestrator, mut rx) = build();

    orchestrator.cancel(&["ghost".to_string()]);
    assert_eq!(orchestrator.inflight_count(), 0);

    // The orchestrator still works afterwards.
    orchestrator.dispatch("c".into(), "timed".into(), serde_json::json!({"ms": 1}));
    let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call_id(&response), "c");
}

#[tokio::test]
async fn test_teardown_cancels_every_inflight_call() {
    let (orchestrator, mut rx) = build();

    for i in 0..4 {
        orchestrator.dispatch(
            format!("call-{i}"),
            "timed".to_string(),
            serde_json::json!({"ms": 500}),
        );
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.inflight_count(), 4);

    orchestrator.shutdown();
    assert_eq!(orchestrator.inflight_count(), 0);

    let nothing = tokio::time::timeout(Duration::from_millis(700), rx.recv()).await;
    assert!(nothing.is_err(), "no responses may follow a teardown");
}
