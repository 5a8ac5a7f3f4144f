//! End-to-end tests for the Intravert pipeline engine.
//!
//! Each test goes through the full path: envelope -> decode -> dispatch ->
//! sequencing -> aggregated reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use intravert_pipeline::{
    default_catalog, EngineConfig, HandlerRegistry, MemoryStore, OperationHandler, OperationStep,
    PipelineEvent, PipelineExecutor, PipelineResponse, RawStep, RequestEnvelope,
};
use intravert_types::{IntravertError, Result, SharedState, StepReply};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Sleeps for the step's `ms` parameter, then records that it ran.
struct SlowHandler {
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl OperationHandler for SlowHandler {
    fn operation_type(&self) -> &str {
        "slow"
    }

    async fn handle(
        &self,
        step: &OperationStep,
        state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        let ms = step.param_i64("ms")? as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        state.set("slept", json!(ms));
        Ok(StepReply::value(json!(ms)))
    }
}

struct PanicHandler;

#[async_trait]
impl OperationHandler for PanicHandler {
    fn operation_type(&self) -> &str {
        "explode"
    }

    async fn handle(
        &self,
        _step: &OperationStep,
        _state: &mut SharedState,
        _registry: &HandlerRegistry,
    ) -> Result<StepReply> {
        panic!("handler blew up");
    }
}

fn executor() -> PipelineExecutor {
    PipelineExecutor::with_default_catalog(EngineConfig::default()).expect("catalog should build")
}

/// Default catalog plus the `slow` and `explode` test handlers.
fn executor_with_slow() -> (PipelineExecutor, Arc<AtomicUsize>) {
    let finished = Arc::new(AtomicUsize::new(0));
    let config = EngineConfig::default();
    let mut registry =
        default_catalog(MemoryStore::new(&config.system_keyspaces)).expect("catalog should build");
    registry
        .register(SlowHandler {
            finished: finished.clone(),
        })
        .unwrap();
    registry.register(PanicHandler).unwrap();
    (PipelineExecutor::new(registry, config), finished)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Basic request shapes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_step_reply_is_keyed_by_step_id() {
    let response = executor()
        .execute_json(r#"{"e":[{"type":"setkeyspace","op":{"keyspace":"app1"}}]}"#)
        .await
        .unwrap();
    assert!(response.is_completed());
    assert_eq!(
        response.to_json(),
        json!({"0": "OK", "state": {"components": ["name", "value"], "currentKeyspace": "app1"}})
    );
}

#[tokio::test]
async fn later_steps_observe_earlier_state_writes() {
    let executor = executor();
    executor
        .execute(RequestEnvelope::new(vec![
            RawStep::new("createkeyspace").param("keyspace", json!("app1")),
        ]))
        .await
        .unwrap();

    let response = executor
        .execute_json(
            r#"{"e":[
                {"type":"setkeyspace","op":{"keyspace":"app1"}},
                {"type":"listkeyspaces","op":{}}
            ]}"#,
        )
        .await
        .unwrap();
    let body = response.to_json();
    assert_eq!(body["0"], json!("OK"));
    assert_eq!(body["1"], json!(["app1"]));
    assert_eq!(body["state"]["currentKeyspace"], json!("app1"));
}

#[tokio::test]
async fn write_then_read_round_trip_through_one_request() {
    let response = executor()
        .execute(RequestEnvelope::new(vec![
            RawStep::new("createkeyspace").param("keyspace", json!("shop")),
            RawStep::new("setkeyspace").param("keyspace", json!("shop")),
            RawStep::new("createcolumnfamily").param("name", json!("carts")),
            RawStep::new("setcolumnfamily").param("columnfamily", json!("carts")),
            RawStep::new("batchset").param(
                "rows",
                json!([
                    {"rowkey": "u1", "name": "apples", "value": 3},
                    {"rowkey": "u1", "name": "pears", "value": 1}
                ]),
            ),
            RawStep::new("componentselect").param("components", json!(["name", "value"])),
            RawStep::new("slice")
                .param("rowkey", json!("u1"))
                .param("start", json!("a"))
                .param("end", json!("z")),
            RawStep::new("get")
                .param("rowkey", json!("u1"))
                .param("name", json!("pears")),
        ]))
        .await
        .unwrap();

    assert!(response.is_completed(), "unexpected response: {response:?}");
    let body = response.to_json();
    for id in 0..6 {
        assert_eq!(body[id.to_string()], json!("OK"), "step {id}");
    }
    assert_eq!(
        body["6"],
        json!([{"name": "apples", "value": 3}, {"name": "pears", "value": 1}])
    );
    assert_eq!(body["7"], json!([{"name": "pears", "value": 1}]));
}

#[tokio::test]
async fn type_names_are_case_insensitive() {
    let response = executor()
        .execute(RequestEnvelope::new(vec![
            RawStep::new("SetKeyspace").param("keyspace", json!("k")),
        ]))
        .await
        .unwrap();
    assert!(response.is_completed());
}

// ---------------------------------------------------------------------------
// Rejections and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_envelope_is_malformed() {
    let err = executor().execute_json(r#"{"e":[]}"#).await.unwrap_err();
    assert!(matches!(err, IntravertError::MalformedRequest(_)));
}

#[tokio::test]
async fn untyped_first_step_is_malformed() {
    let err = executor()
        .execute_json(r#"{"e":[{"op":{"keyspace":"x"}}]}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, IntravertError::MalformedRequest(_)));
}

#[tokio::test]
async fn unknown_type_mid_request_aborts_remaining_steps() {
    let executor = executor();
    let mut events = executor.subscribe();
    let response = executor
        .execute_json(
            r#"{"e":[
                {"type":"setkeyspace","op":{"keyspace":"a"}},
                {"type":"nosuchop","op":{}},
                {"type":"setkeyspace","op":{"keyspace":"b"}}
            ]}"#,
        )
        .await
        .unwrap();

    match &response {
        PipelineResponse::Failed { failed_step, reply } => {
            assert_eq!(*failed_step, 1);
            assert!(reply.get(2).is_none());
            assert_eq!(reply.state.current_keyspace(), Some("a"));
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    let body = response.to_json();
    assert_eq!(body["0"], json!("OK"));
    assert_eq!(body["1"]["kind"], json!("UnknownOperationType"));
    assert_eq!(body["exceptionId"], json!(1));

    let dispatched = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, PipelineEvent::StepDispatched { .. }))
        .count();
    assert_eq!(dispatched, 2, "step 2 must never be dispatched");
}

#[tokio::test]
async fn non_string_type_mid_request_fails_only_that_step() {
    let response = executor()
        .execute_json(
            r#"{"e":[
                {"type":"setkeyspace","op":{"keyspace":"a"}},
                {"type":5},
                {"type":"listkeyspaces","op":{}}
            ]}"#,
        )
        .await
        .expect("a bad later type is not a malformed request");

    assert!(matches!(response, PipelineResponse::Failed { failed_step: 1, .. }));
    let body = response.to_json();
    assert_eq!(body["0"], json!("OK"));
    assert_eq!(body["1"]["kind"], json!("UnknownOperationType"));
    assert!(body.get("2").is_none());
    assert_eq!(body["exceptionId"], json!(1));
}

#[tokio::test]
async fn handler_error_becomes_step_error_marker() {
    let response = executor()
        .execute(RequestEnvelope::new(vec![
            RawStep::new("consistency").param("level", json!("SOMETIMES")),
        ]))
        .await
        .unwrap();
    let body = response.to_json();
    assert_eq!(body["0"]["kind"], json!("HandlerFailure"));
    assert!(body["0"]["exception"].as_str().unwrap().contains("level"));
    assert_eq!(body["exceptionId"], json!(0));
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_before_reply_times_out() {
    let (executor, finished) = executor_with_slow();
    let response = executor
        .execute(RequestEnvelope::new(vec![
            RawStep::new("slow").param("ms", json!(500)).timeout_ms(50),
        ]))
        .await
        .unwrap();

    assert_eq!(
        response,
        PipelineResponse::TimedOut {
            timeout_ms: 50,
            pending_step: Some(0),
        }
    );
    assert_eq!(
        response.to_json(),
        json!({"exception": "request timed out after 50ms", "exceptionId": 0})
    );
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn reply_before_deadline_completes_and_timer_never_fires() {
    let (executor, _) = executor_with_slow();
    let mut events = executor.subscribe();
    let response = executor
        .execute(RequestEnvelope::new(vec![
            RawStep::new("slow").param("ms", json!(10)).timeout_ms(100),
            RawStep::new("slow").param("ms", json!(10)),
        ]))
        .await
        .unwrap();
    assert!(response.is_completed());
    assert_eq!(response.to_json()["1"], json!(10));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let timed_out = drain(&mut events)
        .iter()
        .any(|e| matches!(e, PipelineEvent::RequestTimedOut { .. }));
    assert!(!timed_out);
}

#[tokio::test(start_paused = true)]
async fn late_reply_after_timeout_is_dropped() {
    let (executor, finished) = executor_with_slow();
    let mut events = executor.subscribe();
    let response = executor
        .execute(RequestEnvelope::new(vec![
            RawStep::new("slow").param("ms", json!(200)).timeout_ms(50),
            RawStep::new("setkeyspace").param("keyspace", json!("never")),
        ]))
        .await
        .unwrap();
    assert!(response.is_timed_out());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1, "handler still runs to completion");
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::ReplyDropped { step: 0, reason, .. } if reason == "request terminated"
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::StepDispatched { step: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_resolves_as_timeout() {
    let (executor, _) = executor_with_slow();
    let response = executor
        .execute(RequestEnvelope::new(vec![RawStep::new("explode").timeout_ms(30)]))
        .await
        .unwrap();
    assert!(response.is_timed_out());
}

#[tokio::test(start_paused = true)]
async fn declared_timeout_is_capped() {
    let config = EngineConfig {
        max_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let finished = Arc::new(AtomicUsize::new(0));
    let mut registry = HandlerRegistry::new();
    registry
        .register(SlowHandler {
            finished: finished.clone(),
        })
        .unwrap();
    let executor = PipelineExecutor::new(registry, config);

    let response = executor
        .execute(RequestEnvelope::new(vec![
            RawStep::new("slow").param("ms", json!(5_000)).timeout_ms(60_000),
        ]))
        .await
        .unwrap();
    assert!(matches!(
        response,
        PipelineResponse::TimedOut { timeout_ms: 100, .. }
    ));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_separate_state() {
    let executor = Arc::new(executor());
    let mut tasks = Vec::new();
    for i in 0..32 {
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            let ks = format!("ks{i}");
            let response = executor
                .execute(RequestEnvelope::new(vec![
                    RawStep::new("setkeyspace").param("keyspace", json!(ks.clone())),
                    RawStep::new("consistency").param("level", json!("QUORUM")),
                ]))
                .await
                .unwrap();
            (ks, response)
        }));
    }

    for task in tasks {
        let (ks, response) = task.await.unwrap();
        let reply = response.reply().expect("completed request has a reply");
        assert_eq!(reply.state.current_keyspace(), Some(ks.as_str()));
        assert_eq!(reply.state.get("consistency"), Some(&Value::from("QUORUM")));
    }
}

#[tokio::test]
async fn every_request_gets_exactly_one_response() {
    let executor = executor();
    let pending: Vec<_> = (0..10)
        .map(|i| {
            executor
                .submit(RequestEnvelope::new(vec![
                    RawStep::new("setkeyspace").param("keyspace", json!(i)),
                ]))
                .unwrap()
        })
        .collect();

    let mut ids = std::collections::HashSet::new();
    for p in pending {
        assert!(ids.insert(p.request_id()));
        let response = p.wait().await.unwrap();
        // A numeric keyspace is not a string, so every request fails at step 0.
        assert!(matches!(response, PipelineResponse::Failed { failed_step: 0, .. }));
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_events_follow_the_request() {
    let executor = executor();
    let mut rx = executor.subscribe();
    let pending = executor
        .submit(RequestEnvelope::new(vec![
            RawStep::new("autotimestamp"),
            RawStep::new("listkeyspaces"),
        ]))
        .unwrap();
    let request_id = pending.request_id().to_string();
    pending.wait().await.unwrap();

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.request_id() == request_id));
    assert!(matches!(
        events.first(),
        Some(PipelineEvent::RequestAccepted { steps: 2, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RequestCompleted { steps: 2, .. })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::StepCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}
