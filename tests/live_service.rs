//! Integration tests against an in-process mock execution service: the real
//! HTTP stream transport, the REST client, and the registry wired together.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};

use athena_monitor::channel::HttpStreamTransport;
use athena_monitor::client::ExecutionApi;
use athena_monitor::model::ExecutionStatus;
use athena_monitor::registry::{ExecutionRegistry, MonitorUpdate};
use athena_monitor::source::StreamingSource;

#[derive(Default)]
struct MockService {
    snapshot_calls: AtomicUsize,
}

fn execution_json(id: i64, status: &str, with_results: bool) -> Value {
    let results = if with_results {
        json!([
            {
                "id": 1,
                "hostname": "web-01",
                "status": "success",
                "stdout": "Filesystem ...",
                "exit_code": 0,
                "ai_summary": "All filesystems healthy",
                "ai_resources": [
                    {"resource_name": "/dev/sda1", "status": "OK", "metric_value": "48%"}
                ]
            }
        ])
    } else {
        json!([])
    };
    json!({
        "id": id,
        "runbook_id": 7,
        "runbook_name": "nightly-health",
        "status": status,
        "started_at": "2026-08-23T04:00:00",
        "completed_at": if with_results { json!("2026-08-23T04:02:11") } else { Value::Null },
        "triggered_by": "manual",
        "results": results
    })
}

async fn get_execution(
    State(svc): State<Arc<MockService>>,
    Path(id): Path<i64>,
) -> Json<Value> {
    // Non-terminal for the first two fetches, success from the third on.
    let call = svc.snapshot_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call < 3 {
        Json(execution_json(id, "running", false))
    } else {
        Json(execution_json(id, "success", true))
    }
}

async fn list_executions(Query(params): Query<std::collections::HashMap<String, String>>) -> Json<Value> {
    assert!(params.contains_key("limit"));
    Json(json!([
        execution_json(42, "success", false),
        execution_json(41, "failed", false)
    ]))
}

async fn trigger_runbook(Path(runbook_id): Path<i64>) -> Json<Value> {
    Json(json!({
        "id": 42,
        "runbook_id": runbook_id,
        "runbook_name": "nightly-health",
        "status": "pending",
        "started_at": "2026-08-23T04:00:00",
        "completed_at": null,
        "triggered_by": "manual"
    }))
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

/// Progress stream. Execution 99 simulates a connection that drops before
/// any terminal event; every other id gets SSE noise, one malformed frame,
/// and a clean run ending in `complete`.
async fn stream_events(
    Path(id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = if id == 99 {
        vec![
            Event::default().data(r#"{"type":"step","message":"Connecting..."}"#),
            Event::default().data(r#"{"type":"step","message":"Running commands..."}"#),
        ]
    } else {
        vec![
            Event::default().comment("keep-alive"),
            Event::default().data(r#"{"type":"step","message":"Connecting..."}"#),
            Event::default().data("definitely not json"),
            Event::default()
                .data(r#"{"type":"step","message":"Running commands...","node":"web-01"}"#),
            Event::default().data(r#"{"type":"complete","message":"Done"}"#),
        ]
    };
    Sse::new(futures::stream::iter(events.into_iter().map(Ok)))
}

async fn spawn_service() -> (SocketAddr, Arc<MockService>) {
    let svc = Arc::new(MockService::default());
    let app = Router::new()
        .route("/executions/{id}", get(get_execution))
        .route("/executions", get(list_executions))
        .route("/runbooks/{id}/execute", post(trigger_runbook))
        .route("/health", get(health))
        .route("/execute/{id}/stream", get(stream_events))
        .with_state(svc.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, svc)
}

async fn wait_for_update(
    updates: &mut tokio::sync::broadcast::Receiver<MonitorUpdate>,
    mut done: impl FnMut(&MonitorUpdate) -> bool,
) {
    loop {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("timed out waiting for monitor update")
            .expect("update stream closed early");
        if done(&update) {
            return;
        }
    }
}

#[tokio::test]
async fn test_http_stream_to_completion() {
    let (addr, _svc) = spawn_service().await;
    let base = format!("http://{}", addr);

    let transport = HttpStreamTransport::new(&base).unwrap();
    let registry = ExecutionRegistry::new(Arc::new(StreamingSource::new(Arc::new(transport))));

    let mut updates = registry.subscribe();
    let handle = registry.start_monitoring(42);

    wait_for_update(&mut updates, |u| {
        matches!(u, MonitorUpdate::Completed { execution_id: 42 })
    })
    .await;

    let snap = handle.snapshot();
    // The malformed frame and the SSE comment contributed nothing.
    assert_eq!(snap.steps.len(), 3);
    assert!(snap.is_complete);
    assert_eq!(snap.steps[1].node.as_deref(), Some("web-01"));
    assert!(!registry.is_active(42));
}

#[tokio::test]
async fn test_http_stream_drop_surfaces_connection_lost() {
    let (addr, _svc) = spawn_service().await;
    let base = format!("http://{}", addr);

    let transport = HttpStreamTransport::new(&base).unwrap();
    let registry = ExecutionRegistry::new(Arc::new(StreamingSource::new(Arc::new(transport))));

    let mut updates = registry.subscribe();
    let handle = registry.start_monitoring(99);

    wait_for_update(&mut updates, |u| {
        matches!(u, MonitorUpdate::ConnectionLost { execution_id: 99, .. })
    })
    .await;

    let snap = handle.snapshot();
    assert_eq!(snap.steps.len(), 2);
    assert!(!snap.is_complete);
    assert!(snap.last_error.is_some());
}

#[tokio::test]
async fn test_api_client_round_trip() {
    let (addr, svc) = spawn_service().await;
    let base = format!("http://{}", addr);
    let api = ExecutionApi::new(&base, Duration::from_secs(5)).unwrap();

    assert!(api.health().await);

    let triggered = api.trigger_runbook(7).await.unwrap();
    assert_eq!(triggered.id, 42);
    assert_eq!(triggered.status, ExecutionStatus::Pending);

    let listed = api.list_executions(20).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, 42);
    assert_eq!(listed[1].status, ExecutionStatus::Failed);

    // First two snapshot fetches read running, the third is terminal with
    // the stored per-node results.
    let first = api.get_execution(42).await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Running);
    let _second = api.get_execution(42).await.unwrap();
    let third = api.get_execution(42).await.unwrap();
    assert_eq!(third.status, ExecutionStatus::Success);
    assert_eq!(third.results.len(), 1);
    assert_eq!(third.results[0].hostname, "web-01");
    assert_eq!(third.results[0].ai_resources.len(), 1);
    assert_eq!(svc.snapshot_calls.load(Ordering::SeqCst), 3);
}
