//! In-process scenario tests for qw-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot`; no socket is bound.
//!
//! # Invariants under test
//! - `/v1/health` always answers 200 with the service name.
//! - `/v1/status` reports the boot config hash and thresholds.
//! - `/v1/status` reflects what the guardian published after its last tick.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use qw_broker::BrokerError;
use qw_daemon::{routes, state};
use qw_reconcile::{Engine, EngineSettings, Guardian};
use qw_schemas::QueueSnapshot;
use qw_testkit::{FakeBroker, MemStore, RecordingNotifier};
use std::time::Duration;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = serde_json::from_slice(&body).expect("body is not valid JSON");
    (status, json)
}

fn guardian(broker: Arc<FakeBroker>) -> Guardian {
    let engine = Engine::new(
        EngineSettings::new(10, 20),
        broker,
        Arc::new(MemStore::new()),
        Arc::new(RecordingNotifier::new()),
    )
    .unwrap();
    Guardian::new(
        engine,
        Duration::from_secs(60),
        Duration::from_secs(60),
        Duration::from_secs(600),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let st = Arc::new(state::AppState::detached("abc", 10, 20));
    let (status, json) = call(routes::build_router(st), "/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "qw-daemon");
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_config_before_first_tick() {
    let st = Arc::new(state::AppState::detached("deadbeef", 10, 20));
    let (status, json) = call(routes::build_router(st), "/v1/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["config_hash"], "deadbeef");
    assert_eq!(json["warn_threshold"], 10);
    assert_eq!(json["delete_threshold"], 20);
    assert_eq!(json["guardian"]["ticks_total"], 0);
    assert!(json["guardian"]["last_error"].is_null());
}

#[tokio::test]
async fn status_reflects_completed_tick() {
    let broker = Arc::new(FakeBroker::new());
    broker.put_queue(QueueSnapshot::new("queue/alice/jobs", 3));
    let mut g = guardian(Arc::clone(&broker));
    let st = Arc::new(state::AppState::new(g.status_handle(), "h", 10, 20));

    g.run_once().await;

    let (status, json) = call(routes::build_router(st), "/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["guardian"]["ticks_total"], 1);
    assert_eq!(json["guardian"]["failures_total"], 0);
    assert_eq!(json["guardian"]["last_report"]["observed"], 1);
}

#[tokio::test]
async fn status_reflects_connectivity_failure_and_backoff() {
    let broker = Arc::new(FakeBroker::new());
    broker.set_failure(Some(BrokerError::Transport("connection refused".to_string())));
    let mut g = guardian(Arc::clone(&broker));
    let st = Arc::new(state::AppState::new(g.status_handle(), "h", 10, 20));

    g.run_once().await;

    let (_, json) = call(routes::build_router(st), "/v1/status").await;
    assert_eq!(json["guardian"]["failures_total"], 1);
    assert_eq!(json["guardian"]["connectivity_failing"], true);
    assert_eq!(json["guardian"]["unknown_failing"], false);
    assert_eq!(json["guardian"]["interval_secs"], 120);
    assert_eq!(json["guardian"]["base_interval_secs"], 60);
    assert!(json["guardian"]["last_error"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}
