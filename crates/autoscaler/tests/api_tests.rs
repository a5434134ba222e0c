//! Integration tests for the autoscaler API endpoints

use autoscaler_lib::{
    cooldown::ACTIVITY_KEY,
    health::{components, HealthRegistry},
    sources::{ActivityStore, InMemoryActivityStore, InMemoryPool, StaticTelemetry},
    ControlLoopBuilder, InstanceState, ScalingConfig,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use worker_autoscaler::api::{create_router, AppState};

const POOL: &str = "judge0-worker";

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    pool: Arc<InMemoryPool>,
    telemetry: Arc<StaticTelemetry>,
    store: Arc<InMemoryActivityStore>,
}

fn setup_test_app(running: u32, stopped: u32, queue_depth: u64) -> TestApp {
    let pool = Arc::new(InMemoryPool::new());
    for ordinal in 1..=running {
        pool.insert(POOL, ordinal, InstanceState::Running);
    }
    for ordinal in 1..=stopped {
        pool.insert(POOL, running + ordinal, InstanceState::StoppedOrTerminated);
    }
    let telemetry = Arc::new(StaticTelemetry::new(queue_depth, queue_depth));
    let store = Arc::new(InMemoryActivityStore::new());

    let scaler = ControlLoopBuilder::new()
        .config(ScalingConfig::default())
        .pool(POOL)
        .queue("1.13.1")
        .telemetry(telemetry.clone())
        .inspector(pool.clone())
        .provider(pool.clone())
        .activity_store(store.clone())
        .health(HealthRegistry::with_components())
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(Arc::new(scaler)));
    TestApp {
        router: create_router(state.clone()),
        state,
        pool,
        telemetry,
        store,
    }
}

async fn send(router: Router, method: &str, uri: &str, body: Body) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_status_reports_pool_without_side_effects() {
    let app = setup_test_app(0, 2, 12);

    let (status, body) = send(app.router, "GET", "/api/scaling", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentWorkers"]["running"], 0);
    assert_eq!(body["currentWorkers"]["stopped"], 2);
    assert_eq!(body["scalingDecision"]["action"], "scale_up");
    assert_eq!(body["scalingDecision"]["targetReplicas"], 2);
    assert_eq!(body["workerStats"][0]["queueSize"], 12);
    assert_eq!(body["config"]["maxWorkers"], 2);
    assert_eq!(body["cooldownStatus"]["inCooldown"], false);
    assert!(body["timestamp"].is_string());

    assert!(app.pool.calls().is_empty());
}

#[tokio::test]
async fn test_trigger_scales_up() {
    let app = setup_test_app(0, 2, 12);

    let (status, body) = send(app.router, "POST", "/api/scaling", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forced"], false);
    assert_eq!(body["action"], "scale_up");
    assert_eq!(body["target"], 2);
    assert_eq!(body["outcome"]["type"], "executed");
    assert_eq!(body["updatedInfo"]["currentWorkers"]["running"], 2);

    assert_eq!(
        app.pool.state_of("judge0-worker-1"),
        Some(InstanceState::Running)
    );
    assert!(app.store.get(ACTIVITY_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_trigger_scale_down_blocked_by_cooldown() {
    let app = setup_test_app(2, 0, 0);
    let recent = Utc::now().timestamp_millis() - 180_000;
    app.store
        .set_with_ttl(ACTIVITY_KEY, recent, Duration::from_secs(360))
        .await
        .unwrap();

    let (status, body) = send(app.router, "POST", "/api/scaling", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "scale_down");
    assert_eq!(body["outcome"]["type"], "blocked");
    let remaining = body["outcome"]["remainingCooldownSeconds"].as_u64().unwrap();
    assert!((119..=120).contains(&remaining));
    assert!(app.pool.calls().is_empty());
}

#[tokio::test]
async fn test_forced_trigger_bypasses_cooldown() {
    let app = setup_test_app(2, 0, 0);
    app.store
        .set_with_ttl(
            ACTIVITY_KEY,
            Utc::now().timestamp_millis(),
            Duration::from_secs(360),
        )
        .await
        .unwrap();

    let (status, body) = send(
        app.router,
        "POST",
        "/api/scaling",
        Body::from(r#"{"force": true}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forced"], true);
    assert_eq!(body["action"], "scale_down");
    assert_eq!(body["target"], 0);
    assert_eq!(body["outcome"]["type"], "executed");
    assert_eq!(body["updatedInfo"]["currentWorkers"]["running"], 0);
}

#[tokio::test]
async fn test_unparsable_body_is_not_forced() {
    let app = setup_test_app(2, 0, 0);
    app.store
        .set_with_ttl(
            ACTIVITY_KEY,
            Utc::now().timestamp_millis(),
            Duration::from_secs(360),
        )
        .await
        .unwrap();

    let (status, body) = send(app.router, "POST", "/api/scaling", Body::from("force")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forced"], false);
    assert_eq!(body["outcome"]["type"], "blocked");
}

#[tokio::test]
async fn test_trigger_no_action() {
    let app = setup_test_app(1, 1, 3);

    let (status, body) = send(app.router, "POST", "/api/scaling", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "no_action");
    assert_eq!(body["target"], 1);
    assert_eq!(body["outcome"]["type"], "no_action");
    assert_eq!(body["message"], "No scaling action needed");
}

#[tokio::test]
async fn test_other_methods_are_rejected() {
    let app = setup_test_app(0, 0, 0);

    let (status, body) = send(app.router, "DELETE", "/api/scaling", Body::empty()).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "Method not allowed");
}

#[tokio::test]
async fn test_telemetry_failure_returns_500() {
    let app = setup_test_app(1, 0, 0);
    app.telemetry.set_failing(true);

    let (status, body) = send(app.router.clone(), "GET", "/api/scaling", Body::empty()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(body["message"].is_string());
    assert!(body["timestamp"].is_string());

    let (status, _) = send(app.router, "POST", "/api/scaling", Body::empty()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.pool.calls().is_empty());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app(0, 0, 0);

    let (status, health) = send(app.router, "GET", "/healthz", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"][components::TELEMETRY].is_object());
    assert!(health["components"][components::PROVIDER].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app(0, 0, 0);
    app.state
        .health_registry
        .record_failure(components::TELEMETRY, "LLEN request failed");

    let (status, health) = send(app.router, "GET", "/healthz", Body::empty()).await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_after_repeated_failures() {
    let app = setup_test_app(0, 0, 0);
    for _ in 0..3 {
        app.state
            .health_registry
            .record_failure(components::POOL_INSPECTOR, "listing failed");
    }

    let (status, health) = send(app.router, "GET", "/healthz", Body::empty()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_readiness() {
    let app = setup_test_app(0, 0, 0);

    let (status, readiness) = send(app.router.clone(), "GET", "/readyz", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true);
    let (status, readiness) = send(app.router, "GET", "/readyz", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app(0, 2, 12);

    let (status, _) = send(app.router.clone(), "POST", "/api/scaling", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("worker_autoscaler_cycle_latency_seconds_bucket"));
    assert!(metrics_text.contains("worker_autoscaler_decisions_total"));
    assert!(metrics_text.contains("worker_autoscaler_queue_depth"));
}
