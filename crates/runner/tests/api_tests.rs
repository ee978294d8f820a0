//! Integration tests for the runner's health and metrics endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use burst_runner::api::{create_router, AppState};
use experiment_lib::{
    driver::DriverState,
    health::{components, HealthRegistry},
    observability::ExperimentMetrics,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    setup_with_plan(0).await
}

async fn setup_with_plan(planned_bursts: usize) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::EXECUTOR).await;
    health_registry.register(components::CLUSTER).await;

    let metrics = ExperimentMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics).with_planned_bursts(planned_bursts));
    let router = create_router(state.clone());

    (router, state)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["phase"], "idle");
    assert!(health["components"]["sampler"].is_object());
    assert!(health["components"]["executor"].is_object());
    assert!(health["components"]["cluster"].is_object());
}

#[tokio::test]
async fn test_healthz_stays_ok_when_executor_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::EXECUTOR, "burst 2: every endpoint failed")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["executor"]["message"],
        "burst 2: every endpoint failed"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_cluster_unreachable() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::CLUSTER, "connection refused")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_not_ready_before_experiment_starts() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "experiment not started");
}

#[tokio::test]
async fn test_readyz_ready_while_sampling_and_loading() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_phase(DriverState::SamplingAndLoading)
        .await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
    assert_eq!(readiness["phase"], "sampling_and_loading");
}

#[tokio::test]
async fn test_readyz_not_ready_once_finalized() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_phase(DriverState::Finalized).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["reason"], "experiment finalized");
}

#[tokio::test]
async fn test_readyz_returns_503_when_running_but_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_phase(DriverState::SamplingAndLoading)
        .await;
    state
        .health_registry
        .set_unhealthy(components::SAMPLER, "sampler task stopped")
        .await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["reason"], "critical component unhealthy");
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_tick_latency(0.2);
    state.metrics.inc_snapshots();
    state.metrics.add_probes(6, 1);
    state.metrics.add_load("home", 300, 2);
    state.metrics.set_target_rate(42.0);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("burstlab_sampler_tick_seconds_bucket"));
    assert!(metrics_text.contains("burstlab_snapshots_captured_total"));
    assert!(metrics_text.contains("burstlab_probes_total"));
    assert!(metrics_text.contains("burstlab_load_requests_total{endpoint=\"home\"}"));
    assert!(metrics_text.contains("burstlab_target_rate"));
}

#[tokio::test]
async fn test_status_reports_phase_and_plan_size() {
    let (app, state) = setup_with_plan(5).await;
    state
        .health_registry
        .set_phase(DriverState::SamplingAndLoading)
        .await;
    state.metrics.set_target_rate(42.0);

    let (status, body) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "sampling_and_loading");
    assert_eq!(body["ready"], true);
    assert_eq!(body["finalized"], false);
    assert_eq!(body["planned_bursts"], 5);
    assert_eq!(body["target_rate"], 42.0);
    assert!(body["bursts_completed"].is_u64());
    assert!(body.get("reason").is_none());
}

#[tokio::test]
async fn test_status_stays_ok_after_finalize() {
    let (app, state) = setup_with_plan(3).await;
    state.health_registry.set_phase(DriverState::Finalized).await;

    let (status, body) = get_json(app, "/status").await;

    // Unlike /readyz, a finished run is not an error
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["finalized"], true);
    assert_eq!(body["ready"], false);
    assert_eq!(body["reason"], "experiment finalized");
}
