//! Runner HTTP API
//!
//! Served for the lifetime of one experiment. The driver moves through
//! `idle -> sampling_and_loading -> draining -> finalized`; every route
//! reports against that phase model:
//!
//! - `/healthz`: component health, 503 once any component is unhealthy
//! - `/readyz`: ready only while sampling and loading with no unhealthy component
//! - `/status`: phase, readiness and burst progress in one document
//! - `/metrics`: Prometheus text exposition of the `burstlab_*` metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use experiment_lib::{
    driver::DriverState,
    health::{ComponentStatus, HealthRegistry},
    observability::ExperimentMetrics,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// State shared by the API handlers and the driver
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ExperimentMetrics,
    /// Bursts in the plan, reported by `/status`
    pub planned_bursts: usize,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: ExperimentMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            planned_bursts: 0,
        }
    }

    pub fn with_planned_bursts(mut self, planned_bursts: usize) -> Self {
        self.planned_bursts = planned_bursts;
        self
    }
}

/// Body of `/status`
#[derive(Debug, Serialize)]
pub struct RunStatus {
    pub phase: DriverState,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub finalized: bool,
    pub bursts_completed: u64,
    pub planned_bursts: usize,
    /// Aggregate rate of the burst in progress; 0 during pauses
    pub target_rate: f64,
}

/// JSON body with 200 when `ok`, 503 otherwise
fn json_status<T: Serialize>(ok: bool, body: T) -> Response {
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

/// Degraded components (a failed telemetry read, an unreachable burst) do
/// not fail the probe; the run is still producing data.
async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;
    json_status(health.status != ComponentStatus::Unhealthy, health)
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    json_status(readiness.ready, readiness)
}

/// Always 200: a finished or not-yet-started run is a valid status
async fn status(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    let body = RunStatus {
        finalized: readiness.phase == DriverState::Finalized,
        phase: readiness.phase,
        ready: readiness.ready,
        reason: readiness.reason,
        bursts_completed: state.metrics.bursts_completed(),
        planned_bursts: state.planned_bursts,
        target_rate: state.metrics.target_rate(),
    };
    json_status(true, body)
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")];
    match state.metrics.encode_text() {
        Ok(buffer) => (StatusCode::OK, content_type, buffer).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, content_type, Vec::new()).into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind `0.0.0.0:<port>` and serve until the task is aborted
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, planned_bursts = state.planned_bursts, "Runner API listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
