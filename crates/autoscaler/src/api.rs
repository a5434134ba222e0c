//! HTTP API: scaling status and trigger, health checks and Prometheus metrics

use autoscaler_lib::{
    health::{ComponentStatus, HealthRegistry},
    ControlLoop, CycleOutcome, CycleReport, ScalerError, ScalingConfig, ScalingInfo,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scaler: Arc<ControlLoop>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(scaler: Arc<ControlLoop>) -> Self {
        let health_registry = scaler.health().clone();
        Self {
            scaler,
            health_registry,
        }
    }
}

/// Body of `GET /api/scaling`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(flatten)]
    pub info: ScalingInfo,
    pub config: ScalingConfig,
    pub timestamp: DateTime<Utc>,
}

/// Optional body of `POST /api/scaling`
#[derive(Debug, Default, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub force: bool,
}

impl TriggerRequest {
    /// Anything that is not a valid request body means "not forced"
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Body of `POST /api/scaling`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub message: String,
    pub forced: bool,
    pub action: String,
    pub target: u32,
    pub reason: String,
    pub outcome: CycleOutcome,
    pub timestamp: DateTime<Utc>,
    pub updated_info: Option<ScalingInfo>,
}

impl TriggerResponse {
    fn from_report(report: CycleReport, updated_info: Option<ScalingInfo>) -> Self {
        let message = match &report.outcome {
            CycleOutcome::NoAction => "No scaling action needed".to_string(),
            CycleOutcome::Executed { .. } if report.forced => "Forced scaling executed".to_string(),
            CycleOutcome::Executed { .. } => "Scaling executed".to_string(),
            CycleOutcome::Blocked {
                remaining_cooldown_seconds,
            } => format!(
                "Scale down blocked by cooldown ({}s remaining)",
                remaining_cooldown_seconds
            ),
        };

        Self {
            message,
            forced: report.forced,
            action: report.decision.action.to_string(),
            target: report.decision.target_replicas,
            reason: report.decision.reason,
            outcome: report.outcome,
            timestamp: report.timestamp,
            updated_info,
        }
    }
}

/// Failure of a scaling request, rendered as a 500 JSON body
pub struct ApiError(ScalerError);

impl From<ScalerError> for ApiError {
    fn from(e: ScalerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Scaling request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "message": self.0.to_string(),
                "timestamp": Utc::now(),
            })),
        )
            .into_response()
    }
}

/// Current pool state and decision, without side effects
async fn scaling_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let info = state.scaler.status().await?;
    Ok(Json(StatusResponse {
        info,
        config: state.scaler.config().clone(),
        timestamp: Utc::now(),
    }))
}

/// Run one scaling check now
async fn trigger_scaling(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<TriggerResponse>, ApiError> {
    let request = TriggerRequest::parse(&body);
    info!(forced = request.force, "Manual scaling check requested");

    let report = state.scaler.check(request.force).await?;

    let updated_info = match state.scaler.status().await {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "Failed to read pool state after scaling check");
            None
        }
    };

    Ok(Json(TriggerResponse::from_report(report, updated_info)))
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "Method not allowed",
            "message": "Use GET for status or POST to trigger a scaling check",
            "timestamp": Utc::now(),
        })),
    )
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/scaling",
            get(scaling_status)
                .post(trigger_scaling)
                .fallback(method_not_allowed),
        )
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
