//! Health, metrics and read-only control-plane state

use super::error::{ApiError, ApiResult};
use super::AppState;
use autopilot_lib::health::ComponentStatus;
use autopilot_lib::models::PodException;
use autopilot_lib::supervisor::TargetSummary;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};

/// 200 while operational, 503 once any component is unhealthy
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

pub async fn metrics() -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

pub async fn pod_exceptions(State(state): State<AppState>) -> Json<Vec<PodException>> {
    Json(state.pod_health.exceptions())
}

pub async fn targets(State(state): State<AppState>) -> Json<Vec<TargetSummary>> {
    Json(state.supervisor.targets().await)
}
