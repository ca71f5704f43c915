//! Backend fleet and application registration handlers

use super::error::{ApiError, ApiResult};
use super::AppState;
use autopilot_lib::models::{AppRegistration, BackendPeer};
use autopilot_lib::scheduler::{LatencyTable, RegisterAppRequest, ScheduleReport};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// Outcome of a membership or registration change
#[derive(Debug, Serialize)]
pub struct ChangeResponse {
    pub status: &'static str,
    pub changed: bool,
}

impl ChangeResponse {
    fn new(changed: bool) -> Self {
        Self {
            status: "success",
            changed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteAppRequest {
    pub app_name: String,
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeEnvRequest {
    pub app_name: String,
    pub namespace: String,
    pub url_key: String,
    pub backend: String,
}

pub async fn ping() -> &'static str {
    "pong"
}

fn require_ip(peer: &BackendPeer) -> ApiResult<&str> {
    let ip = peer.ip.trim();
    if ip.is_empty() {
        return Err(ApiError::BadRequest("ip must not be empty".to_string()));
    }
    Ok(ip)
}

pub async fn register_backend(
    State(state): State<AppState>,
    Json(peer): Json<BackendPeer>,
) -> ApiResult<Json<ChangeResponse>> {
    let added = state.scheduler.register_backend(require_ip(&peer)?).await?;
    Ok(Json(ChangeResponse::new(added)))
}

pub async fn delete_backend(
    State(state): State<AppState>,
    Json(peer): Json<BackendPeer>,
) -> ApiResult<Json<ChangeResponse>> {
    let removed = state.scheduler.delete_backend(require_ip(&peer)?).await?;
    Ok(Json(ChangeResponse::new(removed)))
}

pub async fn get_backends(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.scheduler.backends().await?))
}

/// Probe every peer once and return the sample table
pub async fn test_latency(State(state): State<AppState>) -> ApiResult<Json<LatencyTable>> {
    Ok(Json(state.scheduler.test_latency().await?))
}

pub async fn register_app(
    State(state): State<AppState>,
    Json(request): Json<RegisterAppRequest>,
) -> ApiResult<(StatusCode, Json<AppRegistration>)> {
    let registration = state.scheduler.register_app(request).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn delete_app(
    State(state): State<AppState>,
    Json(request): Json<DeleteAppRequest>,
) -> ApiResult<Json<ChangeResponse>> {
    if state
        .scheduler
        .delete_app(&request.app_name, &request.namespace)
        .await?
    {
        Ok(Json(ChangeResponse::new(true)))
    } else {
        Err(ApiError::NotFound(format!(
            "app {}/{} not found",
            request.namespace, request.app_name
        )))
    }
}

pub async fn get_app_list(State(state): State<AppState>) -> ApiResult<Json<Vec<AppRegistration>>> {
    Ok(Json(state.scheduler.apps().await?))
}

pub async fn change_deploy_env(
    State(state): State<AppState>,
    Json(request): Json<ChangeEnvRequest>,
) -> ApiResult<Json<ChangeResponse>> {
    let updated = state
        .scheduler
        .change_deploy_env(
            &request.app_name,
            &request.namespace,
            &request.url_key,
            &request.backend,
        )
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!(
            "no container of {}/{} declares {}",
            request.namespace, request.app_name, request.url_key
        )));
    }
    Ok(Json(ChangeResponse::new(true)))
}

/// Force one scheduler reconcile
pub async fn check_all_apps(State(state): State<AppState>) -> ApiResult<Json<ScheduleReport>> {
    Ok(Json(state.scheduler.reconcile().await?))
}
