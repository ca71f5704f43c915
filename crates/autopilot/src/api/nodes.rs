//! Node lifecycle and backup pool handlers

use super::error::{ApiError, ApiResult};
use super::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Deserialize)]
pub struct NodeRequest {
    pub ip: String,
}

impl NodeRequest {
    fn address(&self) -> ApiResult<String> {
        self.ip
            .trim()
            .parse::<IpAddr>()
            .map(|addr| addr.to_string())
            .map_err(|_| ApiError::BadRequest(format!("{:?} is not an IP address", self.ip)))
    }
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub ip: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BackupNodesResponse {
    pub nodes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupChangeResponse {
    pub ip: String,
    pub changed: bool,
    pub nodes: Vec<String>,
}

pub async fn add_node(
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<Json<NodeResponse>> {
    let ip = request.address()?;
    state.node_capacity.add_node(&ip).await?;
    Ok(Json(NodeResponse {
        ip,
        status: "joined",
    }))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<Json<NodeResponse>> {
    let ip = request.address()?;
    state.node_capacity.delete_node(&ip).await?;
    Ok(Json(NodeResponse {
        ip,
        status: "removed",
    }))
}

pub async fn list_backup_nodes(State(state): State<AppState>) -> ApiResult<Json<BackupNodesResponse>> {
    let nodes = state.node_capacity.backup_store().list().await?;
    Ok(Json(BackupNodesResponse { nodes }))
}

pub async fn add_backup_node(
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<Json<BackupChangeResponse>> {
    let ip = request.address()?;
    let store = state.node_capacity.backup_store();
    let changed = store.add(&ip).await?;
    Ok(Json(BackupChangeResponse {
        ip,
        changed,
        nodes: store.list().await?,
    }))
}

pub async fn remove_backup_node(
    State(state): State<AppState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<Json<BackupChangeResponse>> {
    let ip = request.address()?;
    let store = state.node_capacity.backup_store();
    let changed = store.remove(&ip).await?;
    Ok(Json(BackupChangeResponse {
        ip,
        changed,
        nodes: store.list().await?,
    }))
}
