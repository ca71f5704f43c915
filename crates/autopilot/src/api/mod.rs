//! HTTP control surface
//!
//! Operator and peer endpoints for backend scheduling, node lifecycle and
//! the backup pool, plus health checks and Prometheus metrics.

mod error;
mod nodes;
mod scheduling;
mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};

use autopilot_lib::health::HealthRegistry;
use autopilot_lib::node_capacity::NodeCapacityController;
use autopilot_lib::pod_health::PodHealthRecorder;
use autopilot_lib::scheduler::BackendScheduler;
use autopilot_lib::supervisor::Supervisor;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health: HealthRegistry,
    pub supervisor: Arc<Supervisor>,
    pub node_capacity: Arc<NodeCapacityController>,
    pub scheduler: Arc<BackendScheduler>,
    pub pod_health: Arc<PodHealthRecorder>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(scheduling::ping))
        .route("/api/register_backend", post(scheduling::register_backend))
        .route("/api/delete_backend", post(scheduling::delete_backend))
        .route("/api/get_backends", get(scheduling::get_backends))
        .route("/api/test_latency", get(scheduling::test_latency))
        .route("/api/register_app", post(scheduling::register_app))
        .route("/api/delete_app", post(scheduling::delete_app))
        .route("/api/get_app_list", get(scheduling::get_app_list))
        .route("/api/change_deploy_env", post(scheduling::change_deploy_env))
        .route("/api/check_all_apps", get(scheduling::check_all_apps))
        .route("/api/get_pod_exception", get(status::pod_exceptions))
        .route("/api/targets", get(status::targets))
        .route("/add_node", post(nodes::add_node))
        .route("/delete_node", post(nodes::delete_node))
        .route(
            "/backup-nodes",
            get(nodes::list_backup_nodes)
                .post(nodes::add_backup_node)
                .delete(nodes::remove_backup_node),
        )
        .route("/healthz", get(status::healthz))
        .route("/readyz", get(status::readyz))
        .route("/metrics", get(status::metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
