//! Cluster autopilot - control plane for a Kubernetes cluster
//!
//! Runs the bandwidth autoscalers, node capacity controller, load shedder
//! and backend latency scheduler, and serves the HTTP control surface.

use anyhow::Result;
use autopilot::{api, app, config::AppConfig};
use autopilot_lib::health::HealthRegistry;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AUTOPILOT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = AppConfig::load()?;
    info!(
        instance = %config.instance,
        cluster_backend = config.cluster_backend.as_str(),
        store = config.store.label(),
        "Autopilot configured"
    );

    let health = HealthRegistry::new();
    health.register_all().await;

    let cluster = app::connect_cluster(&config).await?;
    let peers = app::connect_peers(&config).await?;
    let parts = app::Components::build(&config, cluster, peers, health.clone()).await?;
    parts
        .ctx
        .logger
        .log_startup(AUTOPILOT_VERSION, config.cluster_backend.as_str());
    app::probe_store(&parts).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let controller_handles = parts.spawn(&config, &shutdown_tx);

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, parts.app_state(), async move {
        let _ = api_shutdown.recv().await;
    }));

    health.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    parts.ctx.logger.log_shutdown("SIGINT received");
    health.set_ready(false).await;
    let _ = shutdown_tx.send(());

    for handle in controller_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Controller task ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with an error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
