//! Component wiring
//!
//! Builds every controller from the configuration and spawns the enabled
//! ones onto the runtime.

use crate::api::AppState;
use crate::config::{AppConfig, ClusterBackend};
use anyhow::{Context, Result};
use autopilot_lib::cluster::{ClusterAccessor, CommandProvisioner, KubeCluster, SimulatedCluster};
use autopilot_lib::context::ControlContext;
use autopilot_lib::health::{components, HealthRegistry};
use autopilot_lib::load_shedder::LoadShedder;
use autopilot_lib::node_capacity::{BackupNodeStore, NodeCapacityController};
use autopilot_lib::peer::{HttpPeerClient, PeerClient};
use autopilot_lib::pod_health::PodHealthRecorder;
use autopilot_lib::scheduler::BackendScheduler;
use autopilot_lib::store::SchedulingStore;
use autopilot_lib::supervisor::Supervisor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Every long-lived component of the control plane
pub struct Components {
    pub ctx: ControlContext,
    pub supervisor: Arc<Supervisor>,
    pub node_capacity: Arc<NodeCapacityController>,
    pub load_shedder: Arc<LoadShedder>,
    pub scheduler: Arc<BackendScheduler>,
    pub pod_health: Arc<PodHealthRecorder>,
}

impl Components {
    /// Build components on top of an already constructed cluster and peer client
    pub async fn build(
        config: &AppConfig,
        cluster: Arc<dyn ClusterAccessor>,
        peers: Arc<dyn PeerClient>,
        health: HealthRegistry,
    ) -> Result<Self> {
        let ctx = ControlContext::new(cluster.clone(), config.instance.clone()).with_health(health);

        let store = SchedulingStore::bootstrap(config.store.clone())
            .await
            .context("failed to open scheduling store")?;
        info!(backend = store.backend_label(), "Scheduling store ready");

        let backup = Arc::new(BackupNodeStore::new(
            cluster.clone(),
            config.node_capacity.backup_namespace.clone(),
            config.node_capacity.backup_config_name.clone(),
        ));

        Ok(Self {
            supervisor: Arc::new(Supervisor::new(config.supervisor_config(), ctx.clone())),
            node_capacity: Arc::new(NodeCapacityController::new(
                config.node_capacity_config(),
                ctx.clone(),
                backup,
            )),
            load_shedder: Arc::new(LoadShedder::new(config.load_shedder_config(), ctx.clone())),
            scheduler: Arc::new(BackendScheduler::new(
                config.scheduler_config(),
                ctx.clone(),
                store,
                peers,
            )),
            pod_health: Arc::new(PodHealthRecorder::new(
                cluster,
                config.pod_health_interval(),
                ctx.metrics.clone(),
                ctx.health.clone(),
            )),
            ctx,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            health: self.ctx.health.clone(),
            supervisor: self.supervisor.clone(),
            node_capacity: self.node_capacity.clone(),
            scheduler: self.scheduler.clone(),
            pod_health: self.pod_health.clone(),
        }
    }

    /// Spawn the supervisor, pod-health recorder and every enabled controller
    pub fn spawn(&self, config: &AppConfig, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            tokio::spawn(self.supervisor.clone().run(shutdown.subscribe())),
            tokio::spawn(self.pod_health.clone().run(shutdown.subscribe())),
        ];

        if config.node_capacity.enabled {
            handles.push(tokio::spawn(
                self.node_capacity.clone().run(shutdown.subscribe()),
            ));
        } else {
            info!("Node capacity controller disabled");
        }

        if config.load_shedder.enabled {
            handles.push(tokio::spawn(
                self.load_shedder.clone().run(shutdown.subscribe()),
            ));
        } else {
            info!("Load shedder disabled");
        }

        if config.scheduler.enabled {
            handles.push(tokio::spawn(self.scheduler.clone().run(shutdown.subscribe())));
        } else {
            info!("Backend scheduler disabled");
        }

        handles
    }
}

/// Connect to the configured orchestrator
pub async fn connect_cluster(config: &AppConfig) -> Result<Arc<dyn ClusterAccessor>> {
    match config.cluster_backend {
        ClusterBackend::Kube => {
            let provisioner = Arc::new(CommandProvisioner::new(config.provisioner_config()));
            let cluster = KubeCluster::connect(provisioner)
                .await
                .context("failed to connect to the Kubernetes API")?;
            Ok(Arc::new(cluster))
        }
        ClusterBackend::Simulated => {
            warn!("Running against a simulated cluster; no real workloads are touched");
            Ok(Arc::new(SimulatedCluster::new()))
        }
    }
}

/// HTTP client for peer backends, carrying the kubeconfig when one is readable
pub async fn connect_peers(config: &AppConfig) -> Result<Arc<dyn PeerClient>> {
    let mut client = HttpPeerClient::new(config.peer_client_config())?;
    if let Some(path) = &config.kubeconfig_path {
        match tokio::fs::read_to_string(path).await {
            Ok(kubeconfig) => client = client.with_kubeconfig(&kubeconfig),
            Err(e) => warn!(path = %path, error = %e, "Kubeconfig unreadable; peer deletes go unauthenticated"),
        }
    }
    Ok(Arc::new(client))
}

/// Check the store once so a broken database shows up on /healthz
pub async fn probe_store(parts: &Components) {
    let outcome = parts.scheduler.store().ping().await;
    parts.ctx.health.report(components::STORE, &outcome).await;
}
