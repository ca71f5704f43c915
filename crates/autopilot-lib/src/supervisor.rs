//! Control-loop supervisor
//!
//! Periodically discovers annotated deployments and keeps exactly one
//! autoscaler loop running per target. Loops for targets that disappear are
//! cancelled between cycles.

use crate::autoscaler::{AutoscalerConfig, BandwidthAutoscaler};
use crate::cluster::WorkloadKind;
use crate::context::ControlContext;
use crate::error::ClusterResult;
use crate::health::components;
use crate::models::{target_key, ScaleEvent, ANNOTATION_NETWORK_HPA};
use crate::observability::controllers;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const SYSTEM_NAMESPACE_PREFIX: &str = "kube-";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub discovery_interval: Duration,
    /// Delay before the next pass after a failed discovery
    pub discovery_retry_interval: Duration,
    /// Restrict discovery to one namespace; `None` scans all of them
    pub watch_namespace: Option<String>,
    pub autoscaler: AutoscalerConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(300),
            discovery_retry_interval: Duration::from_secs(60),
            watch_namespace: None,
            autoscaler: AutoscalerConfig::default(),
        }
    }
}

/// A deployment eligible for bandwidth autoscaling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredTarget {
    pub namespace: String,
    pub deployment: String,
}

impl DiscoveredTarget {
    pub fn key(&self) -> String {
        target_key(&self.namespace, &self.deployment)
    }
}

/// Changes applied by one sync pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub started: Vec<String>,
    pub cancelled: Vec<String>,
}

/// Supervised target as served by the control surface
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub key: String,
    pub namespace: String,
    pub deployment: String,
    pub history: Vec<ScaleEvent>,
}

struct LoopHandle {
    scaler: Arc<BandwidthAutoscaler>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    ctx: ControlContext,
    loops: DashMap<String, LoopHandle>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, ctx: ControlContext) -> Self {
        Self {
            config,
            ctx,
            loops: DashMap::new(),
        }
    }

    /// Deployments carrying the bandwidth annotation outside system namespaces
    pub async fn discover_targets(&self) -> ClusterResult<Vec<DiscoveredTarget>> {
        let workloads = self
            .ctx
            .cluster
            .list_workloads(WorkloadKind::Deployment, self.config.watch_namespace.as_deref())
            .await?;

        let targets: BTreeSet<DiscoveredTarget> = workloads
            .into_iter()
            .filter(|w| !w.namespace.starts_with(SYSTEM_NAMESPACE_PREFIX))
            .filter(|w| w.annotations.contains_key(ANNOTATION_NETWORK_HPA))
            .map(|w| DiscoveredTarget {
                namespace: w.namespace,
                deployment: w.name,
            })
            .collect();

        Ok(targets.into_iter().collect())
    }

    /// Start loops for new targets and cancel loops for vanished ones
    pub async fn sync_targets(&self) -> ClusterResult<SyncReport> {
        let started_at = Instant::now();
        let discovered = self.discover_targets().await?;
        let wanted: BTreeSet<String> = discovered.iter().map(DiscoveredTarget::key).collect();
        let mut report = SyncReport::default();

        let stale: Vec<String> = self
            .loops
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| !wanted.contains(key))
            .collect();
        for key in stale {
            if let Some((_, handle)) = self.loops.remove(&key) {
                let _ = handle.cancel.send(true);
                self.ctx.logger.log_loop_cancelled(&key);
                report.cancelled.push(key);
            }
        }

        for target in discovered {
            let key = target.key();
            if self.loops.contains_key(&key) {
                continue;
            }
            let scaler = Arc::new(BandwidthAutoscaler::new(
                target.deployment,
                target.namespace,
                self.config.autoscaler.clone(),
                self.ctx.clone(),
            ));
            let (cancel, cancel_rx) = watch::channel(false);
            let task = tokio::spawn(scaler.clone().run(cancel_rx));
            self.loops.insert(
                key.clone(),
                LoopHandle {
                    scaler,
                    cancel,
                    task,
                },
            );
            self.ctx.logger.log_loop_started(&key);
            report.started.push(key);
        }

        self.ctx.metrics.set_supervised_targets(self.loops.len() as i64);
        self.ctx
            .metrics
            .observe_reconcile(controllers::SUPERVISOR, started_at.elapsed().as_secs_f64());
        debug!(
            started = report.started.len(),
            cancelled = report.cancelled.len(),
            "Target sync complete"
        );
        Ok(report)
    }

    /// Keys of the targets with a live loop, sorted
    pub fn target_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub async fn targets(&self) -> Vec<TargetSummary> {
        let mut scalers: Vec<Arc<BandwidthAutoscaler>> = self
            .loops
            .iter()
            .map(|entry| entry.value().scaler.clone())
            .collect();
        scalers.sort_by_key(|s| s.key());

        let mut summaries = Vec::with_capacity(scalers.len());
        for scaler in scalers {
            summaries.push(TargetSummary {
                key: scaler.key(),
                namespace: scaler.namespace().to_string(),
                deployment: scaler.deployment().to_string(),
                history: scaler.history().await,
            });
        }
        summaries
    }

    /// Signal every loop to stop and wait for in-flight cycles to finish
    pub async fn cancel_all(&self) {
        let keys: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::new();
        for key in keys {
            if let Some((_, handle)) = self.loops.remove(&key) {
                let _ = handle.cancel.send(true);
                self.ctx.logger.log_loop_cancelled(&key);
                tasks.push(handle.task);
            }
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Autoscaler loop ended abnormally");
            }
        }
        self.ctx.metrics.set_supervised_targets(0);
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.discovery_interval.as_secs(),
            namespace = self.config.watch_namespace.as_deref().unwrap_or("all"),
            "Starting control-loop supervisor"
        );

        let mut next_pass = Instant::now();

        loop {
            tokio::select! {
                _ = sleep_until(next_pass) => {
                    let outcome = self.sync_targets().await.map(|_| ());
                    let delay = match &outcome {
                        Ok(()) => self.config.discovery_interval,
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_secs = self.config.discovery_retry_interval.as_secs(),
                                "Target discovery failed"
                            );
                            self.config.discovery_retry_interval
                        }
                    };
                    self.ctx.health.report(components::SUPERVISOR, &outcome).await;
                    next_pass = Instant::now() + delay;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control-loop supervisor");
                    self.cancel_all().await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SimulatedCluster;
    use crate::models::{ANNOTATION_MAX_REPLICAS, ANNOTATION_MIN_REPLICAS};

    fn annotated(cluster: &SimulatedCluster, ns: &str, name: &str) {
        cluster.add_workload(SimulatedCluster::workload(
            WorkloadKind::Deployment,
            ns,
            name,
            Some(1),
            &[
                (ANNOTATION_NETWORK_HPA, "100"),
                (ANNOTATION_MIN_REPLICAS, "1"),
                (ANNOTATION_MAX_REPLICAS, "3"),
            ],
            &[],
        ));
    }

    fn supervisor(cluster: Arc<SimulatedCluster>, namespace: Option<&str>) -> Supervisor {
        let config = SupervisorConfig {
            watch_namespace: namespace.map(str::to_string),
            autoscaler: AutoscalerConfig {
                interval: Duration::from_secs(3600),
                ..Default::default()
            },
            ..Default::default()
        };
        Supervisor::new(config, ControlContext::new(cluster, "test"))
    }

    #[tokio::test]
    async fn test_discovery_filters_system_and_unannotated() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        annotated(&cluster, "kube-system", "dns");
        cluster.add_workload(SimulatedCluster::workload(
            WorkloadKind::Deployment,
            "shop",
            "plain",
            Some(1),
            &[],
            &[],
        ));

        let sup = supervisor(cluster, None);
        let keys: Vec<String> = sup
            .discover_targets()
            .await
            .unwrap()
            .iter()
            .map(DiscoveredTarget::key)
            .collect();
        assert_eq!(keys, vec!["shop/web".to_string()]);
    }

    #[tokio::test]
    async fn test_discovery_respects_watch_namespace() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        annotated(&cluster, "blog", "api");

        let sup = supervisor(cluster, Some("blog"));
        let targets = sup.discover_targets().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].deployment, "api");
    }

    #[tokio::test]
    async fn test_sync_starts_and_cancels_loops() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        annotated(&cluster, "shop", "api");
        let sup = supervisor(cluster.clone(), None);

        let report = sup.sync_targets().await.unwrap();
        assert_eq!(report.started, vec!["shop/api".to_string(), "shop/web".to_string()]);
        assert_eq!(sup.target_keys(), vec!["shop/api", "shop/web"]);

        // A second pass with no changes is a no-op
        assert_eq!(sup.sync_targets().await.unwrap(), SyncReport::default());

        cluster.remove_workload(WorkloadKind::Deployment, "shop", "api");
        let report = sup.sync_targets().await.unwrap();
        assert_eq!(report.cancelled, vec!["shop/api".to_string()]);
        assert_eq!(sup.target_keys(), vec!["shop/web"]);

        let summaries = sup.targets().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].key, "shop/web");

        sup.cancel_all().await;
        assert!(sup.target_keys().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_existing_loops() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        let sup = supervisor(cluster.clone(), None);
        sup.sync_targets().await.unwrap();

        cluster.fail(crate::cluster::FailPoint::ListWorkloads);
        assert!(sup.sync_targets().await.is_err());
        assert_eq!(sup.target_keys(), vec!["shop/web"]);

        sup.cancel_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_discovery_retries_early() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        cluster.fail(crate::cluster::FailPoint::ListWorkloads);
        let sup = Arc::new(supervisor(cluster.clone(), None));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(sup.clone().run(rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sup.target_keys().is_empty());

        cluster.clear_failure(crate::cluster::FailPoint::ListWorkloads);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sup.target_keys(), vec!["shop/web"]);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_cancels_loops_on_shutdown() {
        let cluster = Arc::new(SimulatedCluster::new());
        annotated(&cluster, "shop", "web");
        let sup = Arc::new(supervisor(cluster, None));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(sup.clone().run(rx));
        for _ in 0..50 {
            if !sup.target_keys().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sup.target_keys(), vec!["shop/web"]);

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(sup.target_keys().is_empty());
    }
}
