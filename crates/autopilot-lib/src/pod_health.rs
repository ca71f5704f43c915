//! Pod-health recorder
//!
//! Scans every pod on a short period and keeps a table of the ones that
//! look unhealthy. The table is rebuilt each pass; an entry keeps its
//! `first_seen` for as long as the pod stays unhealthy.

use crate::cluster::{ClusterAccessor, PodInfo};
use crate::error::ClusterResult;
use crate::health::components;
use crate::health::HealthRegistry;
use crate::models::{target_key, PodException};
use crate::observability::{controllers, ControlMetrics};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Waiting reasons that mark a container as failing
pub const FAILING_WAIT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

const OOM_KILLED: &str = "OOMKilled";

/// Why a pod is unhealthy, if it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub reason: String,
    pub container: Option<String>,
    pub restart_count: i32,
}

/// Classify one pod
pub fn classify(pod: &PodInfo) -> Option<Finding> {
    let restarts: i32 = pod.containers.iter().map(|c| c.restart_count).sum();

    if matches!(pod.phase.as_str(), "Failed" | "Unknown") {
        return Some(Finding {
            reason: pod.phase.clone(),
            container: None,
            restart_count: restarts,
        });
    }

    for container in &pod.containers {
        if let Some(reason) = container
            .waiting_reason
            .as_deref()
            .filter(|r| FAILING_WAIT_REASONS.contains(r))
        {
            return Some(Finding {
                reason: reason.to_string(),
                container: Some(container.name.clone()),
                restart_count: container.restart_count,
            });
        }
        if container.terminated_reason.as_deref() == Some(OOM_KILLED) {
            return Some(Finding {
                reason: OOM_KILLED.to_string(),
                container: Some(container.name.clone()),
                restart_count: container.restart_count,
            });
        }
    }

    if pod.is_running() {
        if let Some(container) = pod
            .containers
            .iter()
            .find(|c| !c.ready && c.restart_count > 0)
        {
            return Some(Finding {
                reason: "NotReadyAfterRestart".to_string(),
                container: Some(container.name.clone()),
                restart_count: container.restart_count,
            });
        }
    }

    None
}

pub struct PodHealthRecorder {
    cluster: Arc<dyn ClusterAccessor>,
    interval: Duration,
    table: DashMap<String, PodException>,
    metrics: ControlMetrics,
    health: HealthRegistry,
}

impl PodHealthRecorder {
    pub fn new(
        cluster: Arc<dyn ClusterAccessor>,
        interval: Duration,
        metrics: ControlMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            cluster,
            interval,
            table: DashMap::new(),
            metrics,
            health,
        }
    }

    /// Rebuild the exception table from a fresh pod listing
    pub async fn scan(&self) -> ClusterResult<usize> {
        let started = Instant::now();
        let pods = self.cluster.list_pods(None, None).await?;
        let now = Utc::now();

        let mut seen = HashSet::new();
        for pod in &pods {
            let Some(finding) = classify(pod) else {
                continue;
            };
            let key = target_key(&pod.namespace, &pod.name);
            let first_seen = self
                .table
                .get(&key)
                .map(|existing| existing.first_seen)
                .unwrap_or(now);
            self.table.insert(
                key.clone(),
                PodException {
                    namespace: pod.namespace.clone(),
                    pod_name: pod.name.clone(),
                    node_name: pod.node_name.clone(),
                    phase: pod.phase.clone(),
                    reason: finding.reason,
                    container: finding.container,
                    restart_count: finding.restart_count,
                    first_seen,
                    last_seen: now,
                },
            );
            seen.insert(key);
        }
        self.table.retain(|key, _| seen.contains(key));

        let count = self.table.len();
        self.metrics.set_pod_exceptions(count as i64);
        self.metrics
            .observe_reconcile(controllers::POD_HEALTH, started.elapsed().as_secs_f64());
        Ok(count)
    }

    /// Current exceptions ordered by key
    pub fn exceptions(&self) -> Vec<PodException> {
        let mut entries: Vec<PodException> =
            self.table.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| {
            (a.namespace.as_str(), a.pod_name.as_str()).cmp(&(b.namespace.as_str(), b.pod_name.as_str()))
        });
        entries
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting pod health recorder"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.scan().await.map(|_| ());
                    if let Err(e) = &outcome {
                        warn!(error = %e, "Pod health scan failed");
                    }
                    self.health.report(components::POD_HEALTH, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down pod health recorder");
                    break;
                }
            }
        }
    }
}
