//! Priority Load-Shedding Controller
//!
//! When either resource crosses the ceiling, every Deployment and
//! StatefulSet labelled with a priority above 1 is paused.

use crate::cluster::{WorkloadInfo, WorkloadKind};
use crate::context::ControlContext;
use crate::error::ClusterResult;
use crate::guard::CycleGuard;
use crate::health::components;
use crate::observability::controllers;
use crate::sampler::MetricsSampler;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Label carrying a workload's priority
pub const PRIORITY_LABEL: &str = "priority";

/// Workloads with a priority strictly above this are shed first
pub const SHEDDABLE_ABOVE: i64 = 1;

#[derive(Debug, Clone)]
pub struct LoadShedderConfig {
    /// Delay between cycles (default: 60 seconds)
    pub interval: Duration,
    /// Pause low-priority workloads when CPU or memory is above this percentage (default: 70)
    pub resource_threshold: f64,
}

impl Default for LoadShedderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            resource_threshold: 70.0,
        }
    }
}

/// Integer priority from workload labels, `None` when absent or malformed
pub fn parse_priority(labels: &BTreeMap<String, String>) -> Option<i64> {
    labels.get(PRIORITY_LABEL)?.trim().parse().ok()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShedReport {
    pub skipped: bool,
    pub over_threshold: bool,
    /// `kind namespace/name` of workloads paused this cycle
    pub paused: Vec<String>,
    pub failed: Vec<String>,
}

pub struct LoadShedder {
    config: LoadShedderConfig,
    ctx: ControlContext,
    sampler: MetricsSampler,
    guard: CycleGuard,
}

impl LoadShedder {
    pub fn new(config: LoadShedderConfig, ctx: ControlContext) -> Self {
        Self {
            sampler: MetricsSampler::new(ctx.cluster.clone()),
            config,
            ctx,
            guard: CycleGuard::new(),
        }
    }

    pub async fn reconcile(&self) -> ClusterResult<ShedReport> {
        let Some(_ticket) = self.guard.try_enter() else {
            self.ctx.metrics.inc_cycles_skipped(controllers::LOAD_SHEDDER);
            return Ok(ShedReport {
                skipped: true,
                ..Default::default()
            });
        };

        let started = Instant::now();
        let report = self.run_cycle().await;
        self.ctx
            .metrics
            .observe_reconcile(controllers::LOAD_SHEDDER, started.elapsed().as_secs_f64());
        report
    }

    async fn run_cycle(&self) -> ClusterResult<ShedReport> {
        let utilization = self.sampler.cluster_utilization().await?;
        let mut report = ShedReport::default();

        if !utilization.any_above(self.config.resource_threshold) {
            debug!(
                cpu_percent = utilization.cpu_percent,
                mem_percent = utilization.mem_percent,
                "Utilisation below shedding threshold"
            );
            return Ok(report);
        }
        report.over_threshold = true;

        for kind in [WorkloadKind::Deployment, WorkloadKind::StatefulSet] {
            let workloads = self.ctx.cluster.list_workloads(kind, None).await?;
            for workload in workloads {
                self.shed(&workload, &mut report).await;
            }
        }

        Ok(report)
    }

    async fn shed(&self, workload: &WorkloadInfo, report: &mut ShedReport) {
        let Some(priority) = parse_priority(&workload.labels) else {
            return;
        };
        if priority <= SHEDDABLE_ABOVE {
            return;
        }

        let id = format!("{} {}/{}", workload.kind, workload.namespace, workload.name);
        match self
            .ctx
            .cluster
            .pause_workload(workload.kind, &workload.namespace, &workload.name)
            .await
        {
            Ok(true) => {
                self.ctx.metrics.inc_workloads_paused();
                self.ctx.logger.log_workload_paused(
                    workload.kind.as_str(),
                    &workload.namespace,
                    &workload.name,
                    priority,
                );
                report.paused.push(id);
            }
            Ok(false) => debug!(workload = %id, "Workload already paused"),
            Err(e) => {
                warn!(workload = %id, error = %e, "Failed to pause workload");
                report.failed.push(id);
            }
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            resource_threshold = self.config.resource_threshold,
            "Starting load shedding loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.reconcile().await.map(|_| ());
                    if let Err(e) = &outcome {
                        warn!(error = %e, "Load shedding cycle failed");
                    }
                    self.ctx.health.report(components::LOAD_SHEDDER, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down load shedding loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Actuation, FailPoint, SimulatedCluster};

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn loaded_cluster(cpu_limit: &str) -> Arc<SimulatedCluster> {
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.add_node(SimulatedCluster::node("n1", "10.0.0.1", "4", "8Gi"));
        cluster.add_pod(SimulatedCluster::pod("shop", "web-0", "Running", &[], Some(cpu_limit), Some("1Gi")));
        for (kind, name, priority) in [
            (WorkloadKind::Deployment, "batch", "3"),
            (WorkloadKind::Deployment, "web", "1"),
            (WorkloadKind::StatefulSet, "cache", "2"),
            (WorkloadKind::StatefulSet, "db", "high"),
        ] {
            cluster.add_workload(SimulatedCluster::workload(
                kind,
                "shop",
                name,
                Some(2),
                &[],
                &[(PRIORITY_LABEL, priority)],
            ));
        }
        cluster.add_workload(SimulatedCluster::workload(
            WorkloadKind::Deployment,
            "shop",
            "unlabelled",
            Some(1),
            &[],
            &[],
        ));
        cluster
    }

    fn paused(cluster: &SimulatedCluster) -> Vec<String> {
        cluster
            .actuations()
            .into_iter()
            .filter_map(|a| match a {
                Actuation::Pause { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority(&labels(&[(PRIORITY_LABEL, "3")])), Some(3));
        assert_eq!(parse_priority(&labels(&[(PRIORITY_LABEL, " 2 ")])), Some(2));
        assert_eq!(parse_priority(&labels(&[(PRIORITY_LABEL, "low")])), None);
        assert_eq!(parse_priority(&labels(&[])), None);
    }

    #[tokio::test]
    async fn test_sheds_only_low_priority_when_over_threshold() {
        let cluster = loaded_cluster("3500m");
        let shedder = LoadShedder::new(
            LoadShedderConfig::default(),
            ControlContext::new(cluster.clone(), "test"),
        );

        let report = shedder.reconcile().await.unwrap();
        assert!(report.over_threshold);
        assert_eq!(paused(&cluster), vec!["batch", "cache"]);

        // Pausing is idempotent: a second pass changes nothing
        cluster.clear_actuations();
        let report = shedder.reconcile().await.unwrap();
        assert!(report.paused.is_empty());
        assert!(paused(&cluster).is_empty());
    }

    #[tokio::test]
    async fn test_idle_cluster_sheds_nothing() {
        let cluster = loaded_cluster("1");
        let shedder = LoadShedder::new(
            LoadShedderConfig::default(),
            ControlContext::new(cluster.clone(), "test"),
        );

        let report = shedder.reconcile().await.unwrap();
        assert!(!report.over_threshold);
        assert!(cluster.actuations().is_empty());
    }

    #[tokio::test]
    async fn test_pause_failure_does_not_stop_the_pass() {
        let cluster = loaded_cluster("3500m");
        cluster.fail(FailPoint::Pause);
        let shedder = LoadShedder::new(
            LoadShedderConfig::default(),
            ControlContext::new(cluster.clone(), "test"),
        );

        let report = shedder.reconcile().await.unwrap();
        assert_eq!(report.failed.len(), 2);
        assert!(report.paused.is_empty());
    }
}
