//! Node Capacity Controller
//!
//! Cluster-wide. Joins one backup node at a time when either resource is
//! above the add threshold, and force-removes every backup node that is a
//! cluster member when both resources are below the delete threshold.

mod backup;

pub use backup::BackupNodeStore;

use crate::cluster::NodeInfo;
use crate::context::ControlContext;
use crate::error::ClusterResult;
use crate::guard::CycleGuard;
use crate::health::components;
use crate::models::ResourceUtilization;
use crate::observability::controllers;
use crate::sampler::MetricsSampler;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct NodeCapacityConfig {
    /// Delay between cycles (default: 60 seconds)
    pub interval: Duration,
    /// Join a node when CPU or memory is above this percentage (default: 70)
    pub add_threshold: f64,
    /// Remove backup nodes when CPU and memory are below this percentage (default: 15)
    pub delete_threshold: f64,
}

impl Default for NodeCapacityConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            add_threshold: 70.0,
            delete_threshold: 15.0,
        }
    }
}

/// Backup pool split by current cluster membership
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupPartition {
    /// Backup IPs that are not cluster members, in pool order
    pub outside: Vec<String>,
    /// Backup IPs that are cluster members, in pool order
    pub inside: Vec<String>,
}

/// Split the backup pool by whether a live node carries the IP
pub fn partition_backup(backup: &[String], nodes: &[NodeInfo]) -> BackupPartition {
    let member_ips: HashSet<&str> = nodes
        .iter()
        .filter_map(|n| n.internal_ip.as_deref())
        .collect();

    let mut partition = BackupPartition::default();
    for ip in backup {
        if member_ips.contains(ip.as_str()) {
            partition.inside.push(ip.clone());
        } else {
            partition.outside.push(ip.clone());
        }
    }
    partition
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityDecision {
    /// Join this backup IP
    ScaleOut(String),
    /// Force-remove every listed IP
    ScaleIn(Vec<String>),
    Hold,
}

pub fn decide_capacity(
    utilization: &ResourceUtilization,
    partition: &BackupPartition,
    config: &NodeCapacityConfig,
) -> CapacityDecision {
    if utilization.any_above(config.add_threshold) {
        match partition.outside.first() {
            Some(ip) => CapacityDecision::ScaleOut(ip.clone()),
            None => CapacityDecision::Hold,
        }
    } else if utilization.all_below(config.delete_threshold) && !partition.inside.is_empty() {
        CapacityDecision::ScaleIn(partition.inside.clone())
    } else {
        CapacityDecision::Hold
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapacityReport {
    pub skipped: bool,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub joined: Option<String>,
    pub removed: Vec<String>,
    pub cordoned: Vec<String>,
}

pub struct NodeCapacityController {
    config: NodeCapacityConfig,
    ctx: ControlContext,
    backup: Arc<BackupNodeStore>,
    sampler: MetricsSampler,
    guard: CycleGuard,
}

impl NodeCapacityController {
    pub fn new(
        config: NodeCapacityConfig,
        ctx: ControlContext,
        backup: Arc<BackupNodeStore>,
    ) -> Self {
        Self {
            sampler: MetricsSampler::new(ctx.cluster.clone()),
            config,
            ctx,
            backup,
            guard: CycleGuard::new(),
        }
    }

    pub fn backup_store(&self) -> &Arc<BackupNodeStore> {
        &self.backup
    }

    /// Run one cycle. Any failure aborts the rest of the cycle.
    pub async fn reconcile(&self) -> ClusterResult<CapacityReport> {
        let Some(_ticket) = self.guard.try_enter() else {
            self.ctx.metrics.inc_cycles_skipped(controllers::NODE_CAPACITY);
            return Ok(CapacityReport {
                skipped: true,
                ..Default::default()
            });
        };

        let started = Instant::now();
        let report = self.run_cycle().await;
        self.ctx
            .metrics
            .observe_reconcile(controllers::NODE_CAPACITY, started.elapsed().as_secs_f64());
        report
    }

    async fn run_cycle(&self) -> ClusterResult<CapacityReport> {
        let backup = self.backup.list().await?;
        let nodes = self.ctx.cluster.list_nodes().await?;
        let utilization = self.sampler.cluster_utilization().await?;
        self.ctx
            .metrics
            .set_utilization(utilization.cpu_percent, utilization.mem_percent);

        let partition = partition_backup(&backup, &nodes);
        debug!(
            cpu_percent = utilization.cpu_percent,
            mem_percent = utilization.mem_percent,
            outside = partition.outside.len(),
            inside = partition.inside.len(),
            "Evaluated node capacity"
        );

        let mut report = CapacityReport {
            cpu_percent: utilization.cpu_percent,
            mem_percent: utilization.mem_percent,
            ..Default::default()
        };

        match decide_capacity(&utilization, &partition, &self.config) {
            CapacityDecision::ScaleOut(ip) => {
                self.ctx.cluster.join_node(&ip).await?;
                self.ctx.metrics.inc_node_joins();
                self.ctx.logger.log_node_joined(
                    &ip,
                    &format!(
                        "cpu={:.1}% mem={:.1}%",
                        utilization.cpu_percent, utilization.mem_percent
                    ),
                );
                report.joined = Some(ip);
            }
            CapacityDecision::ScaleIn(ips) => {
                for ip in ips {
                    self.ctx.cluster.remove_node(&ip).await?;
                    self.ctx.metrics.inc_node_removals();
                    self.ctx.logger.log_node_removed(&ip);
                    report.removed.push(ip);
                }
            }
            CapacityDecision::Hold => {}
        }

        report.cordoned = self.cordon_ready_backup_nodes(&backup).await?;
        Ok(report)
    }

    /// Cordon every Ready, still schedulable node whose IP is in the pool
    async fn cordon_ready_backup_nodes(&self, backup: &[String]) -> ClusterResult<Vec<String>> {
        let pool: HashSet<&str> = backup.iter().map(String::as_str).collect();
        let nodes = self.ctx.cluster.list_nodes().await?;

        let mut cordoned = Vec::new();
        for node in nodes {
            let in_pool = node
                .internal_ip
                .as_deref()
                .map(|ip| pool.contains(ip))
                .unwrap_or(false);
            if !in_pool || !node.ready || node.unschedulable {
                continue;
            }
            match self.ctx.cluster.cordon_node(&node.name).await {
                Ok(()) => {
                    self.ctx.logger.log_node_cordoned(&node.name);
                    cordoned.push(node.name);
                }
                Err(e) => warn!(node = %node.name, error = %e, "Failed to cordon backup node"),
            }
        }
        Ok(cordoned)
    }

    /// Join a machine on operator request
    pub async fn add_node(&self, ip: &str) -> ClusterResult<()> {
        self.ctx.cluster.join_node(ip).await?;
        self.ctx.metrics.inc_node_joins();
        self.ctx.logger.log_node_joined(ip, "manual");
        Ok(())
    }

    /// Remove a machine on operator request
    pub async fn delete_node(&self, ip: &str) -> ClusterResult<()> {
        self.ctx.cluster.remove_node(ip).await?;
        self.ctx.metrics.inc_node_removals();
        self.ctx.logger.log_node_removed(ip);
        Ok(())
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            add_threshold = self.config.add_threshold,
            delete_threshold = self.config.delete_threshold,
            "Starting node capacity loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.reconcile().await.map(|_| ());
                    if let Err(e) = &outcome {
                        warn!(error = %e, "Node capacity cycle failed");
                    }
                    self.ctx.health.report(components::NODE_CAPACITY, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down node capacity loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
