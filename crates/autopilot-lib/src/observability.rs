//! Observability infrastructure for the control plane
//!
//! Provides:
//! - Prometheus metrics (reconcile latency, scale events, node lifecycle, migrations)
//! - Structured JSON logging of control actions with tracing

use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const RECONCILE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Controller label values
pub mod controllers {
    pub const AUTOSCALER: &str = "autoscaler";
    pub const NODE_CAPACITY: &str = "node_capacity";
    pub const LOAD_SHEDDER: &str = "load_shedder";
    pub const SCHEDULER: &str = "scheduler";
    pub const POD_HEALTH: &str = "pod_health";
    pub const SUPERVISOR: &str = "supervisor";
}

static GLOBAL_METRICS: OnceLock<ControlMetricsInner> = OnceLock::new();

struct ControlMetricsInner {
    reconcile_latency_seconds: HistogramVec,
    scale_events: IntCounterVec,
    supervised_targets: IntGauge,
    node_joins: IntCounter,
    node_removals: IntCounter,
    workloads_paused: IntCounter,
    migrations_completed: IntCounter,
    migrations_aborted: IntCounterVec,
    cycles_skipped: IntCounterVec,
    cluster_cpu_percent: Gauge,
    cluster_memory_percent: Gauge,
    pod_exceptions: IntGauge,
}

impl ControlMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram_vec!(
                "autopilot_reconcile_latency_seconds",
                "Duration of one reconcile cycle",
                &["controller"],
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            scale_events: register_int_counter_vec!(
                "autopilot_scale_events_total",
                "Replica changes applied by the bandwidth autoscaler",
                &["action"]
            )
            .expect("Failed to register scale_events_total"),

            supervised_targets: register_int_gauge!(
                "autopilot_supervised_targets",
                "Number of bandwidth autoscaler loops currently running"
            )
            .expect("Failed to register supervised_targets"),

            node_joins: register_int_counter!(
                "autopilot_node_joins_total",
                "Backup nodes joined to the cluster"
            )
            .expect("Failed to register node_joins_total"),

            node_removals: register_int_counter!(
                "autopilot_node_removals_total",
                "Nodes removed from the cluster"
            )
            .expect("Failed to register node_removals_total"),

            workloads_paused: register_int_counter!(
                "autopilot_workloads_paused_total",
                "Low-priority workloads paused by the load shedder"
            )
            .expect("Failed to register workloads_paused_total"),

            migrations_completed: register_int_counter!(
                "autopilot_migrations_completed_total",
                "Application migrations that reached the final step"
            )
            .expect("Failed to register migrations_completed_total"),

            migrations_aborted: register_int_counter_vec!(
                "autopilot_migrations_aborted_total",
                "Application migrations halted before completion",
                &["step"]
            )
            .expect("Failed to register migrations_aborted_total"),

            cycles_skipped: register_int_counter_vec!(
                "autopilot_cycles_skipped_total",
                "Cycles dropped because the previous one was still running",
                &["controller"]
            )
            .expect("Failed to register cycles_skipped_total"),

            cluster_cpu_percent: register_gauge!(
                "autopilot_cluster_cpu_percent",
                "Summed container CPU limits over node capacity"
            )
            .expect("Failed to register cluster_cpu_percent"),

            cluster_memory_percent: register_gauge!(
                "autopilot_cluster_memory_percent",
                "Summed container memory limits over node capacity"
            )
            .expect("Failed to register cluster_memory_percent"),

            pod_exceptions: register_int_gauge!(
                "autopilot_pod_exceptions",
                "Pods currently flagged by the health recorder"
            )
            .expect("Failed to register pod_exceptions"),
        }
    }
}

/// Handle to the process-wide control plane metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct ControlMetrics {
    _private: (),
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControlMetricsInner {
        GLOBAL_METRICS.get_or_init(ControlMetricsInner::new)
    }

    pub fn observe_reconcile(&self, controller: &str, duration_secs: f64) {
        self.inner()
            .reconcile_latency_seconds
            .with_label_values(&[controller])
            .observe(duration_secs);
    }

    pub fn inc_scale_event(&self, action: &str) {
        self.inner().scale_events.with_label_values(&[action]).inc();
    }

    pub fn set_supervised_targets(&self, count: i64) {
        self.inner().supervised_targets.set(count);
    }

    pub fn inc_node_joins(&self) {
        self.inner().node_joins.inc();
    }

    pub fn inc_node_removals(&self) {
        self.inner().node_removals.inc();
    }

    pub fn inc_workloads_paused(&self) {
        self.inner().workloads_paused.inc();
    }

    pub fn inc_migrations_completed(&self) {
        self.inner().migrations_completed.inc();
    }

    pub fn inc_migrations_aborted(&self, step: &str) {
        self.inner()
            .migrations_aborted
            .with_label_values(&[step])
            .inc();
    }

    /// Count a cycle dropped by a re-entrancy guard
    pub fn inc_cycles_skipped(&self, controller: &str) {
        self.inner()
            .cycles_skipped
            .with_label_values(&[controller])
            .inc();
    }

    pub fn set_utilization(&self, cpu_percent: f64, mem_percent: f64) {
        self.inner().cluster_cpu_percent.set(cpu_percent);
        self.inner().cluster_memory_percent.set(mem_percent);
    }

    pub fn set_pod_exceptions(&self, count: i64) {
        self.inner().pod_exceptions.set(count);
    }
}

/// Structured logger for control actions
///
/// Every significant actuation is logged with an `event` field so the JSON
/// stream can be filtered per action.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_scale_event(
        &self,
        target: &str,
        action: &str,
        from_replicas: i32,
        to_replicas: i32,
        per_replica_kbps: f64,
    ) {
        info!(
            event = "scale_event",
            instance = %self.instance,
            target = %target,
            action = %action,
            from_replicas = from_replicas,
            to_replicas = to_replicas,
            per_replica_kbps = per_replica_kbps,
            "Scaled target"
        );
    }

    pub fn log_scale_suppressed(&self, target: &str, action: &str, cooldown_remaining_secs: u64) {
        info!(
            event = "scale_suppressed",
            instance = %self.instance,
            target = %target,
            action = %action,
            cooldown_remaining_secs = cooldown_remaining_secs,
            "Scaling suppressed by cooldown"
        );
    }

    pub fn log_node_joined(&self, ip: &str, trigger: &str) {
        info!(
            event = "node_joined",
            instance = %self.instance,
            ip = %ip,
            trigger = %trigger,
            "Joined node"
        );
    }

    pub fn log_node_removed(&self, ip: &str) {
        info!(
            event = "node_removed",
            instance = %self.instance,
            ip = %ip,
            "Removed node from cluster"
        );
    }

    pub fn log_node_cordoned(&self, node: &str) {
        info!(
            event = "node_cordoned",
            instance = %self.instance,
            node = %node,
            "Cordoned backup node"
        );
    }

    pub fn log_workload_paused(&self, kind: &str, namespace: &str, name: &str, priority: i64) {
        warn!(
            event = "workload_paused",
            instance = %self.instance,
            kind = %kind,
            namespace = %namespace,
            name = %name,
            priority = priority,
            "Paused low-priority workload"
        );
    }

    pub fn log_migration_step(&self, app: &str, step: &str, backend: &str) {
        info!(
            event = "migration_step",
            instance = %self.instance,
            app = %app,
            step = %step,
            backend = %backend,
            "Migration step succeeded"
        );
    }

    pub fn log_migration_completed(&self, app: &str, from: &str, to: &str) {
        info!(
            event = "migration_completed",
            instance = %self.instance,
            app = %app,
            from = %from,
            to = %to,
            "Application migrated"
        );
    }

    pub fn log_migration_aborted(&self, app: &str, step: &str, reason: &str) {
        warn!(
            event = "migration_aborted",
            instance = %self.instance,
            app = %app,
            step = %step,
            reason = %reason,
            "Migration halted"
        );
    }

    pub fn log_loop_started(&self, target: &str) {
        info!(
            event = "loop_started",
            instance = %self.instance,
            target = %target,
            "Started control loop"
        );
    }

    pub fn log_loop_cancelled(&self, target: &str) {
        info!(
            event = "loop_cancelled",
            instance = %self.instance,
            target = %target,
            "Cancelled control loop"
        );
    }

    pub fn log_startup(&self, version: &str, cluster_backend: &str) {
        info!(
            event = "autopilot_started",
            instance = %self.instance,
            version = %version,
            cluster_backend = %cluster_backend,
            "Autopilot started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autopilot_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Autopilot shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_metrics_creation() {
        let metrics = ControlMetrics::new();
        let other = ControlMetrics::new();

        metrics.observe_reconcile(controllers::AUTOSCALER, 0.2);
        metrics.inc_scale_event("scale-up");
        other.inc_scale_event("scale-up");
        metrics.set_supervised_targets(3);
        metrics.inc_migrations_aborted("deploy");
        metrics.set_utilization(42.0, 17.5);

        let scale_ups = metrics
            .inner()
            .scale_events
            .with_label_values(&["scale-up"])
            .get();
        assert!(scale_ups >= 2);
        assert_eq!(metrics.inner().supervised_targets.get(), 3);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("autopilot-0");
        assert_eq!(logger.instance, "autopilot-0");
        logger.log_loop_started("shop/web");
    }
}
