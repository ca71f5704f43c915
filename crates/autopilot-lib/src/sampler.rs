//! Metrics Sampler
//!
//! Derives cluster utilisation from declared limits and node capacity, and
//! per-application throughput from two reads of the pods' interface
//! counters.

use crate::cluster::{parse_cpu_cores, parse_memory_bytes, ClusterAccessor, PodInfo};
use crate::error::{ClusterError, ClusterResult};
use crate::models::{BandwidthReading, BandwidthSample, ResourceUtilization};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const PROC_NET_DEV: &[&str] = &["cat", "/proc/net/dev"];

/// Label keys tried in order when resolving an application's pods
const APP_LABEL_KEYS: &[&str] = &["app", "app.kubernetes.io/name", "k8s-app"];

#[derive(Clone)]
pub struct MetricsSampler {
    cluster: Arc<dyn ClusterAccessor>,
}

impl MetricsSampler {
    pub fn new(cluster: Arc<dyn ClusterAccessor>) -> Self {
        Self { cluster }
    }

    /// Summed container limits of Running/Pending pods over summed node
    /// capacity, in percent.
    ///
    /// Fails without a partial result when either listing fails or the
    /// cluster reports no capacity.
    pub async fn cluster_utilization(&self) -> ClusterResult<ResourceUtilization> {
        let nodes = self.cluster.list_nodes().await?;
        let pods = self.cluster.list_pods(None, None).await?;

        let mut cpu_capacity = 0.0;
        let mut mem_capacity = 0.0;
        for node in &nodes {
            cpu_capacity += quantity_or_zero(node.cpu_capacity.as_deref(), parse_cpu_cores);
            mem_capacity += quantity_or_zero(node.memory_capacity.as_deref(), parse_memory_bytes);
        }

        if cpu_capacity <= 0.0 || mem_capacity <= 0.0 {
            return Err(ClusterError::InvalidObject(format!(
                "cluster reports no allocatable capacity (cpu={}, memory={})",
                cpu_capacity, mem_capacity
            )));
        }

        let mut cpu_limits = 0.0;
        let mut mem_limits = 0.0;
        for container in pods
            .iter()
            .filter(|p| p.holds_capacity())
            .flat_map(|p| p.containers.iter())
        {
            cpu_limits += quantity_or_zero(container.cpu_limit.as_deref(), parse_cpu_cores);
            mem_limits += quantity_or_zero(container.memory_limit.as_deref(), parse_memory_bytes);
        }

        Ok(ResourceUtilization {
            cpu_percent: cpu_limits / cpu_capacity * 100.0,
            mem_percent: mem_limits / mem_capacity * 100.0,
        })
    }

    /// Resolve an application's pods.
    ///
    /// The first label selector that matches anything wins; otherwise pods
    /// whose name contains the application name are returned.
    pub async fn app_pods(&self, app: &str, namespace: &str) -> ClusterResult<Vec<PodInfo>> {
        for key in APP_LABEL_KEYS {
            let selector = format!("{}={}", key, app);
            let pods = self
                .cluster
                .list_pods(Some(namespace), Some(&selector))
                .await?;
            if !pods.is_empty() {
                debug!(app = %app, selector = %selector, pods = pods.len(), "Resolved pods by label");
                return Ok(pods);
            }
        }

        let pods = self.cluster.list_pods(Some(namespace), None).await?;
        Ok(pods.into_iter().filter(|p| p.name.contains(app)).collect())
    }

    /// Measure an application's throughput over `interval`.
    ///
    /// Pods whose counters cannot be read at either end contribute zero.
    pub async fn app_bandwidth_kbps(
        &self,
        app: &str,
        namespace: &str,
        interval: Duration,
    ) -> ClusterResult<BandwidthReading> {
        let pods: Vec<PodInfo> = self
            .app_pods(app, namespace)
            .await?
            .into_iter()
            .filter(|p| p.is_running())
            .collect();

        if pods.is_empty() {
            return Ok(BandwidthReading {
                rx_kbps: 0.0,
                tx_kbps: 0.0,
                total_kbps: 0.0,
                pod_count: 0,
                interval_secs: interval.as_secs_f64(),
            });
        }

        let started = Instant::now();
        let before = self.sample_pods(namespace, &pods).await;
        tokio::time::sleep(interval).await;
        let after = self.sample_pods(namespace, &pods).await;

        let mut rx_bytes = 0u64;
        let mut tx_bytes = 0u64;
        let mut elapsed = Duration::ZERO;
        for (pod, end) in &after {
            if let Some(start) = before.get(pod) {
                rx_bytes += end.rx_bytes.saturating_sub(start.rx_bytes);
                tx_bytes += end.tx_bytes.saturating_sub(start.tx_bytes);
                elapsed = elapsed.max(end.observed_at.duration_since(start.observed_at));
            }
        }
        if elapsed.is_zero() {
            elapsed = started.elapsed().max(interval);
        }

        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let rx_kbps = (rx_bytes as f64 / 1024.0 / secs).max(0.0);
        let tx_kbps = (tx_bytes as f64 / 1024.0 / secs).max(0.0);

        Ok(BandwidthReading {
            rx_kbps,
            tx_kbps,
            total_kbps: rx_kbps + tx_kbps,
            pod_count: pods.len(),
            interval_secs: secs,
        })
    }

    async fn sample_pods(
        &self,
        namespace: &str,
        pods: &[PodInfo],
    ) -> HashMap<String, BandwidthSample> {
        let mut samples = HashMap::with_capacity(pods.len());
        for pod in pods {
            match self.read_counters(namespace, &pod.name).await {
                Ok(sample) => {
                    samples.insert(pod.name.clone(), sample);
                }
                Err(e) => {
                    warn!(pod = %pod.name, namespace = %namespace, error = %e, "Failed to read interface counters");
                }
            }
        }
        samples
    }

    async fn read_counters(&self, namespace: &str, pod: &str) -> ClusterResult<BandwidthSample> {
        let output = self.cluster.exec_in_pod(namespace, pod, PROC_NET_DEV).await?;
        if !output.success {
            return Err(ClusterError::Exec {
                pod: pod.to_string(),
                message: "reading /proc/net/dev did not succeed".to_string(),
            });
        }
        let (rx_bytes, tx_bytes) = parse_proc_net_dev(&output.stdout);
        Ok(BandwidthSample {
            rx_bytes,
            tx_bytes,
            observed_at: Instant::now(),
        })
    }
}

fn quantity_or_zero(raw: Option<&str>, parse: fn(&str) -> Option<f64>) -> f64 {
    match raw {
        Some(value) => parse(value).unwrap_or_else(|| {
            debug!(quantity = %value, "Ignoring unparseable quantity");
            0.0
        }),
        None => 0.0,
    }
}

/// Sum received and transmitted bytes over every interface in
/// `/proc/net/dev` output.
///
/// The two header lines are skipped, as are lines without a `name:` prefix
/// or with fewer than 16 counters.
pub fn parse_proc_net_dev(text: &str) -> (u64, u64) {
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    for line in text.lines().skip(2) {
        let Some((_iface, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 16 {
            continue;
        }
        if let (Ok(rx), Ok(tx)) = (fields[0].parse::<u64>(), fields[8].parse::<u64>()) {
            rx_total = rx_total.saturating_add(rx);
            tx_total = tx_total.saturating_add(tx);
        }
    }

    (rx_total, tx_total)
}
