//! Core data models for the control plane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation carrying the per-replica bandwidth ceiling in Kbps
pub const ANNOTATION_NETWORK_HPA: &str = "deploy.cloud.sealos.io/network-hpa";
/// Annotation carrying the replica floor
pub const ANNOTATION_MIN_REPLICAS: &str = "deploy.cloud.sealos.io/minReplicas";
/// Annotation carrying the replica ceiling
pub const ANNOTATION_MAX_REPLICAS: &str = "deploy.cloud.sealos.io/maxReplicas";

/// Scale-down threshold as a fraction of the scale-up threshold
pub const HYSTERESIS_RATIO: f64 = 0.3;

/// A deployment under bandwidth-based autoscaling.
///
/// Rebuilt from annotations on every reconcile; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTarget {
    pub deployment_name: String,
    pub namespace: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub threshold_kbps: f64,
}

impl ScalingTarget {
    /// Build a target from deployment annotations.
    ///
    /// Returns `None` when any of the three annotations is missing or
    /// does not parse.
    pub fn from_annotations(
        deployment_name: &str,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Option<Self> {
        let threshold_kbps = annotations
            .get(ANNOTATION_NETWORK_HPA)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())?;
        let min_replicas = annotations
            .get(ANNOTATION_MIN_REPLICAS)?
            .trim()
            .parse::<i32>()
            .ok()?;
        let max_replicas = annotations
            .get(ANNOTATION_MAX_REPLICAS)?
            .trim()
            .parse::<i32>()
            .ok()?;

        Some(Self {
            deployment_name: deployment_name.to_string(),
            namespace: namespace.to_string(),
            min_replicas,
            max_replicas,
            threshold_kbps,
        })
    }

    /// Lower edge of the hysteresis band
    pub fn min_rate_kbps(&self) -> f64 {
        min_rate_for(self.threshold_kbps)
    }

    /// Supervisor key for this target
    pub fn key(&self) -> String {
        target_key(&self.namespace, &self.deployment_name)
    }
}

/// Scale-down threshold for a given scale-up threshold
pub fn min_rate_for(max_rate_kbps: f64) -> f64 {
    max_rate_kbps * HYSTERESIS_RATIO
}

/// `namespace/name` key used to identify supervised loops
pub fn target_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Cumulative interface counters summed over an application's pods
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub observed_at: tokio::time::Instant,
}

/// Bandwidth derived from two samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReading {
    pub rx_kbps: f64,
    pub tx_kbps: f64,
    pub total_kbps: f64,
    pub pod_count: usize,
    pub interval_secs: f64,
}

/// Direction of a scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
}

impl ScaleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::ScaleUp => "scale-up",
            ScaleAction::ScaleDown => "scale-down",
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A replica change that was applied to a target
#[derive(Debug, Clone, Serialize)]
pub struct ScaleEvent {
    pub time: DateTime<Utc>,
    pub action: ScaleAction,
    pub from_replicas: i32,
    pub to_replicas: i32,
    pub trigger_rate_kbps: f64,
    /// Monotonic timestamp used for cooldown checks
    #[serde(skip)]
    pub at: tokio::time::Instant,
}

/// Cluster-wide utilisation, recomputed on every poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

impl ResourceUtilization {
    /// True when either resource is strictly above `threshold`
    pub fn any_above(&self, threshold: f64) -> bool {
        self.cpu_percent > threshold || self.mem_percent > threshold
    }

    /// True when both resources are strictly below `threshold`
    pub fn all_below(&self, threshold: f64) -> bool {
        self.cpu_percent < threshold && self.mem_percent < threshold
    }
}

/// A peer cluster that can serve migrated applications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPeer {
    pub ip: String,
}

/// Binding between an application and the backend serving its traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistration {
    pub app_name: String,
    pub namespace: String,
    #[serde(rename = "app2")]
    pub mirror_app: String,
    #[serde(rename = "namespace2")]
    pub mirror_namespace: String,
    #[serde(rename = "url_key")]
    pub routing_env_key: String,
    pub current_backend: String,
    pub ports: BTreeMap<String, u16>,
}

/// A pod the health recorder flagged as unhealthy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodException {
    pub namespace: String,
    pub pod_name: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub reason: String,
    pub container: Option<String>,
    pub restart_count: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_target_from_complete_annotations() {
        let ann = annotations(&[
            (ANNOTATION_NETWORK_HPA, "100"),
            (ANNOTATION_MIN_REPLICAS, "1"),
            (ANNOTATION_MAX_REPLICAS, "5"),
        ]);

        let target = ScalingTarget::from_annotations("web", "shop", &ann).unwrap();
        assert_eq!(target.threshold_kbps, 100.0);
        assert_eq!(target.min_replicas, 1);
        assert_eq!(target.max_replicas, 5);
        assert_eq!(target.key(), "shop/web");
    }

    #[test]
    fn test_target_requires_every_annotation() {
        let ann = annotations(&[
            (ANNOTATION_NETWORK_HPA, "100"),
            (ANNOTATION_MIN_REPLICAS, "1"),
        ]);
        assert!(ScalingTarget::from_annotations("web", "shop", &ann).is_none());

        let ann = annotations(&[
            (ANNOTATION_NETWORK_HPA, "fast"),
            (ANNOTATION_MIN_REPLICAS, "1"),
            (ANNOTATION_MAX_REPLICAS, "5"),
        ]);
        assert!(ScalingTarget::from_annotations("web", "shop", &ann).is_none());
    }

    #[test]
    fn test_min_rate_is_thirty_percent_of_max() {
        for max in [0.0, 1.0, 100.0, 333.3, 12_345.678] {
            assert_eq!(min_rate_for(max), max * 0.3);
        }
    }

    #[test]
    fn test_utilization_thresholds() {
        let util = ResourceUtilization {
            cpu_percent: 80.0,
            mem_percent: 10.0,
        };
        assert!(util.any_above(70.0));
        assert!(!util.all_below(15.0));

        let idle = ResourceUtilization {
            cpu_percent: 5.0,
            mem_percent: 10.0,
        };
        assert!(idle.all_below(15.0));
    }

    #[test]
    fn test_registration_wire_names() {
        let reg = AppRegistration {
            app_name: "frontend".into(),
            namespace: "ns-a".into(),
            mirror_app: "backend".into(),
            mirror_namespace: "ns-b".into(),
            routing_env_key: "BACKEND_URL".into(),
            current_backend: "10.0.0.1".into(),
            ports: BTreeMap::from([("80".to_string(), 30080)]),
        };
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["app2"], "backend");
        assert_eq!(json["namespace2"], "ns-b");
        assert_eq!(json["url_key"], "BACKEND_URL");
        assert_eq!(json["ports"]["80"], 30080);
    }
}
