//! Service configuration
//!
//! Read from an optional TOML file (`AUTOPILOT_CONFIG`, default
//! `autopilot.toml`) overlaid with `AUTOPILOT__`-prefixed environment
//! variables, e.g. `AUTOPILOT__SCHEDULER__PEER_PORT=5003`.

use anyhow::{Context, Result};
use autopilot_lib::autoscaler::AutoscalerConfig;
use autopilot_lib::cluster::ProvisionerConfig;
use autopilot_lib::load_shedder::LoadShedderConfig;
use autopilot_lib::node_capacity::NodeCapacityConfig;
use autopilot_lib::peer::PeerClientConfig;
use autopilot_lib::scheduler::SchedulerConfig;
use autopilot_lib::store::StoreConfig;
use autopilot_lib::supervisor::SupervisorConfig;
use serde::Deserialize;
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "AUTOPILOT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "autopilot.toml";
const ENV_PREFIX: &str = "AUTOPILOT";

/// Which orchestrator the control plane drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    #[default]
    Kube,
    Simulated,
}

impl ClusterBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterBackend::Kube => "kube",
            ClusterBackend::Simulated => "simulated",
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port of the HTTP control surface
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub cluster_backend: ClusterBackend,

    /// Namespace scanned for autoscaling targets, or `all`
    #[serde(default = "default_watch_namespace")]
    pub watch_namespace: String,

    /// Kubeconfig forwarded to peers on delete requests
    #[serde(default)]
    pub kubeconfig_path: Option<String>,

    #[serde(default)]
    pub autoscaler: AutoscalerSettings,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub node_capacity: NodeCapacitySettings,

    #[serde(default)]
    pub load_shedder: LoadShedderSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub pod_health: PodHealthSettings,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "autopilot".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_watch_namespace() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoscalerSettings {
    pub interval_secs: u64,
    pub sampling_interval_ms: u64,
    pub cooldown_secs: u64,
    pub history_capacity: usize,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            sampling_interval_ms: 2000,
            cooldown_secs: 120,
            history_capacity: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub discovery_interval_secs: u64,
    pub discovery_retry_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 300,
            discovery_retry_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeCapacitySettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub add_threshold: f64,
    pub delete_threshold: f64,
    pub backup_namespace: String,
    pub backup_config_name: String,
    /// Installer argv; `{ip}` is replaced with the node address
    pub join_command: Vec<String>,
    pub remove_command: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for NodeCapacitySettings {
    fn default() -> Self {
        let provisioner = ProvisionerConfig::default();
        Self {
            enabled: true,
            interval_secs: 60,
            add_threshold: 70.0,
            delete_threshold: 15.0,
            backup_namespace: "autopilot-system".to_string(),
            backup_config_name: "backup-nodes".to_string(),
            join_command: provisioner.join_command,
            remove_command: provisioner.remove_command,
            command_timeout_secs: provisioner.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadShedderSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub resource_threshold: f64,
}

impl Default for LoadShedderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60,
            resource_threshold: 70.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub peer_port: u16,
    pub frontend_port: u16,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub min_samples: usize,
    pub timeout_sentinel_ms: f64,
    pub bundle_root: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            peer_port: 5002,
            frontend_port: 32293,
            probe_timeout_secs: 5,
            request_timeout_secs: 120,
            min_samples: 5,
            timeout_sentinel_ms: 1_000_000.0,
            bundle_root: "/root/.mxapps".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodHealthSettings {
    pub interval_secs: u64,
}

impl Default for PodHealthSettings {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

impl AppConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("invalid autopilot configuration")
    }

    /// Namespace filter for discovery, `None` meaning every namespace
    pub fn watch_namespace(&self) -> Option<String> {
        match self.watch_namespace.trim() {
            "" | "all" => None,
            ns => Some(ns.to_string()),
        }
    }

    pub fn autoscaler_config(&self) -> AutoscalerConfig {
        AutoscalerConfig {
            interval: Duration::from_secs(self.autoscaler.interval_secs),
            sampling_interval: Duration::from_millis(self.autoscaler.sampling_interval_ms),
            cooldown: Duration::from_secs(self.autoscaler.cooldown_secs),
            history_capacity: self.autoscaler.history_capacity,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            discovery_interval: Duration::from_secs(self.supervisor.discovery_interval_secs),
            discovery_retry_interval: Duration::from_secs(self.supervisor.discovery_retry_secs),
            watch_namespace: self.watch_namespace(),
            autoscaler: self.autoscaler_config(),
        }
    }

    pub fn node_capacity_config(&self) -> NodeCapacityConfig {
        NodeCapacityConfig {
            interval: Duration::from_secs(self.node_capacity.interval_secs),
            add_threshold: self.node_capacity.add_threshold,
            delete_threshold: self.node_capacity.delete_threshold,
        }
    }

    pub fn provisioner_config(&self) -> ProvisionerConfig {
        ProvisionerConfig {
            join_command: self.node_capacity.join_command.clone(),
            remove_command: self.node_capacity.remove_command.clone(),
            timeout: Duration::from_secs(self.node_capacity.command_timeout_secs),
        }
    }

    pub fn load_shedder_config(&self) -> LoadShedderConfig {
        LoadShedderConfig {
            interval: Duration::from_secs(self.load_shedder.interval_secs),
            resource_threshold: self.load_shedder.resource_threshold,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.scheduler.interval_secs),
            min_samples: self.scheduler.min_samples,
            timeout_sentinel_ms: self.scheduler.timeout_sentinel_ms,
            bundle_root: self.scheduler.bundle_root.clone(),
        }
    }

    pub fn peer_client_config(&self) -> PeerClientConfig {
        PeerClientConfig {
            peer_port: self.scheduler.peer_port,
            frontend_port: self.scheduler.frontend_port,
            probe_timeout: Duration::from_secs(self.scheduler.probe_timeout_secs),
            request_timeout: Duration::from_secs(self.scheduler.request_timeout_secs),
        }
    }

    pub fn pod_health_interval(&self) -> Duration {
        Duration::from_secs(self.pod_health.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load_from("/nonexistent/autopilot").unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.cluster_backend, ClusterBackend::Kube);
        assert!(config.watch_namespace().is_none());
        assert!(config.node_capacity.enabled);
        assert!(!config.load_shedder.enabled);
        assert_eq!(config.store, StoreConfig::Memory);

        let autoscaler = config.autoscaler_config();
        assert_eq!(autoscaler.cooldown, Duration::from_secs(120));
        assert_eq!(autoscaler.sampling_interval, Duration::from_secs(2));
        assert_eq!(config.pod_health_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_file_overrides_nested_sections() {
        let file = write_config(
            r#"
api_port = 9090
cluster_backend = "simulated"
watch_namespace = "shop"

[load_shedder]
enabled = true
resource_threshold = 85.0

[scheduler]
peer_port = 6000

[store]
backend = "sqlite"
database_url = "sqlite://scheduling.db"
"#,
        );
        let config = AppConfig::load_from(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.api_port, 9090);
        assert_eq!(config.cluster_backend, ClusterBackend::Simulated);
        assert_eq!(config.watch_namespace().as_deref(), Some("shop"));
        assert!(config.load_shedder.enabled);
        assert_eq!(config.load_shedder_config().resource_threshold, 85.0);
        assert_eq!(config.peer_client_config().peer_port, 6000);
        assert_eq!(config.peer_client_config().frontend_port, 32293);
        assert_eq!(
            config.store,
            StoreConfig::sqlite("sqlite://scheduling.db", 4)
        );
    }

    #[test]
    fn test_provisioner_templates_default_to_installer() {
        let config = AppConfig::load_from("/nonexistent/autopilot").unwrap();
        let provisioner = config.provisioner_config();
        assert!(provisioner.join_command.iter().any(|arg| arg == "{ip}"));
        assert_eq!(provisioner.timeout, Duration::from_secs(600));
    }
}
