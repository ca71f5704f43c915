//! Cluster State Accessor
//!
//! Typed facade over the orchestrator API. Controllers only talk to the
//! cluster through [`ClusterAccessor`], so the Kubernetes client and the
//! in-process simulation are interchangeable.

mod kube_client;
mod provisioner;
mod quantity;
mod simulated;

pub use kube_client::KubeCluster;
pub use provisioner::{CommandProvisioner, NodeProvisioner, ProvisionerConfig};
pub use quantity::{parse_cpu_cores, parse_memory_bytes, parse_quantity};
pub use simulated::{Actuation, FailPoint, SimulatedCluster};

use crate::error::ClusterResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation recording the replica count a paused workload had
pub const PAUSED_REPLICAS_ANNOTATION: &str = "autopilot.io/paused-replicas";

/// Workload kinds the control plane actuates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cluster node as seen by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub internal_ip: Option<String>,
    pub ready: bool,
    pub unschedulable: bool,
    /// Raw capacity quantities (e.g. "4", "3500m")
    pub cpu_capacity: Option<String>,
    /// Raw capacity quantities (e.g. "16Gi")
    pub memory_capacity: Option<String>,
}

/// Per-container resource declaration and runtime state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub ready: bool,
    pub restart_count: i32,
    /// Reason of the current waiting state, if any
    pub waiting_reason: Option<String>,
    /// Reason of the current or last terminated state, if any
    pub terminated_reason: Option<String>,
}

/// A pod with the fields the sampler and health recorder need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerInfo>,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }

    /// Running or Pending pods hold reserved capacity
    pub fn holds_capacity(&self) -> bool {
        matches!(self.phase.as_str(), "Running" | "Pending")
    }
}

/// A Deployment or StatefulSet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    /// `None` when the spec omits the replica count
    pub replicas: Option<i32>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Result of a command executed inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub success: bool,
}

/// Read/write facade over the orchestrator
#[async_trait]
pub trait ClusterAccessor: Send + Sync {
    /// List all nodes with capacity, readiness and addresses
    async fn list_nodes(&self) -> ClusterResult<Vec<NodeInfo>>;

    /// List pods, optionally scoped to a namespace and a label selector
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodInfo>>;

    /// List namespace names
    async fn list_namespaces(&self) -> ClusterResult<Vec<String>>;

    /// List workloads of one kind, optionally scoped to a namespace
    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<WorkloadInfo>>;

    /// Read a single workload
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<WorkloadInfo>;

    /// Set the replica count to an absolute value
    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> ClusterResult<()>;

    /// Set an environment variable on every container of a deployment that
    /// already declares it. Returns false when no container declares it.
    async fn set_env_var(
        &self,
        namespace: &str,
        deployment: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<bool>;

    /// Suspend a workload. Returns false when it was already suspended.
    async fn pause_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<bool>;

    /// Run a command inside a running pod
    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> ClusterResult<ExecOutput>;

    /// Mark a node unschedulable
    async fn cordon_node(&self, name: &str) -> ClusterResult<()>;

    /// Create a namespace; an existing namespace is not an error
    async fn create_namespace(&self, name: &str) -> ClusterResult<()>;

    /// Delete a namespace; a missing namespace is not an error
    async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;

    /// Read one key of a small key-value config object
    async fn read_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> ClusterResult<Option<String>>;

    /// Write one key of a small key-value config object, creating it if needed
    async fn write_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<()>;

    /// Join a machine to the cluster
    async fn join_node(&self, ip: &str) -> ClusterResult<()>;

    /// Force-remove a machine from the cluster
    async fn remove_node(&self, ip: &str) -> ClusterResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_phase_helpers() {
        let mut pod = PodInfo {
            name: "web-1".into(),
            namespace: "default".into(),
            node_name: None,
            phase: "Pending".into(),
            labels: BTreeMap::new(),
            containers: vec![],
        };
        assert!(pod.holds_capacity());
        assert!(!pod.is_running());

        pod.phase = "Succeeded".into();
        assert!(!pod.holds_capacity());
    }
}
