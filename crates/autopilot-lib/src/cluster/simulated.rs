//! In-process simulated cluster
//!
//! Implements [`ClusterAccessor`] over an in-memory object set. Used for
//! local runs without an API server and as the test double for every
//! controller. Actuations are journaled and individual operations can be
//! made to fail.

use super::{
    ClusterAccessor, ContainerInfo, ExecOutput, NodeInfo, PodInfo, WorkloadInfo, WorkloadKind,
    PAUSED_REPLICAS_ANNOTATION,
};
use crate::error::{ClusterError, ClusterResult};
use crate::models::target_key;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutating call recorded by the simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    SetReplicas {
        kind: WorkloadKind,
        namespace: String,
        name: String,
        replicas: i32,
    },
    SetEnv {
        namespace: String,
        deployment: String,
        key: String,
        value: String,
    },
    Pause {
        kind: WorkloadKind,
        namespace: String,
        name: String,
    },
    Cordon {
        node: String,
    },
    JoinNode {
        ip: String,
    },
    RemoveNode {
        ip: String,
    },
    CreateNamespace {
        name: String,
    },
    DeleteNamespace {
        name: String,
    },
    WriteConfig {
        namespace: String,
        name: String,
        key: String,
    },
}

/// Operations that can be forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListNodes,
    ListPods,
    ListWorkloads,
    GetWorkload,
    SetReplicas,
    SetEnv,
    Pause,
    Exec,
    Cordon,
    JoinNode,
    RemoveNode,
    ReadConfig,
    WriteConfig,
}

#[derive(Debug, Default, Clone, Copy)]
struct NetCounter {
    rx: u64,
    tx: u64,
    rx_step: u64,
    tx_step: u64,
}

#[derive(Debug, Default)]
struct SimState {
    nodes: Vec<NodeInfo>,
    pods: Vec<PodInfo>,
    namespaces: BTreeSet<String>,
    workloads: BTreeMap<(WorkloadKind, String, String), WorkloadInfo>,
    env: HashMap<(String, String), BTreeMap<String, String>>,
    configs: HashMap<(String, String), BTreeMap<String, String>>,
    counters: HashMap<(String, String), NetCounter>,
    failures: HashSet<FailPoint>,
    actuations: Vec<Actuation>,
}

impl SimState {
    fn check(&self, point: FailPoint) -> ClusterResult<()> {
        if self.failures.contains(&point) {
            Err(ClusterError::Api(format!("simulated failure at {:?}", point)))
        } else {
            Ok(())
        }
    }
}

/// Simulated cluster state
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    state: Mutex<SimState>,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ready node with the given capacity
    pub fn node(name: &str, ip: &str, cpu: &str, memory: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            internal_ip: Some(ip.to_string()),
            ready: true,
            unschedulable: false,
            cpu_capacity: Some(cpu.to_string()),
            memory_capacity: Some(memory.to_string()),
        }
    }

    /// Single-container pod with the given limits
    pub fn pod(
        namespace: &str,
        name: &str,
        phase: &str,
        labels: &[(&str, &str)],
        cpu_limit: Option<&str>,
        memory_limit: Option<&str>,
    ) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            node_name: None,
            phase: phase.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            containers: vec![ContainerInfo {
                name: "main".to_string(),
                cpu_limit: cpu_limit.map(str::to_string),
                memory_limit: memory_limit.map(str::to_string),
                ready: phase == "Running",
                ..Default::default()
            }],
        }
    }

    /// Workload with annotations and labels
    pub fn workload(
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: Option<i32>,
        annotations: &[(&str, &str)],
        labels: &[(&str, &str)],
    ) -> WorkloadInfo {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        WorkloadInfo {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
            replicas,
            annotations: to_map(annotations),
            labels: to_map(labels),
        }
    }

    pub fn add_node(&self, node: NodeInfo) {
        let mut state = self.state();
        state.nodes.retain(|n| n.name != node.name);
        state.nodes.push(node);
    }

    pub fn add_pod(&self, pod: PodInfo) {
        let mut state = self.state();
        state.namespaces.insert(pod.namespace.clone());
        state
            .pods
            .retain(|p| !(p.namespace == pod.namespace && p.name == pod.name));
        state.pods.push(pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        state
            .pods
            .retain(|p| !(p.namespace == namespace && p.name == name));
    }

    pub fn add_workload(&self, workload: WorkloadInfo) {
        let mut state = self.state();
        state.namespaces.insert(workload.namespace.clone());
        state.workloads.insert(
            (
                workload.kind,
                workload.namespace.clone(),
                workload.name.clone(),
            ),
            workload,
        );
    }

    pub fn remove_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        self.state()
            .workloads
            .remove(&(kind, namespace.to_string(), name.to_string()));
    }

    /// Declare an environment variable on a deployment's containers
    pub fn declare_env(&self, namespace: &str, deployment: &str, key: &str, value: &str) {
        self.state()
            .env
            .entry((namespace.to_string(), deployment.to_string()))
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Current value of a deployment environment variable
    pub fn env_value(&self, namespace: &str, deployment: &str, key: &str) -> Option<String> {
        self.state()
            .env
            .get(&(namespace.to_string(), deployment.to_string()))
            .and_then(|vars| vars.get(key).cloned())
    }

    /// Bytes added to a pod's interface counters on every read
    pub fn set_traffic(&self, namespace: &str, pod: &str, rx_step: u64, tx_step: u64) {
        let mut state = self.state();
        let counter = state
            .counters
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        counter.rx_step = rx_step;
        counter.tx_step = tx_step;
    }

    pub fn fail(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    pub fn clear_failure(&self, point: FailPoint) {
        self.state().failures.remove(&point);
    }

    /// Journal of mutating calls, oldest first
    pub fn actuations(&self) -> Vec<Actuation> {
        self.state().actuations.clone()
    }

    pub fn clear_actuations(&self) {
        self.state().actuations.clear();
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.state().nodes.clone()
    }

    pub fn find_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Option<WorkloadInfo> {
        self.state()
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

fn render_proc_net_dev(rx: u64, tx: u64) -> String {
    format!(
        "Inter-|   Receive                                                |  Transmit\n \
         face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
         lo:       0       0    0    0    0     0          0         0        0       0    0    0    0     0       0          0\n  \
         eth0: {rx} 0 0 0 0 0 0 0 {tx} 0 0 0 0 0 0 0\n"
    )
}

#[async_trait]
impl ClusterAccessor for SimulatedCluster {
    async fn list_nodes(&self) -> ClusterResult<Vec<NodeInfo>> {
        let state = self.state();
        state.check(FailPoint::ListNodes)?;
        Ok(state.nodes.clone())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodInfo>> {
        let state = self.state();
        state.check(FailPoint::ListPods)?;
        Ok(state
            .pods
            .iter()
            .filter(|p| namespace.map(|ns| p.namespace == ns).unwrap_or(true))
            .filter(|p| {
                label_selector
                    .map(|sel| matches_selector(&p.labels, sel))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<String>> {
        Ok(self.state().namespaces.iter().cloned().collect())
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<WorkloadInfo>> {
        let state = self.state();
        state.check(FailPoint::ListWorkloads)?;
        Ok(state
            .workloads
            .values()
            .filter(|w| w.kind == kind)
            .filter(|w| namespace.map(|ns| w.namespace == ns).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<WorkloadInfo> {
        let state = self.state();
        state.check(FailPoint::GetWorkload)?;
        state
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), target_key(namespace, name)))
    }

    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(FailPoint::SetReplicas)?;
        let workload = state
            .workloads
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), target_key(namespace, name)))?;
        workload.replicas = Some(replicas);
        state.actuations.push(Actuation::SetReplicas {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas,
        });
        Ok(())
    }

    async fn set_env_var(
        &self,
        namespace: &str,
        deployment: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<bool> {
        let mut state = self.state();
        state.check(FailPoint::SetEnv)?;
        let workload_key = (
            WorkloadKind::Deployment,
            namespace.to_string(),
            deployment.to_string(),
        );
        if !state.workloads.contains_key(&workload_key) {
            return Err(ClusterError::not_found(
                "Deployment",
                target_key(namespace, deployment),
            ));
        }
        let declared = match state
            .env
            .get_mut(&(namespace.to_string(), deployment.to_string()))
            .and_then(|vars| vars.get_mut(key))
        {
            Some(slot) => {
                *slot = value.to_string();
                true
            }
            None => false,
        };
        if declared {
            state.actuations.push(Actuation::SetEnv {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(declared)
    }

    async fn pause_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<bool> {
        let mut state = self.state();
        state.check(FailPoint::Pause)?;
        let workload = state
            .workloads
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::not_found(kind.as_str(), target_key(namespace, name)))?;
        let replicas = workload.replicas.unwrap_or(1);
        if replicas == 0 {
            return Ok(false);
        }
        workload
            .annotations
            .insert(PAUSED_REPLICAS_ANNOTATION.to_string(), replicas.to_string());
        workload.replicas = Some(0);
        state.actuations.push(Actuation::Pause {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(true)
    }

    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> ClusterResult<ExecOutput> {
        let mut state = self.state();
        let exec_err = |message: &str| ClusterError::Exec {
            pod: target_key(namespace, pod),
            message: message.to_string(),
        };
        if state.failures.contains(&FailPoint::Exec) {
            return Err(exec_err("simulated failure"));
        }
        let running = state
            .pods
            .iter()
            .any(|p| p.namespace == namespace && p.name == pod && p.is_running());
        if !running {
            return Err(exec_err("pod is not running"));
        }
        if command != ["cat", "/proc/net/dev"] {
            return Ok(ExecOutput {
                stdout: String::new(),
                success: false,
            });
        }

        let counter = state
            .counters
            .entry((namespace.to_string(), pod.to_string()))
            .or_default();
        counter.rx += counter.rx_step;
        counter.tx += counter.tx_step;
        Ok(ExecOutput {
            stdout: render_proc_net_dev(counter.rx, counter.tx),
            success: true,
        })
    }

    async fn cordon_node(&self, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(FailPoint::Cordon)?;
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| ClusterError::not_found("Node", name))?;
        node.unschedulable = true;
        state.actuations.push(Actuation::Cordon {
            node: name.to_string(),
        });
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        if state.namespaces.insert(name.to_string()) {
            state.actuations.push(Actuation::CreateNamespace {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let mut state = self.state();
        if state.namespaces.remove(name) {
            state.actuations.push(Actuation::DeleteNamespace {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn read_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> ClusterResult<Option<String>> {
        let state = self.state();
        state.check(FailPoint::ReadConfig)?;
        Ok(state
            .configs
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|data| data.get(key).cloned()))
    }

    async fn write_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(FailPoint::WriteConfig)?;
        state.namespaces.insert(namespace.to_string());
        state
            .configs
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.to_string());
        state.actuations.push(Actuation::WriteConfig {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn join_node(&self, ip: &str) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(FailPoint::JoinNode)?;
        if !state
            .nodes
            .iter()
            .any(|n| n.internal_ip.as_deref() == Some(ip))
        {
            let name = format!("node-{}", ip.replace('.', "-"));
            state.nodes.push(Self::node(&name, ip, "4", "8Gi"));
        }
        state.actuations.push(Actuation::JoinNode { ip: ip.to_string() });
        Ok(())
    }

    async fn remove_node(&self, ip: &str) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(FailPoint::RemoveNode)?;
        state
            .nodes
            .retain(|n| n.internal_ip.as_deref() != Some(ip));
        state
            .actuations
            .push(Actuation::RemoveNode { ip: ip.to_string() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let labels = BTreeMap::from([
            ("app".to_string(), "web".to_string()),
            ("tier".to_string(), "front".to_string()),
        ]);
        assert!(matches_selector(&labels, "app=web"));
        assert!(matches_selector(&labels, "app=web,tier=front"));
        assert!(matches_selector(&labels, "tier"));
        assert!(!matches_selector(&labels, "app=api"));
        assert!(!matches_selector(&labels, "k8s-app=web"));
    }

    #[tokio::test]
    async fn test_failpoints_and_journal() {
        let cluster = SimulatedCluster::new();
        cluster.add_workload(SimulatedCluster::workload(
            WorkloadKind::Deployment,
            "shop",
            "web",
            Some(2),
            &[],
            &[],
        ));

        cluster.fail(FailPoint::SetReplicas);
        assert!(cluster
            .set_replicas(WorkloadKind::Deployment, "shop", "web", 3)
            .await
            .is_err());
        assert!(cluster.actuations().is_empty());

        cluster.clear_failure(FailPoint::SetReplicas);
        cluster
            .set_replicas(WorkloadKind::Deployment, "shop", "web", 3)
            .await
            .unwrap();
        assert_eq!(
            cluster.actuations(),
            vec![Actuation::SetReplicas {
                kind: WorkloadKind::Deployment,
                namespace: "shop".into(),
                name: "web".into(),
                replicas: 3,
            }]
        );
    }

    #[tokio::test]
    async fn test_pause_is_idempotent() {
        let cluster = SimulatedCluster::new();
        cluster.add_workload(SimulatedCluster::workload(
            WorkloadKind::StatefulSet,
            "db",
            "pg",
            Some(3),
            &[],
            &[],
        ));

        assert!(cluster
            .pause_workload(WorkloadKind::StatefulSet, "db", "pg")
            .await
            .unwrap());
        assert!(!cluster
            .pause_workload(WorkloadKind::StatefulSet, "db", "pg")
            .await
            .unwrap());

        let pg = cluster
            .find_workload(WorkloadKind::StatefulSet, "db", "pg")
            .unwrap();
        assert_eq!(pg.replicas, Some(0));
        assert_eq!(pg.annotations[PAUSED_REPLICAS_ANNOTATION], "3");
    }

    #[tokio::test]
    async fn test_exec_advances_counters() {
        let cluster = SimulatedCluster::new();
        cluster.add_pod(SimulatedCluster::pod(
            "shop", "web-1", "Running", &[], None, None,
        ));
        cluster.set_traffic("shop", "web-1", 100, 50);

        let first = cluster
            .exec_in_pod("shop", "web-1", &["cat", "/proc/net/dev"])
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.stdout.contains("eth0: 100 "));

        let second = cluster
            .exec_in_pod("shop", "web-1", &["cat", "/proc/net/dev"])
            .await
            .unwrap();
        assert!(second.stdout.contains("eth0: 200 "));
    }
}
