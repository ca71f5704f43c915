//! Kubernetes-backed Cluster State Accessor

use super::{
    ClusterAccessor, ContainerInfo, ExecOutput, NodeInfo, NodeProvisioner, PodInfo,
    WorkloadInfo, WorkloadKind, PAUSED_REPLICAS_ANNOTATION,
};
use crate::error::{ClusterError, ClusterResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, ContainerStatus, Namespace, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Deadline for a single in-pod command
const EXEC_TIMEOUT: Duration = Duration::from_secs(15);

/// Cluster accessor backed by the Kubernetes API server
pub struct KubeCluster {
    client: Client,
    provisioner: Arc<dyn NodeProvisioner>,
}

impl KubeCluster {
    pub fn new(client: Client, provisioner: Arc<dyn NodeProvisioner>) -> Self {
        Self {
            client,
            provisioner,
        }
    }

    /// Connect using in-cluster configuration or the local kubeconfig
    pub async fn connect(provisioner: Arc<dyn NodeProvisioner>) -> ClusterResult<Self> {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes API server");
        Ok(Self::new(client, provisioner))
    }

    fn namespaced_or_all<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).map(|q| q.0.clone())
}

fn node_info(node: Node) -> NodeInfo {
    let status = node.status.unwrap_or_default();
    let internal_ip = status
        .addresses
        .as_ref()
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone());
    let ready = status
        .conditions
        .as_ref()
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false);

    NodeInfo {
        name: node.metadata.name.unwrap_or_default(),
        internal_ip,
        ready,
        unschedulable: node
            .spec
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        cpu_capacity: quantity(status.capacity.as_ref(), "cpu"),
        memory_capacity: quantity(status.capacity.as_ref(), "memory"),
    }
}

fn pod_info(pod: Pod) -> PodInfo {
    let status = pod.status.unwrap_or_default();
    let statuses: Vec<ContainerStatus> = status.container_statuses.unwrap_or_default();
    let spec = pod.spec.unwrap_or_default();

    let containers = spec
        .containers
        .iter()
        .map(|c| {
            let resources = c.resources.as_ref();
            let limits = resources.and_then(|r| r.limits.as_ref());
            let requests = resources.and_then(|r| r.requests.as_ref());
            let cs = statuses.iter().find(|s| s.name == c.name);
            let state = cs.and_then(|s| s.state.as_ref());
            let last_state = cs.and_then(|s| s.last_state.as_ref());

            ContainerInfo {
                name: c.name.clone(),
                cpu_limit: quantity(limits, "cpu"),
                memory_limit: quantity(limits, "memory"),
                cpu_request: quantity(requests, "cpu"),
                memory_request: quantity(requests, "memory"),
                ready: cs.map(|s| s.ready).unwrap_or(false),
                restart_count: cs.map(|s| s.restart_count).unwrap_or(0),
                waiting_reason: state
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.clone()),
                terminated_reason: state
                    .and_then(|s| s.terminated.as_ref())
                    .or_else(|| last_state.and_then(|s| s.terminated.as_ref()))
                    .and_then(|t| t.reason.clone()),
            }
        })
        .collect();

    PodInfo {
        name: pod.metadata.name.unwrap_or_default(),
        namespace: pod.metadata.namespace.unwrap_or_default(),
        node_name: spec.node_name,
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        labels: pod.metadata.labels.unwrap_or_default(),
        containers,
    }
}

fn workload_info(
    kind: WorkloadKind,
    meta: ObjectMeta,
    replicas: Option<i32>,
) -> WorkloadInfo {
    WorkloadInfo {
        kind,
        name: meta.name.unwrap_or_default(),
        namespace: meta.namespace.unwrap_or_default(),
        replicas,
        annotations: meta.annotations.unwrap_or_default(),
        labels: meta.labels.unwrap_or_default(),
    }
}

fn deployment_info(d: Deployment) -> WorkloadInfo {
    let replicas = d.spec.as_ref().and_then(|s| s.replicas);
    workload_info(WorkloadKind::Deployment, d.metadata, replicas)
}

fn statefulset_info(s: StatefulSet) -> WorkloadInfo {
    let replicas = s.spec.as_ref().and_then(|s| s.replicas);
    workload_info(WorkloadKind::StatefulSet, s.metadata, replicas)
}

#[async_trait]
impl ClusterAccessor for KubeCluster {
    async fn list_nodes(&self) -> ClusterResult<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(node_info).collect())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> ClusterResult<Vec<PodInfo>> {
        let pods: Api<Pod> = self.namespaced_or_all(namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = pods.list(&params).await?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<WorkloadInfo>> {
        let params = ListParams::default();
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = self.namespaced_or_all(namespace);
                let list = api.list(&params).await?;
                Ok(list.items.into_iter().map(deployment_info).collect())
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = self.namespaced_or_all(namespace);
                let list = api.list(&params).await?;
                Ok(list.items.into_iter().map(statefulset_info).collect())
            }
        }
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<WorkloadInfo> {
        let found = match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.map(deployment_info)
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.get_opt(name).await?.map(statefulset_info)
            }
        };
        found.ok_or_else(|| {
            ClusterError::not_found(kind.as_str(), crate::models::target_key(namespace, name))
        })
    }

    async fn set_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> ClusterResult<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        let params = PatchParams::default();
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
        }
        debug!(kind = %kind, namespace = %namespace, name = %name, replicas, "Patched replicas");
        Ok(())
    }

    async fn set_env_var(
        &self,
        namespace: &str,
        deployment: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let current = api.get_opt(deployment).await?.ok_or_else(|| {
            ClusterError::not_found("Deployment", crate::models::target_key(namespace, deployment))
        })?;

        let containers = current
            .spec
            .and_then(|s| s.template.spec)
            .map(|s| s.containers)
            .unwrap_or_default();

        // Strategic merge keys containers and env entries by name
        let patched: Vec<serde_json::Value> = containers
            .iter()
            .filter(|c| {
                c.env
                    .as_ref()
                    .map(|env| env.iter().any(|e| e.name == key))
                    .unwrap_or(false)
            })
            .map(|c| json!({ "name": c.name, "env": [{ "name": key, "value": value }] }))
            .collect();

        if patched.is_empty() {
            return Ok(false);
        }

        let patch = json!({ "spec": { "template": { "spec": { "containers": patched } } } });
        api.patch(deployment, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(true)
    }

    async fn pause_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<bool> {
        let workload = self.get_workload(kind, namespace, name).await?;
        let replicas = workload.replicas.unwrap_or(1);
        if replicas == 0 {
            return Ok(false);
        }

        let patch = json!({
            "metadata": { "annotations": { PAUSED_REPLICAS_ANNOTATION: replicas.to_string() } },
            "spec": { "replicas": 0 }
        });
        let params = PatchParams::default();
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Merge(&patch)).await?;
            }
        }
        Ok(true)
    }

    async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> ClusterResult<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default().stdout(true).stderr(false).stdin(false);
        let exec_err = |message: String| ClusterError::Exec {
            pod: crate::models::target_key(namespace, pod),
            message,
        };

        let run = async {
            let argv: Vec<String> = command.iter().map(|s| s.to_string()).collect();
            let mut attached = pods.exec(pod, argv, &params).await?;

            let mut stdout = String::new();
            if let Some(mut reader) = attached.stdout() {
                reader
                    .read_to_string(&mut stdout)
                    .await
                    .map_err(|e| exec_err(e.to_string()))?;
            }

            let status = match attached.take_status() {
                Some(status) => status.await,
                None => None,
            };
            attached
                .join()
                .await
                .map_err(|e| exec_err(e.to_string()))?;

            let success = status
                .and_then(|s| s.status)
                .map(|s| s == "Success")
                .unwrap_or(false);

            Ok::<_, ClusterError>(ExecOutput { stdout, success })
        };

        match tokio::time::timeout(EXEC_TIMEOUT, run).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout {
                operation: format!("exec in {}/{}", namespace, pod),
                secs: EXEC_TIMEOUT.as_secs(),
            }),
        }
    }

    async fn cordon_node(&self, name: &str) -> ClusterResult<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "spec": { "unschedulable": true } });
        nodes
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> ClusterResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> ClusterResult<Option<String>> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let value = maps
            .get_opt(name)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(key));
        Ok(value)
    }

    async fn write_config_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> ClusterResult<()> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        if maps.get_opt(name).await?.is_some() {
            let patch = json!({ "data": { key: value } });
            maps.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            return Ok(());
        }

        self.create_namespace(namespace).await?;
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            ..Default::default()
        };
        maps.create(&PostParams::default(), &cm).await?;
        Ok(())
    }

    async fn join_node(&self, ip: &str) -> ClusterResult<()> {
        self.provisioner.join(ip).await
    }

    async fn remove_node(&self, ip: &str) -> ClusterResult<()> {
        self.provisioner.remove(ip).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerState, ContainerStateWaiting, NodeAddress, NodeCondition, NodeStatus,
        PodSpec, PodStatus, ResourceRequirements,
    };

    #[test]
    fn test_node_info_extracts_ready_and_ip() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".into()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        address: "worker-1".into(),
                        type_: "Hostname".into(),
                    },
                    NodeAddress {
                        address: "10.0.0.7".into(),
                        type_: "InternalIP".into(),
                    },
                ]),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".into(),
                    status: "True".into(),
                    ..Default::default()
                }]),
                capacity: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("4".into())),
                    ("memory".to_string(), Quantity("8Gi".into())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = node_info(node);
        assert_eq!(info.name, "worker-1");
        assert_eq!(info.internal_ip.as_deref(), Some("10.0.0.7"));
        assert!(info.ready);
        assert!(!info.unschedulable);
        assert_eq!(info.cpu_capacity.as_deref(), Some("4"));
        assert_eq!(info.memory_capacity.as_deref(), Some("8Gi"));
    }

    #[test]
    fn test_pod_info_extracts_limits_and_waiting_reason() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-abc".into()),
                namespace: Some("shop".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-1".into()),
                containers: vec![Container {
                    name: "web".into(),
                    resources: Some(ResourceRequirements {
                        limits: Some(BTreeMap::from([
                            ("cpu".to_string(), Quantity("500m".into())),
                            ("memory".to_string(), Quantity("256Mi".into())),
                        ])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".into()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "web".into(),
                    ready: false,
                    restart_count: 4,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("CrashLoopBackOff".into()),
                            message: None,
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };

        let info = pod_info(pod);
        assert_eq!(info.namespace, "shop");
        assert!(info.is_running());
        let c = &info.containers[0];
        assert_eq!(c.cpu_limit.as_deref(), Some("500m"));
        assert_eq!(c.memory_limit.as_deref(), Some("256Mi"));
        assert_eq!(c.restart_count, 4);
        assert_eq!(c.waiting_reason.as_deref(), Some("CrashLoopBackOff"));
    }
}
