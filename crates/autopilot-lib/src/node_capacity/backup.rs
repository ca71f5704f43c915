//! Backup node pool persisted in a ConfigMap
//!
//! The pool is a JSON array of IP strings under the `nodes` key.

use crate::cluster::ClusterAccessor;
use crate::error::{ClusterError, ClusterResult};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

const NODES_KEY: &str = "nodes";

pub struct BackupNodeStore {
    cluster: Arc<dyn ClusterAccessor>,
    namespace: String,
    name: String,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl BackupNodeStore {
    pub fn new(
        cluster: Arc<dyn ClusterAccessor>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            name: name.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Current pool in stored order; a missing object is an empty pool
    pub async fn list(&self) -> ClusterResult<Vec<String>> {
        let raw = self
            .cluster
            .read_config_value(&self.namespace, &self.name, NODES_KEY)
            .await?;
        match raw {
            None => Ok(Vec::new()),
            Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                ClusterError::InvalidObject(format!(
                    "{}/{} key {} is not a JSON list of IPs: {}",
                    self.namespace, self.name, NODES_KEY, e
                ))
            }),
        }
    }

    /// Append an IP. Returns false when it was already present.
    pub async fn add(&self, ip: &str) -> ClusterResult<bool> {
        let ip = validate_ip(ip)?;
        let _lock = self.write_lock.lock().await;
        let mut nodes = self.list().await?;
        if nodes.iter().any(|n| n == &ip) {
            return Ok(false);
        }
        nodes.push(ip);
        self.save(&nodes).await?;
        Ok(true)
    }

    /// Drop an IP. Returns false when it was not present.
    pub async fn remove(&self, ip: &str) -> ClusterResult<bool> {
        let _lock = self.write_lock.lock().await;
        let mut nodes = self.list().await?;
        let before = nodes.len();
        nodes.retain(|n| n != ip.trim());
        if nodes.len() == before {
            return Ok(false);
        }
        self.save(&nodes).await?;
        Ok(true)
    }

    async fn save(&self, nodes: &[String]) -> ClusterResult<()> {
        let raw = serde_json::to_string(nodes)
            .map_err(|e| ClusterError::InvalidObject(e.to_string()))?;
        self.cluster
            .write_config_value(&self.namespace, &self.name, NODES_KEY, &raw)
            .await
    }
}

fn validate_ip(ip: &str) -> ClusterResult<String> {
    let ip = ip.trim();
    ip.parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| ClusterError::InvalidObject(format!("{:?} is not an IP address", ip)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SimulatedCluster;

    fn store() -> (Arc<SimulatedCluster>, BackupNodeStore) {
        let cluster = Arc::new(SimulatedCluster::new());
        let store = BackupNodeStore::new(cluster.clone(), "autopilot-system", "backup-nodes");
        (cluster, store)
    }

    #[tokio::test]
    async fn test_missing_config_is_empty_pool() {
        let (_cluster, store) = store();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_is_idempotent_and_ordered() {
        let (_cluster, store) = store();
        assert!(store.add("10.0.0.7").await.unwrap());
        assert!(store.add(" 10.0.0.3 ").await.unwrap());
        assert!(!store.add("10.0.0.7").await.unwrap());

        assert_eq!(store.list().await.unwrap(), vec!["10.0.0.7", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let (_cluster, store) = store();
        store.add("10.0.0.7").await.unwrap();

        assert!(!store.remove("10.0.0.8").await.unwrap());
        assert!(store.remove("10.0.0.7").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_ip() {
        let (_cluster, store) = store();
        assert!(matches!(
            store.add("node-a").await,
            Err(ClusterError::InvalidObject(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_reported() {
        let (cluster, store) = store();
        cluster
            .write_config_value("autopilot-system", "backup-nodes", NODES_KEY, "{not json")
            .await
            .unwrap();
        assert!(store.list().await.is_err());
    }
}
