use super::*;
use crate::cluster::{Actuation, ClusterAccessor, FailPoint, SimulatedCluster};

const NS: &str = "autopilot-system";
const CM: &str = "backup-nodes";

/// One 4-core/8Gi node running a pod with the given limits
fn cluster_at(cpu_limit: &str, mem_limit: &str) -> Arc<SimulatedCluster> {
    let cluster = Arc::new(SimulatedCluster::new());
    cluster.add_node(SimulatedCluster::node("core-1", "10.0.0.1", "4", "8Gi"));
    cluster.add_pod(SimulatedCluster::pod(
        "shop",
        "web-0",
        "Running",
        &[],
        Some(cpu_limit),
        Some(mem_limit),
    ));
    cluster
}

async fn controller_with(
    cluster: Arc<SimulatedCluster>,
    backup: &[&str],
) -> NodeCapacityController {
    let store = Arc::new(BackupNodeStore::new(cluster.clone(), NS, CM));
    for ip in backup {
        store.add(ip).await.unwrap();
    }
    cluster.clear_actuations();
    NodeCapacityController::new(
        NodeCapacityConfig::default(),
        ControlContext::new(cluster, "test"),
        store,
    )
}

fn util(cpu: f64, mem: f64) -> ResourceUtilization {
    ResourceUtilization {
        cpu_percent: cpu,
        mem_percent: mem,
    }
}

fn joins_and_removals(cluster: &SimulatedCluster) -> Vec<Actuation> {
    cluster
        .actuations()
        .into_iter()
        .filter(|a| matches!(a, Actuation::JoinNode { .. } | Actuation::RemoveNode { .. }))
        .collect()
}

#[test]
fn test_partition_by_internal_ip() {
    let nodes = vec![
        SimulatedCluster::node("core-1", "10.0.0.1", "4", "8Gi"),
        SimulatedCluster::node("extra-1", "10.0.0.9", "4", "8Gi"),
    ];
    let backup = vec!["10.0.0.8".to_string(), "10.0.0.9".to_string()];

    let partition = partition_backup(&backup, &nodes);
    assert_eq!(partition.outside, vec!["10.0.0.8"]);
    assert_eq!(partition.inside, vec!["10.0.0.9"]);
}

#[test]
fn test_decide_scale_out_needs_outside_nodes() {
    let config = NodeCapacityConfig::default();
    let empty = BackupPartition {
        outside: vec![],
        inside: vec!["10.0.0.9".into()],
    };
    assert_eq!(
        decide_capacity(&util(99.0, 99.0), &empty, &config),
        CapacityDecision::Hold
    );

    let partition = BackupPartition {
        outside: vec!["10.0.0.8".into(), "10.0.0.7".into()],
        inside: vec![],
    };
    assert_eq!(
        decide_capacity(&util(10.0, 71.0), &partition, &config),
        CapacityDecision::ScaleOut("10.0.0.8".into())
    );
}

#[test]
fn test_decide_scale_in_needs_both_below() {
    let config = NodeCapacityConfig::default();
    let partition = BackupPartition {
        outside: vec![],
        inside: vec!["10.0.0.8".into(), "10.0.0.9".into()],
    };
    assert_eq!(
        decide_capacity(&util(10.0, 20.0), &partition, &config),
        CapacityDecision::Hold
    );
    assert_eq!(
        decide_capacity(&util(10.0, 10.0), &partition, &config),
        CapacityDecision::ScaleIn(vec!["10.0.0.8".into(), "10.0.0.9".into()])
    );
}

#[tokio::test]
async fn test_overloaded_cluster_joins_first_outside_node() {
    let cluster = cluster_at("3500m", "1Gi");
    let controller = controller_with(cluster.clone(), &["10.0.0.8", "10.0.0.7"]).await;

    let report = controller.reconcile().await.unwrap();
    assert_eq!(report.joined.as_deref(), Some("10.0.0.8"));
    assert_eq!(
        joins_and_removals(&cluster),
        vec![Actuation::JoinNode {
            ip: "10.0.0.8".into()
        }]
    );
}

#[tokio::test]
async fn test_no_scale_out_without_outside_nodes() {
    let cluster = cluster_at("3500m", "7Gi");
    let controller = controller_with(cluster.clone(), &[]).await;

    let report = controller.reconcile().await.unwrap();
    assert!(report.joined.is_none());
    assert!(joins_and_removals(&cluster).is_empty());
}

#[tokio::test]
async fn test_idle_cluster_removes_only_backup_members() {
    let cluster = cluster_at("100m", "100Mi");
    cluster.add_node(SimulatedCluster::node("extra-1", "10.0.0.8", "4", "8Gi"));
    cluster.add_node(SimulatedCluster::node("extra-2", "10.0.0.9", "4", "8Gi"));
    let controller = controller_with(cluster.clone(), &["10.0.0.9", "10.0.0.8", "10.0.0.5"]).await;

    let report = controller.reconcile().await.unwrap();
    assert_eq!(report.removed, vec!["10.0.0.9", "10.0.0.8"]);

    let remaining: Vec<String> = cluster.nodes().into_iter().map(|n| n.name).collect();
    assert_eq!(remaining, vec!["core-1"]);
}

#[tokio::test]
async fn test_removal_failure_aborts_cycle() {
    let cluster = cluster_at("100m", "100Mi");
    cluster.add_node(SimulatedCluster::node("extra-1", "10.0.0.8", "4", "8Gi"));
    let controller = controller_with(cluster.clone(), &["10.0.0.8"]).await;
    cluster.fail(FailPoint::RemoveNode);

    assert!(controller.reconcile().await.is_err());
    assert_eq!(cluster.nodes().len(), 2);
    assert!(!controller.guard.is_busy());
}

#[tokio::test]
async fn test_ready_backup_nodes_are_cordoned() {
    let cluster = cluster_at("2", "4Gi");
    cluster.add_node(SimulatedCluster::node("extra-1", "10.0.0.8", "4", "8Gi"));
    let controller = controller_with(cluster.clone(), &["10.0.0.8"]).await;

    let report = controller.reconcile().await.unwrap();
    assert_eq!(report.cordoned, vec!["extra-1"]);

    // Already cordoned nodes are left alone
    let report = controller.reconcile().await.unwrap();
    assert!(report.cordoned.is_empty());
    assert!(!cluster
        .nodes()
        .iter()
        .find(|n| n.name == "core-1")
        .unwrap()
        .unschedulable);
}

#[tokio::test]
async fn test_utilization_failure_skips_cycle() {
    let cluster = cluster_at("3500m", "7Gi");
    let controller = controller_with(cluster.clone(), &["10.0.0.8"]).await;
    cluster.fail(FailPoint::ListPods);

    assert!(controller.reconcile().await.is_err());
    assert!(joins_and_removals(&cluster).is_empty());
}

#[tokio::test]
async fn test_busy_cycle_is_skipped() {
    let cluster = cluster_at("3500m", "7Gi");
    let controller = controller_with(cluster.clone(), &["10.0.0.8"]).await;

    let _held = controller.guard.try_enter();
    let report = controller.reconcile().await.unwrap();
    assert!(report.skipped);
    assert!(joins_and_removals(&cluster).is_empty());
}

#[tokio::test]
async fn test_manual_add_and_delete() {
    let cluster = cluster_at("1", "1Gi");
    let controller = controller_with(cluster.clone(), &[]).await;

    controller.add_node("10.0.0.20").await.unwrap();
    assert!(cluster
        .list_nodes()
        .await
        .unwrap()
        .iter()
        .any(|n| n.internal_ip.as_deref() == Some("10.0.0.20")));

    controller.delete_node("10.0.0.20").await.unwrap();
    assert_eq!(cluster.nodes().len(), 1);
}
