//! Cluster autopilot control plane
//!
//! This crate provides the core functionality for:
//! - A typed facade over the orchestrator API (real and simulated)
//! - Pod bandwidth and cluster utilisation sampling
//! - Bandwidth autoscaling, node capacity, load shedding and backend
//!   latency scheduling controllers
//! - Supervision of per-target control loops
//! - Health checks and observability

pub mod autoscaler;
pub mod cluster;
pub mod context;
pub mod error;
pub mod guard;
pub mod health;
pub mod load_shedder;
pub mod models;
pub mod node_capacity;
pub mod observability;
pub mod peer;
pub mod pod_health;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod supervisor;

pub use cluster::{ClusterAccessor, KubeCluster, SimulatedCluster, WorkloadKind};
pub use context::ControlContext;
pub use error::{ClusterError, PeerError, RegistrationError, SchedulerError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControlMetrics, StructuredLogger};
