//! Health tracking for the control plane
//!
//! Each controller reports its last cycle outcome here; the service
//! exposes the aggregate on `/healthz` and `/readyz`. A controller that
//! keeps failing is escalated from degraded to unhealthy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles before a component counts as unhealthy
pub const FAILURES_BEFORE_UNHEALTHY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last cycle failed; the controller keeps running
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>, consecutive_failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures,
            last_check: Utc::now(),
        }
    }
}

/// Aggregate served on `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Served on `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SUPERVISOR: &str = "supervisor";
    pub const AUTOSCALER: &str = "autoscaler";
    pub const NODE_CAPACITY: &str = "node_capacity";
    pub const LOAD_SHEDDER: &str = "load_shedder";
    pub const SCHEDULER: &str = "scheduler";
    pub const POD_HEALTH: &str = "pod_health";
    pub const STORE: &str = "store";

    pub const ALL: &[&str] = &[
        SUPERVISOR,
        AUTOSCALER,
        NODE_CAPACITY,
        LOAD_SHEDDER,
        SCHEDULER,
        POD_HEALTH,
        STORE,
    ];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

impl RegistryState {
    fn worst(&self) -> ComponentStatus {
        self.components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }

    fn failures(&self, name: &str) -> u32 {
        self.components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0)
    }
}

/// Shared, cloneable view of every component's health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set_healthy(name).await;
    }

    pub async fn register_all(&self) {
        for name in components::ALL {
            self.register(name).await;
        }
    }

    /// Record the outcome of a controller cycle.
    ///
    /// A success clears the failure streak; the
    /// [`FAILURES_BEFORE_UNHEALTHY`]th failure in a row marks the
    /// component unhealthy.
    pub async fn report<E: Display>(&self, name: &str, outcome: &Result<(), E>) {
        match outcome {
            Ok(()) => self.set_healthy(name).await,
            Err(e) => self.record_failure(name, e.to_string()).await,
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        let health = ComponentHealth::new(ComponentStatus::Healthy, None, 0);
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    /// Count a failed cycle and keep the component degraded or worse
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.record_failure(name, message.into()).await;
    }

    /// Mark a component unhealthy immediately
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut state = self.state.write().await;
        let failures = state.failures(name).saturating_add(1);
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(ComponentStatus::Unhealthy, Some(message.into()), failures),
        );
    }

    async fn record_failure(&self, name: &str, message: String) {
        let mut state = self.state.write().await;
        let failures = state.failures(name).saturating_add(1);
        let status = if failures >= FAILURES_BEFORE_UNHEALTHY {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        state.components.insert(
            name.to_string(),
            ComponentHealth::new(status, Some(message), failures),
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: state.worst(),
            components: state.components.clone(),
        }
    }

    /// Ready once started, and while no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Control plane not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}
