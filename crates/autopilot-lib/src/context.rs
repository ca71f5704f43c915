//! Shared handles passed to every controller

use crate::cluster::ClusterAccessor;
use crate::health::HealthRegistry;
use crate::observability::{ControlMetrics, StructuredLogger};
use std::sync::Arc;

#[derive(Clone)]
pub struct ControlContext {
    pub cluster: Arc<dyn ClusterAccessor>,
    pub metrics: ControlMetrics,
    pub logger: StructuredLogger,
    pub health: HealthRegistry,
}

impl ControlContext {
    pub fn new(cluster: Arc<dyn ClusterAccessor>, instance: impl Into<String>) -> Self {
        Self {
            cluster,
            metrics: ControlMetrics::new(),
            logger: StructuredLogger::new(instance),
            health: HealthRegistry::new(),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }
}
