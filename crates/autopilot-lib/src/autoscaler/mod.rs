//! Bandwidth Autoscaler Controller
//!
//! One instance per annotated deployment. Each cycle samples the
//! deployment's throughput, compares the per-replica load against the
//! annotated ceiling and the fixed hysteresis floor, and moves the replica
//! count by one, gated by a per-target cooldown.

use crate::cluster::{WorkloadKind, PAUSED_REPLICAS_ANNOTATION};
use crate::context::ControlContext;
use crate::error::{ClusterError, ClusterResult};
use crate::guard::CycleGuard;
use crate::health::components;
use crate::models::{target_key, ScaleAction, ScaleEvent, ScalingTarget};
use crate::observability::controllers;
use crate::sampler::MetricsSampler;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration shared by every autoscaler loop
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// Delay between cycles (default: 60 seconds)
    pub interval: Duration,
    /// Gap between the two counter reads (default: 2 seconds)
    pub sampling_interval: Duration,
    /// Minimum time between two scaling actions (default: 120 seconds)
    pub cooldown: Duration,
    /// Scale events kept per target (default: 10)
    pub history_capacity: usize,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            sampling_interval: Duration::from_secs(2),
            cooldown: Duration::from_secs(120),
            history_capacity: 10,
        }
    }
}

/// Bounded record of applied scale events, oldest first
#[derive(Debug, Clone)]
pub struct ScaleHistory {
    events: VecDeque<ScaleEvent>,
    capacity: usize,
}

impl ScaleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, event: ScaleEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn last(&self) -> Option<&ScaleEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time left before another action is allowed, `None` when allowed
    pub fn cooldown_remaining(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        let last = self.last()?;
        let elapsed = now.saturating_duration_since(last.at);
        if elapsed >= cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }

    pub fn snapshot(&self) -> Vec<ScaleEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Propose a one-step replica change, or `None` inside the band.
///
/// Expects `min_replicas <= current <= max_replicas`.
pub fn decide(
    target: &ScalingTarget,
    current: i32,
    per_replica_kbps: f64,
) -> Option<(ScaleAction, i32)> {
    if per_replica_kbps > target.threshold_kbps && current < target.max_replicas {
        let to = (current + 1).clamp(target.min_replicas, target.max_replicas);
        Some((ScaleAction::ScaleUp, to))
    } else if per_replica_kbps < target.min_rate_kbps() && current > target.min_replicas {
        let to = (current - 1).clamp(target.min_replicas, target.max_replicas);
        Some((ScaleAction::ScaleDown, to))
    } else {
        None
    }
}

/// Per-replica load, treating zero replicas as one
pub fn per_replica_load(total_kbps: f64, replicas: i32) -> f64 {
    total_kbps / f64::from(replicas.max(1))
}

/// What a single cycle did
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Previous cycle for this target was still running
    Busy,
    /// Annotations missing or unparseable
    NotConfigured,
    /// Workload is paused by the load shedder
    Paused,
    /// Annotated bounds are unusable (min above max, or negative)
    InvalidBounds { min_replicas: i32, max_replicas: i32 },
    /// Load within the hysteresis band, or already at the bound
    Held { per_replica_kbps: f64 },
    /// An action was proposed but the cooldown had not elapsed
    Suppressed {
        action: ScaleAction,
        remaining: Duration,
    },
    /// Replica count was changed
    Scaled(ScaleEvent),
}

/// Autoscaler for one deployment
pub struct BandwidthAutoscaler {
    deployment: String,
    namespace: String,
    config: AutoscalerConfig,
    ctx: ControlContext,
    sampler: MetricsSampler,
    history: RwLock<ScaleHistory>,
    guard: CycleGuard,
}

impl BandwidthAutoscaler {
    pub fn new(
        deployment: impl Into<String>,
        namespace: impl Into<String>,
        config: AutoscalerConfig,
        ctx: ControlContext,
    ) -> Self {
        let history = ScaleHistory::new(config.history_capacity);
        Self {
            deployment: deployment.into(),
            namespace: namespace.into(),
            sampler: MetricsSampler::new(ctx.cluster.clone()),
            config,
            ctx,
            history: RwLock::new(history),
            guard: CycleGuard::new(),
        }
    }

    pub fn key(&self) -> String {
        target_key(&self.namespace, &self.deployment)
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read-only copy of the scale history
    pub async fn history(&self) -> Vec<ScaleEvent> {
        self.history.read().await.snapshot()
    }

    /// Run one cycle.
    ///
    /// Errors leave the history untouched; the next cycle retries.
    pub async fn reconcile(&self) -> ClusterResult<CycleOutcome> {
        let Some(_ticket) = self.guard.try_enter() else {
            self.ctx.metrics.inc_cycles_skipped(controllers::AUTOSCALER);
            return Ok(CycleOutcome::Busy);
        };

        let started = Instant::now();
        let outcome = self.run_cycle().await;
        self.ctx
            .metrics
            .observe_reconcile(controllers::AUTOSCALER, started.elapsed().as_secs_f64());
        outcome
    }

    async fn run_cycle(&self) -> ClusterResult<CycleOutcome> {
        let workload = self
            .ctx
            .cluster
            .get_workload(WorkloadKind::Deployment, &self.namespace, &self.deployment)
            .await?;

        let Some(target) =
            ScalingTarget::from_annotations(&self.deployment, &self.namespace, &workload.annotations)
        else {
            debug!(target = %self.key(), "Deployment lacks bandwidth annotations, skipping");
            return Ok(CycleOutcome::NotConfigured);
        };

        if target.min_replicas < 0 || target.min_replicas > target.max_replicas {
            warn!(
                target = %self.key(),
                min_replicas = target.min_replicas,
                max_replicas = target.max_replicas,
                "Replica bounds are invalid, skipping"
            );
            return Ok(CycleOutcome::InvalidBounds {
                min_replicas: target.min_replicas,
                max_replicas: target.max_replicas,
            });
        }

        if workload.annotations.contains_key(PAUSED_REPLICAS_ANNOTATION) {
            debug!(target = %self.key(), "Deployment is paused, skipping");
            return Ok(CycleOutcome::Paused);
        }

        let current = workload.replicas.ok_or_else(|| {
            ClusterError::InvalidObject(format!("{} has no replica count", self.key()))
        })?;

        // Outside the annotated bounds: restore them regardless of load, still under cooldown
        let bounded = current.clamp(target.min_replicas, target.max_replicas);
        if bounded != current {
            let action = if bounded > current {
                ScaleAction::ScaleUp
            } else {
                ScaleAction::ScaleDown
            };
            info!(
                target = %self.key(),
                replicas = current,
                bounded = bounded,
                "Replica count outside annotated bounds"
            );
            if let Some(remaining) = self.cooldown_remaining().await {
                self.ctx
                    .logger
                    .log_scale_suppressed(&self.key(), action.as_str(), remaining.as_secs());
                return Ok(CycleOutcome::Suppressed { action, remaining });
            }
            let event = self.apply(action, current, bounded, 0.0).await?;
            return Ok(CycleOutcome::Scaled(event));
        }

        let reading = self
            .sampler
            .app_bandwidth_kbps(&self.deployment, &self.namespace, self.config.sampling_interval)
            .await?;
        let per_replica_kbps = per_replica_load(reading.total_kbps, current);

        debug!(
            target = %self.key(),
            replicas = current,
            total_kbps = reading.total_kbps,
            per_replica_kbps = per_replica_kbps,
            max_rate_kbps = target.threshold_kbps,
            min_rate_kbps = target.min_rate_kbps(),
            "Sampled target bandwidth"
        );

        let Some((action, to)) = decide(&target, current, per_replica_kbps) else {
            return Ok(CycleOutcome::Held { per_replica_kbps });
        };

        if let Some(remaining) = self.cooldown_remaining().await {
            self.ctx
                .logger
                .log_scale_suppressed(&self.key(), action.as_str(), remaining.as_secs());
            return Ok(CycleOutcome::Suppressed { action, remaining });
        }

        let event = self.apply(action, current, to, per_replica_kbps).await?;
        Ok(CycleOutcome::Scaled(event))
    }

    async fn cooldown_remaining(&self) -> Option<Duration> {
        self.history
            .read()
            .await
            .cooldown_remaining(Instant::now(), self.config.cooldown)
    }

    async fn apply(
        &self,
        action: ScaleAction,
        from: i32,
        to: i32,
        per_replica_kbps: f64,
    ) -> ClusterResult<ScaleEvent> {
        self.ctx
            .cluster
            .set_replicas(WorkloadKind::Deployment, &self.namespace, &self.deployment, to)
            .await?;

        let event = ScaleEvent {
            time: chrono::Utc::now(),
            action,
            from_replicas: from,
            to_replicas: to,
            trigger_rate_kbps: per_replica_kbps,
            at: Instant::now(),
        };
        self.history.write().await.record(event.clone());

        self.ctx.metrics.inc_scale_event(action.as_str());
        self.ctx
            .logger
            .log_scale_event(&self.key(), action.as_str(), from, to, per_replica_kbps);
        Ok(event)
    }

    /// Run cycles until cancelled.
    ///
    /// Cancellation is observed between cycles; an in-flight cycle always
    /// completes first.
    pub async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        info!(
            target = %self.key(),
            interval_secs = self.config.interval.as_secs(),
            "Starting bandwidth autoscaler loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile().await {
                        Ok(_) => self.ctx.health.set_healthy(components::AUTOSCALER).await,
                        Err(e) => {
                            warn!(target = %self.key(), error = %e, "Autoscaler cycle failed");
                            self.ctx
                                .health
                                .set_degraded(components::AUTOSCALER, format!("{}: {}", self.key(), e))
                                .await;
                        }
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(target = %self.key(), "Stopping bandwidth autoscaler loop");
                        break;
                    }
                }
            }
        }
    }
}
