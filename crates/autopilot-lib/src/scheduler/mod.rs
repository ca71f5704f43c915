//! Backend Latency Scheduler
//!
//! Probes every backend peer, and once each has a full window of samples
//! moves registered applications to the peer with the lowest mean latency.
//! A migration advances step by step and halts in place at the first
//! failure; `current_backend` only changes after every step succeeded.

mod registration;

pub use registration::{validate_ports, RegisterAppRequest, PORT_MAX, PORT_MIN};

use crate::context::ControlContext;
use crate::error::SchedulerError;
use crate::guard::CycleGuard;
use crate::health::components;
use crate::models::AppRegistration;
use crate::observability::controllers;
use crate::peer::{DeployRequest, PeerClient};
use crate::store::SchedulingStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay between reconciles (default: 60 seconds)
    pub interval: Duration,
    /// Samples every peer needs before a backend is selected (default: 5)
    pub min_samples: usize,
    /// Latency recorded for a failed probe, in milliseconds (default: 1,000,000)
    pub timeout_sentinel_ms: f64,
    /// Directory holding application bundles on the peers (default: /root/.mxapps)
    pub bundle_root: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_samples: 5,
            timeout_sentinel_ms: 1_000_000.0,
            bundle_root: "/root/.mxapps".to_string(),
        }
    }
}

/// Latency samples per peer, in milliseconds
pub type LatencyTable = BTreeMap<String, Vec<f64>>;

/// Sample windows tagged with the peer set they were measured against
#[derive(Debug, Default)]
struct SampleWindows {
    generation: u64,
    table: LatencyTable,
}

impl SampleWindows {
    fn reset_for_peer_change(&mut self) {
        self.generation += 1;
        self.table.clear();
    }
}

/// Mean latency of a sample list
pub fn mean_latency(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Pick the peer with the lowest mean latency.
///
/// `None` while any peer has fewer than `min_samples` samples. On equal
/// means the peer listed first wins.
pub fn select_best_backend(
    peers: &[String],
    samples: &LatencyTable,
    min_samples: usize,
) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for peer in peers {
        let peer_samples = samples.get(peer).map(Vec::as_slice).unwrap_or(&[]);
        if peer_samples.len() < min_samples.max(1) {
            return None;
        }
        let mean = mean_latency(peer_samples)?;
        match best {
            Some((_, best_mean)) if mean >= best_mean => {}
            _ => best = Some((peer, mean)),
        }
    }
    best.map(|(peer, _)| peer.clone())
}

/// Migration steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// New backend deploys the mirrored bundle
    Deploy,
    /// Primary deployment's routing variable points at the new backend
    Route,
    /// Old backend deletes the application
    Teardown,
    /// Registration records the new backend
    Record,
}

impl MigrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::Deploy => "deploy",
            MigrationStep::Route => "route",
            MigrationStep::Teardown => "teardown",
            MigrationStep::Record => "record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationResult {
    Completed,
    Aborted { step: MigrationStep, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub app_name: String,
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub result: MigrationResult,
}

/// What one reconcile did
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleReport {
    /// Previous reconcile was still running
    pub skipped: bool,
    /// Selected backend; `None` while still collecting samples
    pub best_backend: Option<String>,
    pub latency: LatencyTable,
    pub migrations: Vec<MigrationOutcome>,
}

pub struct BackendScheduler {
    config: SchedulerConfig,
    ctx: ControlContext,
    store: SchedulingStore,
    peers: Arc<dyn PeerClient>,
    samples: Mutex<SampleWindows>,
    guard: CycleGuard,
}

impl BackendScheduler {
    pub fn new(
        config: SchedulerConfig,
        ctx: ControlContext,
        store: SchedulingStore,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            config,
            ctx,
            store,
            peers,
            samples: Mutex::new(SampleWindows::default()),
            guard: CycleGuard::new(),
        }
    }

    pub fn store(&self) -> &SchedulingStore {
        &self.store
    }

    /// Add a peer; a new peer resets every sample window
    pub async fn register_backend(&self, ip: &str) -> Result<bool, SchedulerError> {
        let added = self.store.add_backend(ip).await?;
        if added {
            self.samples.lock().await.reset_for_peer_change();
            info!(peer = %ip, "Registered backend peer");
        }
        Ok(added)
    }

    /// Remove a peer; a removal resets every sample window
    pub async fn delete_backend(&self, ip: &str) -> Result<bool, SchedulerError> {
        let removed = self.store.remove_backend(ip).await?;
        if removed {
            self.samples.lock().await.reset_for_peer_change();
            info!(peer = %ip, "Deleted backend peer");
        }
        Ok(removed)
    }

    pub async fn backends(&self) -> Result<Vec<String>, SchedulerError> {
        Ok(self.store.list_backends().await?)
    }

    /// Current sample table
    pub async fn latency_table(&self) -> LatencyTable {
        self.samples.lock().await.table.clone()
    }

    /// Probe every peer once and append the result to its window.
    ///
    /// Measurements are dropped when the peer set changed mid-probe.
    pub async fn test_latency(&self) -> Result<LatencyTable, SchedulerError> {
        let generation = self.samples.lock().await.generation;
        let peers = self.store.list_backends().await?;
        let mut measured = Vec::with_capacity(peers.len());
        for peer in &peers {
            let latency_ms = match self.peers.ping(peer).await {
                Ok(elapsed) => elapsed.as_secs_f64() * 1000.0,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Latency probe failed");
                    self.config.timeout_sentinel_ms
                }
            };
            measured.push((peer.clone(), latency_ms));
        }

        let mut samples = self.samples.lock().await;
        if samples.generation != generation {
            debug!(peers = peers.len(), "Peer set changed during probe, discarding samples");
            return Ok(samples.table.clone());
        }
        for (peer, latency_ms) in measured {
            samples.table.entry(peer).or_default().push(latency_ms);
        }
        Ok(samples.table.clone())
    }

    /// Probe, select, and migrate. Skipped while a previous reconcile runs.
    pub async fn reconcile(&self) -> Result<ScheduleReport, SchedulerError> {
        let Some(_ticket) = self.guard.try_enter() else {
            self.ctx.metrics.inc_cycles_skipped(controllers::SCHEDULER);
            return Ok(ScheduleReport {
                skipped: true,
                ..Default::default()
            });
        };

        let started = Instant::now();
        let report = self.run_cycle().await;
        self.ctx
            .metrics
            .observe_reconcile(controllers::SCHEDULER, started.elapsed().as_secs_f64());
        report
    }

    async fn run_cycle(&self) -> Result<ScheduleReport, SchedulerError> {
        let latency = self.test_latency().await?;
        let peers = self.store.list_backends().await?;

        let Some(best) = select_best_backend(&peers, &latency, self.config.min_samples) else {
            debug!(peers = peers.len(), "Collecting latency samples");
            return Ok(ScheduleReport {
                latency,
                ..Default::default()
            });
        };
        self.samples.lock().await.table.clear();
        debug!(best_backend = %best, "Selected backend");

        let mut migrations = Vec::new();
        for app in self.store.list_apps().await? {
            if app.current_backend == best {
                continue;
            }
            migrations.push(self.migrate(&app, &best).await);
        }

        Ok(ScheduleReport {
            skipped: false,
            best_backend: Some(best),
            latency,
            migrations,
        })
    }

    /// Move one registration to `target`, halting at the first failed step
    pub async fn migrate(&self, app: &AppRegistration, target: &str) -> MigrationOutcome {
        let result = match self.migration_steps(app, target).await {
            Ok(()) => {
                self.ctx.metrics.inc_migrations_completed();
                self.ctx
                    .logger
                    .log_migration_completed(&app.app_name, &app.current_backend, target);
                MigrationResult::Completed
            }
            Err((step, reason)) => {
                self.ctx.metrics.inc_migrations_aborted(step.as_str());
                self.ctx
                    .logger
                    .log_migration_aborted(&app.app_name, step.as_str(), &reason);
                MigrationResult::Aborted { step, reason }
            }
        };

        MigrationOutcome {
            app_name: app.app_name.clone(),
            from: app.current_backend.clone(),
            to: target.to_string(),
            result,
        }
    }

    async fn migration_steps(
        &self,
        app: &AppRegistration,
        target: &str,
    ) -> Result<(), (MigrationStep, String)> {
        let request = DeployRequest::for_registration(app, &self.config.bundle_root);
        self.peers
            .deploy_app(target, &request)
            .await
            .map_err(|e| (MigrationStep::Deploy, e.to_string()))?;
        self.step_done(app, MigrationStep::Deploy, target);

        let routed = self
            .ctx
            .cluster
            .set_env_var(&app.namespace, &app.app_name, &app.routing_env_key, target)
            .await
            .map_err(|e| (MigrationStep::Route, e.to_string()))?;
        if !routed {
            return Err((
                MigrationStep::Route,
                format!("no container declares {}", app.routing_env_key),
            ));
        }
        self.step_done(app, MigrationStep::Route, target);

        self.peers
            .delete_app(&app.current_backend, &app.namespace, &app.app_name)
            .await
            .map_err(|e| (MigrationStep::Teardown, e.to_string()))?;
        self.step_done(app, MigrationStep::Teardown, &app.current_backend);

        self.store
            .update_current_backend(&app.app_name, &app.namespace, target)
            .await
            .map_err(|e| (MigrationStep::Record, e.to_string()))?;
        Ok(())
    }

    fn step_done(&self, app: &AppRegistration, step: MigrationStep, backend: &str) {
        self.ctx
            .logger
            .log_migration_step(&app.app_name, step.as_str(), backend);
    }

    /// Validate and store a registration
    pub async fn register_app(
        &self,
        request: RegisterAppRequest,
    ) -> Result<AppRegistration, SchedulerError> {
        let registration = request.validate()?;
        self.store.insert_app(&registration).await?;
        info!(
            app = %registration.app_name,
            namespace = %registration.namespace,
            backend = %registration.current_backend,
            "Registered application"
        );
        Ok(registration)
    }

    pub async fn delete_app(&self, app_name: &str, namespace: &str) -> Result<bool, SchedulerError> {
        Ok(self.store.delete_app(app_name, namespace).await?)
    }

    pub async fn apps(&self) -> Result<Vec<AppRegistration>, SchedulerError> {
        Ok(self.store.list_apps().await?)
    }

    /// Point a deployment's routing variable at `backend` without touching
    /// the registration. Returns false when no container declares the key.
    pub async fn change_deploy_env(
        &self,
        app_name: &str,
        namespace: &str,
        env_key: &str,
        backend: &str,
    ) -> Result<bool, SchedulerError> {
        Ok(self
            .ctx
            .cluster
            .set_env_var(namespace, app_name, env_key, backend)
            .await?)
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            min_samples = self.config.min_samples,
            "Starting backend scheduler loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.reconcile().await.map(|_| ());
                    if let Err(e) = &outcome {
                        warn!(error = %e, "Scheduler reconcile failed");
                    }
                    self.ctx.health.report(components::SCHEDULER, &outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down backend scheduler loop");
                    break;
                }
            }
        }
    }
}
