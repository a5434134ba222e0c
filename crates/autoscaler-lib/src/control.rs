//! Control loop
//!
//! One scaling check fetches telemetry and the pool listing in parallel,
//! decides, gates scale-down on the cooldown, and hands the target to the
//! reconciler. The loop keeps no state between checks besides the activity
//! record held by the activity store, so overlapping checks (timer and
//! manual trigger) need no coordination.

use crate::config::ScalingConfig;
use crate::cooldown::{cooldown_status, CooldownController};
use crate::decision::decide;
use crate::error::{Result, ScalerError};
use crate::health::{components, HealthRegistry};
use crate::models::{
    PoolInstance, ScalingAction, ScalingDecision, ScalingInfo, WorkerPoolCount, WorkerSnapshot,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::reconciler::{PoolReconciler, ReconcileOutcome};
use crate::sources::{ActivityStore, OrchestrationProvider, PoolInspector, TelemetrySource};
use crate::telemetry::fetch_worker_stats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default period of the timer-driven check
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// What a check did after deciding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleOutcome {
    NoAction,
    Executed {
        reconcile: ReconcileOutcome,
    },
    /// Scale-down suppressed by the cooldown window
    Blocked {
        #[serde(rename = "remainingCooldownSeconds")]
        remaining_cooldown_seconds: u64,
    },
}

/// Result of one scaling check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub decision: ScalingDecision,
    pub forced: bool,
    pub outcome: CycleOutcome,
    pub worker_stats: Vec<WorkerSnapshot>,
    pub current_workers: WorkerPoolCount,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    pub fn is_blocked(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Blocked { .. })
    }
}

/// The autoscaler's control loop, shared by the timer and the HTTP trigger
pub struct ControlLoop {
    config: ScalingConfig,
    queue: String,
    pool: String,
    telemetry: Arc<dyn TelemetrySource>,
    inspector: Arc<dyn PoolInspector>,
    cooldown: CooldownController,
    reconciler: PoolReconciler,
    metrics: ScalerMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
}

impl ControlLoop {
    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Run one scaling check
    ///
    /// With `force`, a scale-down skips the cooldown gate; the reconciler
    /// path is otherwise identical.
    pub async fn check(&self, force: bool) -> Result<CycleReport> {
        let started = Instant::now();
        let result = self.run_check(force).await;
        self.metrics
            .observe_cycle_latency(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            self.metrics.inc_cycle_errors();
            self.logger.log_cycle_failed(e);
        }
        result
    }

    async fn run_check(&self, force: bool) -> Result<CycleReport> {
        let (worker_stats, instances) =
            tokio::try_join!(self.fetch_stats(), self.list_instances())?;

        let current_workers = WorkerPoolCount::classify(&instances);
        self.metrics.set_pool_state(&worker_stats, &current_workers);

        let decision = decide(&worker_stats, &current_workers, &self.config);
        self.metrics.record_decision(&decision);
        self.logger.log_decision(&decision, &current_workers);

        if force && decision.action != ScalingAction::NoAction {
            self.logger.log_forced(decision.action);
        }

        let outcome = match decision.action {
            ScalingAction::NoAction => CycleOutcome::NoAction,
            ScalingAction::ScaleUp => self.execute(&instances, &decision, force).await?,
            ScalingAction::ScaleDown => {
                let remaining = if force {
                    None
                } else {
                    self.cooldown_remaining().await?
                };

                match remaining {
                    Some(remaining_cooldown_seconds) => {
                        self.metrics.inc_cooldown_blocks();
                        self.logger.log_scale_down_blocked(
                            decision.target_replicas,
                            remaining_cooldown_seconds,
                        );
                        CycleOutcome::Blocked {
                            remaining_cooldown_seconds,
                        }
                    }
                    None => self.execute(&instances, &decision, force).await?,
                }
            }
        };

        Ok(CycleReport {
            decision,
            forced: force,
            outcome,
            worker_stats,
            current_workers,
            timestamp: Utc::now(),
        })
    }

    /// Side-effect free view of the pool
    pub async fn status(&self) -> Result<ScalingInfo> {
        let (worker_stats, instances, last_activity_time) = tokio::try_join!(
            self.fetch_stats(),
            self.list_instances(),
            self.last_activity()
        )?;

        let current_workers = WorkerPoolCount::classify(&instances);
        let scaling_decision = decide(&worker_stats, &current_workers, &self.config);
        let cooldown_status =
            cooldown_status(last_activity_time, Utc::now(), self.cooldown.cooldown());

        Ok(ScalingInfo {
            worker_stats,
            current_workers,
            scaling_decision,
            last_activity_time,
            cooldown_status,
        })
    }

    /// Run checks on a fixed period until shutdown
    ///
    /// A zero interval disables the timer. Failed checks are logged and
    /// retried on the next tick.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        if period.is_zero() {
            info!("Timer-driven scaling checks disabled");
            return;
        }

        info!(
            interval_secs = period.as_secs(),
            pool = %self.pool,
            "Starting scaling control loop"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut checks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    checks += 1;
                    if let Ok(report) = self.check(false).await {
                        debug!(
                            check = checks,
                            action = %report.decision.action,
                            target = report.decision.target_replicas,
                            "Scaling check complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!(checks, "Shutting down scaling control loop");
                    break;
                }
            }
        }
    }

    async fn execute(
        &self,
        instances: &[PoolInstance],
        decision: &ScalingDecision,
        force: bool,
    ) -> Result<CycleOutcome> {
        let outcome = self
            .reconciler
            .reconcile(instances, decision.target_replicas)
            .await;

        for failure in &outcome.failures {
            self.metrics.inc_operation_failure(failure.operation);
        }
        match outcome.failures.first() {
            Some(failure) => self
                .health
                .record_failure(components::PROVIDER, &failure.message),
            None => self.health.record_success(components::PROVIDER),
        }
        self.logger.log_scale_executed(&outcome, force);

        if let Some(err) = outcome.first_error() {
            return Err(err);
        }
        Ok(CycleOutcome::Executed { reconcile: outcome })
    }

    /// Remaining cooldown seconds, `None` when scale-down is allowed
    async fn cooldown_remaining(&self) -> Result<Option<u64>> {
        let status = self.cooldown.status(Utc::now()).await;
        self.health.observe(components::ACTIVITY_STORE, &status);
        let status = status?;

        Ok(status
            .in_cooldown
            .then_some(status.remaining_cooldown_seconds))
    }

    async fn fetch_stats(&self) -> Result<Vec<WorkerSnapshot>> {
        let result = fetch_worker_stats(self.telemetry.as_ref(), &self.queue).await;
        self.health.observe(components::TELEMETRY, &result);
        result
    }

    async fn list_instances(&self) -> Result<Vec<PoolInstance>> {
        let result = self.inspector.list_instances(&self.pool).await;
        self.health.observe(components::POOL_INSPECTOR, &result);
        result
    }

    async fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let result = self.cooldown.last_activity().await;
        self.health.observe(components::ACTIVITY_STORE, &result);
        result
    }
}

/// Builder wiring the control loop's collaborators
pub struct ControlLoopBuilder {
    config: ScalingConfig,
    queue: Option<String>,
    pool: Option<String>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    inspector: Option<Arc<dyn PoolInspector>>,
    provider: Option<Arc<dyn OrchestrationProvider>>,
    activity_store: Option<Arc<dyn ActivityStore>>,
    health: Option<HealthRegistry>,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: ScalingConfig::default(),
            queue: None,
            pool: None,
            telemetry: None,
            inspector: None,
            provider: None,
            activity_store: None,
            health: None,
        }
    }

    pub fn config(mut self, config: ScalingConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue whose depth drives scaling
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Name prefix of the worker pool
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn PoolInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn OrchestrationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn activity_store(mut self, store: Arc<dyn ActivityStore>) -> Self {
        self.activity_store = Some(store);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Validate the configuration and build the loop
    pub fn build(self) -> Result<ControlLoop> {
        self.config.validate()?;

        let queue = self.queue.ok_or_else(|| missing("queue"))?;
        let pool = self.pool.ok_or_else(|| missing("pool"))?;
        let telemetry = self.telemetry.ok_or_else(|| missing("telemetry source"))?;
        let inspector = self.inspector.ok_or_else(|| missing("pool inspector"))?;
        let provider = self.provider.ok_or_else(|| missing("orchestration provider"))?;
        let store = self.activity_store.ok_or_else(|| missing("activity store"))?;

        let cooldown = CooldownController::new(
            store,
            self.config.cooldown(),
            self.config.activity_ttl(),
        );
        let reconciler = PoolReconciler::new(
            pool.clone(),
            provider,
            cooldown.clone(),
            self.config.allow_unbounded_create,
            self.config.operation_timeout(),
        );

        Ok(ControlLoop {
            logger: StructuredLogger::new(pool.clone()),
            config: self.config,
            queue,
            pool,
            telemetry,
            inspector,
            cooldown,
            reconciler,
            metrics: ScalerMetrics::new(),
            health: self.health.unwrap_or_else(HealthRegistry::with_components),
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(what: &str) -> ScalerError {
    ScalerError::Config(format!("{} is required", what))
}
