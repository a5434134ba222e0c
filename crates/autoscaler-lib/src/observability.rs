//! Observability for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (cycle latency, decisions, cooldown blocks, pool gauges)
//! - Event-tagged structured logging with tracing

use crate::error::Operation;
use crate::models::{ScalingAction, ScalingDecision, WorkerPoolCount, WorkerSnapshot};
use crate::reconciler::ReconcileOutcome;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Buckets for a full cycle, which includes cloud operations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    cycle_latency_seconds: Histogram,
    decisions: IntCounterVec,
    cycle_errors: IntCounter,
    cooldown_blocks: IntCounter,
    operation_failures: IntCounterVec,
    queue_depth: IntGauge,
    working_estimate: IntGauge,
    running_workers: IntGauge,
    stopped_workers: IntGauge,
    target_replicas: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "worker_autoscaler_cycle_latency_seconds",
                "Time spent on one scaling check, including reconciliation",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            decisions: register_int_counter_vec!(
                "worker_autoscaler_decisions_total",
                "Scaling decisions by action",
                &["action"]
            )
            .expect("Failed to register decisions_total"),

            cycle_errors: register_int_counter!(
                "worker_autoscaler_cycle_errors_total",
                "Scaling checks that ended in an error"
            )
            .expect("Failed to register cycle_errors_total"),

            cooldown_blocks: register_int_counter!(
                "worker_autoscaler_cooldown_blocks_total",
                "Scale-downs suppressed by the cooldown window"
            )
            .expect("Failed to register cooldown_blocks_total"),

            operation_failures: register_int_counter_vec!(
                "worker_autoscaler_operation_failures_total",
                "Failed or timed out worker operations",
                &["operation"]
            )
            .expect("Failed to register operation_failures_total"),

            queue_depth: register_int_gauge!(
                "worker_autoscaler_queue_depth",
                "Jobs waiting in the queue at the last check"
            )
            .expect("Failed to register queue_depth"),

            working_estimate: register_int_gauge!(
                "worker_autoscaler_working_estimate",
                "Estimated busy worker slots at the last check"
            )
            .expect("Failed to register working_estimate"),

            running_workers: register_int_gauge!(
                "worker_autoscaler_running_workers",
                "Running worker instances at the last check"
            )
            .expect("Failed to register running_workers"),

            stopped_workers: register_int_gauge!(
                "worker_autoscaler_stopped_workers",
                "Stopped or transitional worker instances at the last check"
            )
            .expect("Failed to register stopped_workers"),

            target_replicas: register_int_gauge!(
                "worker_autoscaler_target_replicas",
                "Target replica count of the last decision"
            )
            .expect("Failed to register target_replicas"),
        }
    }
}

/// Handle to the global autoscaler metrics. Clones share the same metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn record_decision(&self, decision: &ScalingDecision) {
        let action = decision.action.to_string();
        self.inner().decisions.with_label_values(&[action.as_str()]).inc();
        self.inner()
            .target_replicas
            .set(i64::from(decision.target_replicas));
    }

    pub fn inc_cycle_errors(&self) {
        self.inner().cycle_errors.inc();
    }

    pub fn inc_cooldown_blocks(&self) {
        self.inner().cooldown_blocks.inc();
    }

    pub fn inc_operation_failure(&self, operation: Operation) {
        self.inner()
            .operation_failures
            .with_label_values(&[operation.as_str()])
            .inc();
    }

    /// Update the gauges describing the observed pool
    pub fn set_pool_state(&self, snapshots: &[WorkerSnapshot], pool: &WorkerPoolCount) {
        let inner = self.inner();
        let queue_depth: u64 = snapshots.iter().map(|s| s.queue_size).sum();
        let working: u64 = snapshots.iter().map(|s| s.working_count).sum();
        inner.queue_depth.set(queue_depth as i64);
        inner.working_estimate.set(working as i64);
        inner.running_workers.set(i64::from(pool.running));
        inner.stopped_workers.set(i64::from(pool.stopped));
    }

    pub fn decisions_total(&self, action: ScalingAction) -> u64 {
        self.inner()
            .decisions
            .with_label_values(&[action.to_string().as_str()])
            .get()
    }

    pub fn cooldown_blocks_total(&self) -> u64 {
        self.inner().cooldown_blocks.get()
    }
}

/// Event-tagged log records for the scaling lifecycle
#[derive(Clone)]
pub struct StructuredLogger {
    pool: String,
}

impl StructuredLogger {
    pub fn new(pool: impl Into<String>) -> Self {
        Self { pool: pool.into() }
    }

    pub fn log_decision(&self, decision: &ScalingDecision, pool: &WorkerPoolCount) {
        info!(
            event = "scaling_decision",
            pool = %self.pool,
            action = %decision.action,
            target_replicas = decision.target_replicas,
            running = pool.running,
            stopped = pool.stopped,
            reason = %decision.reason,
            "Scaling decision made"
        );
    }

    pub fn log_forced(&self, action: ScalingAction) {
        warn!(
            event = "forced_scaling",
            pool = %self.pool,
            action = %action,
            "Forced scaling requested, bypassing cooldown"
        );
    }

    pub fn log_scale_executed(&self, outcome: &ReconcileOutcome, forced: bool) {
        if outcome.failures.is_empty() {
            info!(
                event = "scale_executed",
                pool = %self.pool,
                direction = ?outcome.direction,
                previous_running = outcome.previous_running,
                target = outcome.target,
                started = outcome.started.len(),
                created = outcome.created.len(),
                stopped = outcome.stopped.len(),
                unmet = outcome.unmet,
                forced = forced,
                "Scaling executed"
            );
        } else {
            warn!(
                event = "scale_executed",
                pool = %self.pool,
                direction = ?outcome.direction,
                previous_running = outcome.previous_running,
                target = outcome.target,
                started = outcome.started.len(),
                created = outcome.created.len(),
                stopped = outcome.stopped.len(),
                failed = outcome.failures.len(),
                forced = forced,
                "Scaling executed with failures"
            );
        }
    }

    pub fn log_scale_down_blocked(&self, target: u32, remaining_seconds: u64) {
        info!(
            event = "scale_down_blocked",
            pool = %self.pool,
            target_replicas = target,
            remaining_cooldown_seconds = remaining_seconds,
            "Scale down blocked by cooldown"
        );
    }

    pub fn log_cycle_failed(&self, error: &dyn std::fmt::Display) {
        error!(
            event = "cycle_failed",
            pool = %self.pool,
            error = %error,
            "Scaling check failed"
        );
    }

    pub fn log_startup(&self, version: &str, backend: &str) {
        info!(
            event = "autoscaler_started",
            pool = %self.pool,
            version = %version,
            backend = %backend,
            "Worker autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            pool = %self.pool,
            reason = %reason,
            "Worker autoscaler shutting down"
        );
    }
}
