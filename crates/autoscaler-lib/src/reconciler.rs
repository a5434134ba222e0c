//! Pool reconciler
//!
//! Converges the worker pool toward a target replica count, preferring cheap
//! transitions: stopped instances are restarted before new ones are created,
//! and scale-down stops instances rather than deleting them so they can be
//! restarted later.
//!
//! Planning is a pure function of the instance list; execution fans out one
//! provider call per instance and lets every call settle before reporting.

use crate::cooldown::CooldownController;
use crate::error::{Operation, ScalerError};
use crate::models::{InstanceState, PoolInstance, WorkerSpec};
use crate::sources::OrchestrationProvider;
use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Direction of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    None,
    Up,
    Down,
}

/// Provider operations needed to reach a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub running: u32,
    pub target: u32,
    /// Stopped instances to restart, lowest ordinal first
    pub restart: Vec<String>,
    /// New instances to create
    pub create: Vec<WorkerSpec>,
    /// Running instances to stop, highest ordinal first
    pub stop: Vec<String>,
    /// Workers still missing after restarts when creation is disallowed
    pub unmet: u32,
}

impl ReconcilePlan {
    pub fn direction(&self) -> ScaleDirection {
        match self.target.cmp(&self.running) {
            std::cmp::Ordering::Greater => ScaleDirection::Up,
            std::cmp::Ordering::Less => ScaleDirection::Down,
            std::cmp::Ordering::Equal => ScaleDirection::None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.restart.is_empty() && self.create.is_empty() && self.stop.is_empty()
    }
}

/// Work out which instances to restart, create or stop
///
/// New ordinals continue after `max(total, highest ordinal)`, so a live
/// ordinal is never handed out twice even when the sequence has gaps.
pub fn plan(pool: &str, instances: &[PoolInstance], target: u32, allow_create: bool) -> ReconcilePlan {
    let running: Vec<&PoolInstance> = instances
        .iter()
        .filter(|i| i.state == InstanceState::Running)
        .collect();
    let running_count = running.len() as u32;

    let mut plan = ReconcilePlan {
        running: running_count,
        target,
        restart: Vec::new(),
        create: Vec::new(),
        stop: Vec::new(),
        unmet: 0,
    };

    if target > running_count {
        let need = target - running_count;

        let mut restartable: Vec<&PoolInstance> = instances
            .iter()
            .filter(|i| i.state == InstanceState::StoppedOrTerminated)
            .collect();
        restartable.sort_by_key(|i| i.ordinal);

        plan.restart = restartable
            .iter()
            .take(need as usize)
            .map(|i| i.name.clone())
            .collect();

        let remaining = need - plan.restart.len() as u32;
        if remaining > 0 {
            if allow_create {
                let total = instances.len() as u32;
                let highest = instances.iter().map(|i| i.ordinal).max().unwrap_or(0);
                let base = total.max(highest);
                plan.create = (0..remaining)
                    .map(|i| WorkerSpec::new(pool, base + i + 1))
                    .collect();
            } else {
                plan.unmet = remaining;
            }
        }
    } else if target < running_count {
        let mut candidates = running;
        candidates.sort_by(|a, b| b.ordinal.cmp(&a.ordinal));
        plan.stop = candidates
            .iter()
            .take((running_count - target) as usize)
            .map(|i| i.name.clone())
            .collect();
    }

    plan
}

/// A provider call that failed or timed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceFailure {
    pub operation: Operation,
    pub instance: String,
    pub message: String,
    pub timed_out: bool,
}

impl InstanceFailure {
    fn from_error(operation: Operation, instance: &str, err: ScalerError) -> Self {
        Self {
            operation,
            instance: instance.to_string(),
            message: err.to_string(),
            timed_out: matches!(err, ScalerError::Timeout { .. }),
        }
    }
}

/// What a reconciliation actually did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub direction: ScaleDirection,
    pub previous_running: u32,
    pub target: u32,
    pub started: Vec<String>,
    pub created: Vec<String>,
    pub stopped: Vec<String>,
    pub failures: Vec<InstanceFailure>,
    pub unmet: u32,
    pub activity_recorded: bool,
}

impl ReconcileOutcome {
    fn empty(plan: &ReconcilePlan) -> Self {
        Self {
            direction: plan.direction(),
            previous_running: plan.running,
            target: plan.target,
            started: Vec::new(),
            created: Vec::new(),
            stopped: Vec::new(),
            failures: Vec::new(),
            unmet: plan.unmet,
            activity_recorded: false,
        }
    }

    /// Whether at least one worker was added
    pub fn progressed_up(&self) -> bool {
        self.direction == ScaleDirection::Up
            && (!self.started.is_empty() || !self.created.is_empty())
    }

    /// The first failure as an error, once the whole batch has settled
    pub fn first_error(&self) -> Option<ScalerError> {
        self.failures
            .first()
            .map(|f| ScalerError::provider(f.operation, f.instance.clone(), &f.message))
    }
}

/// Issues provider operations for a plan
pub struct PoolReconciler {
    pool: String,
    provider: Arc<dyn OrchestrationProvider>,
    cooldown: CooldownController,
    allow_create: bool,
    operation_timeout: Duration,
}

impl PoolReconciler {
    pub fn new(
        pool: impl Into<String>,
        provider: Arc<dyn OrchestrationProvider>,
        cooldown: CooldownController,
        allow_create: bool,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            pool: pool.into(),
            provider,
            cooldown,
            allow_create,
            operation_timeout,
        }
    }

    /// Converge `instances` toward `target`
    ///
    /// Never fails as a whole: per-instance failures are collected in the
    /// outcome. Activity is recorded when a scale-up made progress.
    pub async fn reconcile(&self, instances: &[PoolInstance], target: u32) -> ReconcileOutcome {
        let plan = plan(&self.pool, instances, target, self.allow_create);
        let mut outcome = ReconcileOutcome::empty(&plan);

        match plan.direction() {
            ScaleDirection::None => {
                debug!(target, "Already at target replica count");
                return outcome;
            }
            ScaleDirection::Up => {
                let stopped_available = instances
                    .iter()
                    .filter(|i| i.state == InstanceState::StoppedOrTerminated)
                    .count();
                info!(
                    need = plan.target - plan.running,
                    stopped_available,
                    restarting = plan.restart.len(),
                    creating = plan.create.len(),
                    "Scaling up"
                );
                if plan.unmet > 0 {
                    warn!(
                        unmet = plan.unmet,
                        "Stopped workers exhausted and creating new workers is disabled"
                    );
                }
            }
            ScaleDirection::Down => {
                info!(stopping = plan.stop.len(), "Scaling down");
            }
        }

        self.execute(&plan, &mut outcome).await;

        if outcome.progressed_up() {
            match self.cooldown.record_scale_up(Utc::now()).await {
                Ok(()) => outcome.activity_recorded = true,
                Err(e) => warn!(error = %e, "Failed to record scale-up activity"),
            }
        }

        info!(
            direction = ?outcome.direction,
            started = outcome.started.len(),
            created = outcome.created.len(),
            stopped = outcome.stopped.len(),
            failed = outcome.failures.len(),
            "Reconciliation settled"
        );

        outcome
    }

    /// Run every operation of the plan concurrently and wait for all of them
    async fn execute(&self, plan: &ReconcilePlan, outcome: &mut ReconcileOutcome) {
        let provider = self.provider.as_ref();

        let starts = plan.restart.iter().map(|name| {
            self.bounded(Operation::Start, name.clone(), provider.start(name))
        });
        let creates = plan.create.iter().map(|spec| {
            self.bounded(Operation::Create, spec.name.clone(), provider.create(spec))
        });
        let stops = plan
            .stop
            .iter()
            .map(|name| self.bounded(Operation::Stop, name.clone(), provider.stop(name)));

        let (start_results, create_results, stop_results) = tokio::join!(
            join_all(starts),
            join_all(creates),
            join_all(stops)
        );

        for (operation, name, result) in start_results
            .into_iter()
            .chain(create_results)
            .chain(stop_results)
        {
            match result {
                Ok(()) => match operation {
                    Operation::Start => outcome.started.push(name),
                    Operation::Create => outcome.created.push(name),
                    Operation::Stop => outcome.stopped.push(name),
                },
                Err(e) => {
                    error!(operation = %operation, worker = %name, error = %e, "Worker operation failed");
                    outcome
                        .failures
                        .push(InstanceFailure::from_error(operation, &name, e));
                }
            }
        }
    }

    /// Apply the per-instance timeout to one provider call
    async fn bounded<F>(
        &self,
        operation: Operation,
        name: String,
        call: F,
    ) -> (Operation, String, crate::error::Result<()>)
    where
        F: Future<Output = crate::error::Result<()>>,
    {
        debug!(operation = %operation, worker = %name, "Issuing worker operation");
        let result = match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ScalerError::Timeout {
                operation,
                instance: name.clone(),
                timeout: self.operation_timeout,
            }),
        };
        (operation, name, result)
    }
}
