//! Scaling decision engine
//!
//! A pure function of already-fetched telemetry, the pool count and the
//! scaling configuration. It knows nothing about cooldowns; the control loop
//! gates execution of scale-down decisions separately.
//!
//! # Algorithm
//!
//! ```text
//! utilization = working / available            (0 when available == 0)
//!
//! if queue >= scale_up_threshold and running < max:
//!     recommended = min(ceil(queue / jobs_per_worker), max)
//!     ScaleUp(clamp(max(recommended, running + 1), min, max))
//!
//! elif running > min:
//!     if queue <= scale_down_threshold and utilization < low_ratio
//!        and idle >= min_idle:
//!         ScaleDown(clamp(running - 1, min, max))
//!     elif queue == 0 and working == 0 and available == idle and min == 0:
//!         ScaleDown(0)
//!
//! else NoAction(running)
//! ```

use crate::config::ScalingConfig;
use crate::models::{ScalingAction, ScalingDecision, WorkerPoolCount, WorkerSnapshot};

/// Totals across every reported queue
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    queue: u64,
    working: u64,
    idle: u64,
    available: u64,
}

impl Totals {
    fn sum(snapshots: &[WorkerSnapshot]) -> Self {
        snapshots.iter().fold(Totals::default(), |acc, s| Totals {
            queue: acc.queue + s.queue_size,
            working: acc.working + s.working_count,
            idle: acc.idle + s.idle_count,
            available: acc.available + s.available_capacity,
        })
    }

    fn utilization(&self) -> f64 {
        if self.available > 0 {
            self.working as f64 / self.available as f64
        } else {
            0.0
        }
    }
}

/// Compute the scaling decision for one cycle
pub fn decide(
    snapshots: &[WorkerSnapshot],
    pool: &WorkerPoolCount,
    config: &ScalingConfig,
) -> ScalingDecision {
    if snapshots.is_empty() {
        return ScalingDecision {
            action: ScalingAction::NoAction,
            target_replicas: pool.running,
            reason: "No worker stats available (no data)".to_string(),
        };
    }

    let totals = Totals::sum(snapshots);
    let utilization = totals.utilization();
    let utilization_pct = utilization * 100.0;

    if totals.queue >= config.scale_up_threshold && pool.running < config.max_workers {
        let recommended = totals
            .queue
            .div_ceil(config.jobs_per_worker)
            .min(u64::from(config.max_workers)) as u32;
        let target = recommended
            .max(pool.running + 1)
            .clamp(config.min_workers, config.max_workers);

        return ScalingDecision {
            action: ScalingAction::ScaleUp,
            target_replicas: target,
            reason: format!(
                "Queue size ({}) exceeds threshold. Utilization: {:.1}%. Available stopped workers: {}",
                totals.queue, utilization_pct, pool.stopped
            ),
        };
    }

    if pool.running > config.min_workers {
        if totals.queue <= config.scale_down_threshold
            && utilization < config.low_utilization_ratio
            && totals.idle >= config.min_idle_for_scale_down
        {
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                target_replicas: (pool.running - 1).clamp(config.min_workers, config.max_workers),
                reason: format!(
                    "Low utilization ({:.1}%) and queue size ({}) below threshold",
                    utilization_pct, totals.queue
                ),
            };
        }

        if totals.queue == 0
            && totals.working == 0
            && totals.available == totals.idle
            && config.min_workers == 0
        {
            return ScalingDecision {
                action: ScalingAction::ScaleDown,
                target_replicas: 0,
                reason: "No jobs in queue and no active work - scaling to 0".to_string(),
            };
        }
    }

    ScalingDecision {
        action: ScalingAction::NoAction,
        target_replicas: pool.running,
        reason: format!(
            "Optimal state - Queue: {}, Working: {}, Idle: {}, Utilization: {:.1}%. Running: {}, Stopped: {}",
            totals.queue,
            totals.working,
            totals.idle,
            utilization_pct,
            pool.running,
            pool.stopped
        ),
    }
}
