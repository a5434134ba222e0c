//! Scaling configuration
//!
//! Loaded once at startup and immutable afterwards. Tuning constants of the
//! decision engine are exposed as fields so deployments can override them.

use crate::error::{Result, ScalerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queued jobs one worker is expected to absorb
pub const DEFAULT_JOBS_PER_WORKER: u64 = 5;

/// Utilization below which the pool is considered underused
pub const DEFAULT_LOW_UTILIZATION_RATIO: f64 = 0.30;

/// Idle workers required before a gradual scale-down
pub const DEFAULT_MIN_IDLE_FOR_SCALE_DOWN: u64 = 2;

/// Scaling parameters for a worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ScalingConfig {
    #[serde(default)]
    pub min_workers: u32,

    #[serde(default = "default_max_workers")]
    pub max_workers: u32,

    /// Queue size at or above which the pool scales up
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: u64,

    /// Queue size at or below which the pool may scale down
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: u64,

    /// Minutes after a scale-up during which scale-down is suppressed
    #[serde(default = "default_scale_cooldown_minutes")]
    pub scale_cooldown_minutes: u64,

    /// Create new instances when no stopped instance is left to restart
    #[serde(default)]
    pub allow_unbounded_create: bool,

    #[serde(default = "default_jobs_per_worker")]
    pub jobs_per_worker: u64,

    #[serde(default = "default_low_utilization_ratio")]
    pub low_utilization_ratio: f64,

    #[serde(default = "default_min_idle_for_scale_down")]
    pub min_idle_for_scale_down: u64,

    /// Upper bound for a single start/stop/create call
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_max_workers() -> u32 {
    2
}

fn default_scale_up_threshold() -> u64 {
    5
}

fn default_scale_down_threshold() -> u64 {
    2
}

fn default_scale_cooldown_minutes() -> u64 {
    5
}

fn default_jobs_per_worker() -> u64 {
    DEFAULT_JOBS_PER_WORKER
}

fn default_low_utilization_ratio() -> f64 {
    DEFAULT_LOW_UTILIZATION_RATIO
}

fn default_min_idle_for_scale_down() -> u64 {
    DEFAULT_MIN_IDLE_FOR_SCALE_DOWN
}

fn default_operation_timeout_secs() -> u64 {
    600
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: default_max_workers(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            scale_cooldown_minutes: default_scale_cooldown_minutes(),
            allow_unbounded_create: false,
            jobs_per_worker: DEFAULT_JOBS_PER_WORKER,
            low_utilization_ratio: DEFAULT_LOW_UTILIZATION_RATIO,
            min_idle_for_scale_down: DEFAULT_MIN_IDLE_FOR_SCALE_DOWN,
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl ScalingConfig {
    /// Check configuration invariants. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.min_workers > self.max_workers {
            return Err(ScalerError::Config(format!(
                "minWorkers ({}) must not exceed maxWorkers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.jobs_per_worker == 0 {
            return Err(ScalerError::Config(
                "jobsPerWorker must be greater than zero".to_string(),
            ));
        }
        if !(self.low_utilization_ratio > 0.0 && self.low_utilization_ratio <= 1.0) {
            return Err(ScalerError::Config(format!(
                "lowUtilizationRatio must be in (0, 1], got {}",
                self.low_utilization_ratio
            )));
        }
        if self.operation_timeout_secs == 0 {
            return Err(ScalerError::Config(
                "operationTimeoutSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_cooldown_minutes * 60)
    }

    /// Expiry of the activity record, one minute past the cooldown window
    pub fn activity_ttl(&self) -> Duration {
        Duration::from_secs((self.scale_cooldown_minutes + 1) * 60)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
