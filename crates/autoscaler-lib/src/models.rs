//! Core data models for the worker pool autoscaler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker-level view of one job queue, derived fresh from telemetry each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub queue: String,
    pub queue_size: u64,
    pub available_capacity: u64,
    pub working_count: u64,
    pub idle_count: u64,
    pub paused_count: u64,
    pub failed_count: u64,
}

impl WorkerSnapshot {
    /// Estimate worker capacity from queue length and the number of
    /// unfinished jobs.
    ///
    /// Capacity is assumed to be one slot per two in-flight jobs, with a
    /// floor of one, so `working + idle == available` always holds.
    pub fn estimate(queue: impl Into<String>, queue_size: u64, backlog: u64) -> Self {
        let available_capacity = backlog.div_ceil(2).max(1);
        let working_count = backlog.min(available_capacity);

        Self {
            queue: queue.into(),
            queue_size,
            available_capacity,
            working_count,
            idle_count: available_capacity - working_count,
            paused_count: 0,
            failed_count: 0,
        }
    }
}

/// Lifecycle state of a worker instance as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    StoppedOrTerminated,
    /// Pending, starting, repairing, unknown...
    Other(String),
}

impl InstanceState {
    /// Classify a raw provider state string
    pub fn from_provider(state: &str) -> Self {
        match state {
            "Running" => InstanceState::Running,
            "Stopped" | "Terminated" => InstanceState::StoppedOrTerminated,
            other => InstanceState::Other(other.to_string()),
        }
    }
}

/// A worker instance tagged as belonging to the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInstance {
    pub name: String,
    pub state: InstanceState,
    pub ordinal: u32,
}

/// Container-level truth at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolCount {
    pub running: u32,
    pub stopped: u32,
    pub total: u32,
}

impl WorkerPoolCount {
    pub fn new(running: u32, stopped: u32) -> Self {
        Self {
            running,
            stopped,
            total: running + stopped,
        }
    }

    /// Count instances by state. Instances in transitional states count as
    /// stopped.
    pub fn classify(instances: &[PoolInstance]) -> Self {
        let mut running = 0;
        let mut stopped = 0;

        for instance in instances {
            match &instance.state {
                InstanceState::Running => running += 1,
                InstanceState::StoppedOrTerminated => stopped += 1,
                InstanceState::Other(state) => {
                    tracing::warn!(
                        worker = %instance.name,
                        state = %state,
                        "Worker in transitional state, counting as stopped"
                    );
                    stopped += 1;
                }
            }
        }

        Self::new(running, stopped)
    }
}

/// Scaling action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl std::fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingAction::ScaleUp => write!(f, "scale_up"),
            ScalingAction::ScaleDown => write!(f, "scale_down"),
            ScalingAction::NoAction => write!(f, "no_action"),
        }
    }
}

/// Output of the decision engine. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub target_replicas: u32,
    pub reason: String,
}

/// Cooldown gate state for scale-down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub in_cooldown: bool,
    pub remaining_cooldown_seconds: u64,
}

/// Side-effect free view of the pool, used by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingInfo {
    pub worker_stats: Vec<WorkerSnapshot>,
    pub current_workers: WorkerPoolCount,
    pub scaling_decision: ScalingDecision,
    pub last_activity_time: Option<DateTime<Utc>>,
    pub cooldown_status: CooldownStatus,
}

/// Definition of a worker instance to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub pool: String,
    pub ordinal: u32,
}

impl WorkerSpec {
    pub fn new(pool: &str, ordinal: u32) -> Self {
        Self {
            name: format!("{}-{}", pool, ordinal),
            pool: pool.to_string(),
            ordinal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, state: InstanceState, ordinal: u32) -> PoolInstance {
        PoolInstance {
            name: name.to_string(),
            state,
            ordinal,
        }
    }

    #[test]
    fn test_estimate_with_no_backlog_reports_one_idle_slot() {
        let snapshot = WorkerSnapshot::estimate("1.13.1", 0, 0);
        assert_eq!(snapshot.available_capacity, 1);
        assert_eq!(snapshot.working_count, 0);
        assert_eq!(snapshot.idle_count, 1);
    }

    #[test]
    fn test_estimate_with_backlog() {
        let snapshot = WorkerSnapshot::estimate("1.13.1", 4, 5);
        assert_eq!(snapshot.queue_size, 4);
        assert_eq!(snapshot.available_capacity, 3);
        assert_eq!(snapshot.working_count, 3);
        assert_eq!(snapshot.idle_count, 0);
        assert!(snapshot.working_count + snapshot.idle_count <= snapshot.available_capacity);
    }

    #[test]
    fn test_instance_state_from_provider() {
        assert_eq!(InstanceState::from_provider("Running"), InstanceState::Running);
        assert_eq!(
            InstanceState::from_provider("Stopped"),
            InstanceState::StoppedOrTerminated
        );
        assert_eq!(
            InstanceState::from_provider("Terminated"),
            InstanceState::StoppedOrTerminated
        );
        assert_eq!(
            InstanceState::from_provider("Pending"),
            InstanceState::Other("Pending".to_string())
        );
    }

    #[test]
    fn test_classify_counts_transitional_as_stopped() {
        let instances = vec![
            instance("w-1", InstanceState::Running, 1),
            instance("w-2", InstanceState::StoppedOrTerminated, 2),
            instance("w-3", InstanceState::Other("Pending".to_string()), 3),
        ];

        let count = WorkerPoolCount::classify(&instances);
        assert_eq!(count, WorkerPoolCount::new(1, 2));
        assert_eq!(count.total, 3);
    }

    #[test]
    fn test_worker_spec_name() {
        let spec = WorkerSpec::new("judge0-worker", 4);
        assert_eq!(spec.name, "judge0-worker-4");
        assert_eq!(spec.ordinal, 4);
    }

    #[test]
    fn test_decision_serializes_snake_case_action() {
        let decision = ScalingDecision {
            action: ScalingAction::ScaleUp,
            target_replicas: 2,
            reason: "test".to_string(),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "scale_up");
        assert_eq!(json["targetReplicas"], 2);
    }
}
