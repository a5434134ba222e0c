//! External collaborators consumed by the autoscaler core
//!
//! Every call here is a potentially slow network operation. The core only
//! sees these traits; concrete backends are wired by the service binary:
//!
//! - `memory`: in-process pool, store and telemetry for development and tests
//! - `upstash`: Redis over REST (queue length and activity record)
//! - `postgres`: unfinished-submission count
//! - `aci`: Azure Container Instances through the ARM REST API

pub mod aci;
pub mod memory;
pub mod postgres;
pub mod upstash;

pub use aci::{AciConfig, ContainerInstances, WorkerTemplate};
pub use memory::{InMemoryActivityStore, InMemoryPool, StaticTelemetry};
pub use postgres::{SubmissionBacklog, UNFINISHED_SUBMISSIONS_QUERY};
pub use upstash::UpstashClient;

use crate::error::Result;
use crate::models::{PoolInstance, WorkerSpec};
use std::time::Duration;

pub use async_trait::async_trait;

/// Source of queue depth and backlog counts
///
/// A failed read must surface as an error; returning zero would look like an
/// idle pool and could trigger a scale-to-zero.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Jobs waiting to be picked up
    async fn queue_depth(&self, queue: &str) -> Result<u64>;

    /// Jobs queued or in flight (not yet finished)
    async fn backlog_count(&self, queue: &str) -> Result<u64>;
}

/// Length of a job queue, one half of a split telemetry source
#[async_trait]
pub trait QueueLength: Send + Sync {
    async fn queue_length(&self, queue: &str) -> Result<u64>;
}

/// Count of jobs queued or in flight, the other half
#[async_trait]
pub trait BacklogCounter: Send + Sync {
    async fn unfinished_jobs(&self) -> Result<u64>;
}

/// Lists the worker instances that belong to a pool
#[async_trait]
pub trait PoolInspector: Send + Sync {
    /// Current provider truth. Instances whose details cannot be fetched are
    /// logged and left out of the list.
    async fn list_instances(&self, pool: &str) -> Result<Vec<PoolInstance>>;
}

/// Lifecycle operations on individual worker instances
#[async_trait]
pub trait OrchestrationProvider: Send + Sync {
    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn create(&self, spec: &WorkerSpec) -> Result<()>;
}

/// Timestamped key-value cell with expiry
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Stored epoch-millisecond timestamp, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;
}
