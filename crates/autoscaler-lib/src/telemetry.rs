//! Worker statistics derived from telemetry

use crate::error::Result;
use crate::models::WorkerSnapshot;
use crate::sources::{async_trait, BacklogCounter, QueueLength, TelemetrySource};
use std::sync::Arc;
use tracing::debug;

/// Read queue depth and backlog concurrently and derive the snapshot
///
/// Either read failing fails the whole fetch.
pub async fn fetch_worker_stats(
    source: &dyn TelemetrySource,
    queue: &str,
) -> Result<Vec<WorkerSnapshot>> {
    let (queue_size, backlog) =
        tokio::try_join!(source.queue_depth(queue), source.backlog_count(queue))?;

    let snapshot = WorkerSnapshot::estimate(queue, queue_size, backlog);
    debug!(
        queue = %queue,
        queue_size,
        backlog,
        available = snapshot.available_capacity,
        working = snapshot.working_count,
        idle = snapshot.idle_count,
        "Derived worker stats"
    );

    Ok(vec![snapshot])
}

/// Telemetry assembled from a queue length source and a backlog counter
pub struct SplitTelemetry {
    queue: Arc<dyn QueueLength>,
    backlog: Arc<dyn BacklogCounter>,
}

impl SplitTelemetry {
    pub fn new(queue: Arc<dyn QueueLength>, backlog: Arc<dyn BacklogCounter>) -> Self {
        Self { queue, backlog }
    }
}

#[async_trait]
impl TelemetrySource for SplitTelemetry {
    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        self.queue.queue_length(queue).await
    }

    async fn backlog_count(&self, _queue: &str) -> Result<u64> {
        self.backlog.unfinished_jobs().await
    }
}
