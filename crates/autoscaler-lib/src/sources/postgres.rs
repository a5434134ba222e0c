//! Backlog of unfinished submissions in PostgreSQL

use super::{async_trait, BacklogCounter};
use crate::error::{Result, ScalerError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::debug;

/// Submissions queued (1), processing (2) or not yet assigned a status
pub const UNFINISHED_SUBMISSIONS_QUERY: &str =
    "SELECT COUNT(*) FROM submissions WHERE status_id IN (1, 2) OR status_id IS NULL";

pub struct SubmissionBacklog {
    pool: PgPool,
}

impl SubmissionBacklog {
    /// Create the pool without connecting; the first count opens a connection
    pub fn connect_lazy(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)
            .map_err(|e| ScalerError::Config(format!("invalid database URL: {}", e)))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BacklogCounter for SubmissionBacklog {
    async fn unfinished_jobs(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(UNFINISHED_SUBMISSIONS_QUERY)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ScalerError::Telemetry(format!("failed to count unfinished submissions: {}", e)))?;

        debug!(count, "Counted unfinished submissions");
        u64::try_from(count)
            .map_err(|_| ScalerError::Telemetry(format!("negative submission count: {}", count)))
    }
}
