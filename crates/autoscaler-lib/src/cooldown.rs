//! Cooldown controller
//!
//! Suppresses scale-down for a window after each scale-up so freshly started
//! workers get a chance to drain the queue. Only the execution of scale-down
//! is gated; decisions and scale-up are never affected.

use crate::error::Result;
use crate::models::CooldownStatus;
use crate::sources::ActivityStore;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key under which the last scale-up time is stored
pub const ACTIVITY_KEY: &str = "autoscaler:last_activity_time";

/// Compute the cooldown state from the last activity time
pub fn cooldown_status(
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> CooldownStatus {
    let Some(last) = last_activity else {
        return CooldownStatus::default();
    };

    let elapsed_ms = (now - last).num_milliseconds();
    let remaining_ms = cooldown.as_millis() as i64 - elapsed_ms;

    if remaining_ms <= 0 {
        return CooldownStatus::default();
    }

    CooldownStatus {
        in_cooldown: true,
        remaining_cooldown_seconds: (remaining_ms as u64).div_ceil(1000),
    }
}

/// Wraps the activity store to answer "may the pool scale down now?"
#[derive(Clone)]
pub struct CooldownController {
    store: Arc<dyn ActivityStore>,
    cooldown: Duration,
    ttl: Duration,
}

impl CooldownController {
    pub fn new(store: Arc<dyn ActivityStore>, cooldown: Duration, ttl: Duration) -> Self {
        Self {
            store,
            cooldown,
            ttl,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Last recorded scale-up, if the record has not expired
    pub async fn last_activity(&self) -> Result<Option<DateTime<Utc>>> {
        let millis = self.store.get(ACTIVITY_KEY).await?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Record a scale-up at `now`
    pub async fn record_scale_up(&self, now: DateTime<Utc>) -> Result<()> {
        self.store
            .set_with_ttl(ACTIVITY_KEY, now.timestamp_millis(), self.ttl)
            .await?;
        debug!(at = %now, ttl_secs = self.ttl.as_secs(), "Recorded scale-up activity");
        Ok(())
    }

    /// Whether scale-down is currently suppressed, and for how long
    ///
    /// A store read failure is returned as an error: an unverifiable cooldown
    /// must not let a scale-down through.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<CooldownStatus> {
        let last = self.last_activity().await.map_err(|e| {
            warn!(error = %e, "Could not read last scale-up time");
            e
        })?;
        Ok(cooldown_status(last, now, self.cooldown))
    }
}
