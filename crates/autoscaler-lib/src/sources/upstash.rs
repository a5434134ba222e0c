//! Redis over the Upstash REST protocol
//!
//! Commands are POSTed as a JSON array (`["LLEN", "key"]`) with a bearer
//! token; replies come back as `{"result": ...}` or `{"error": "..."}`.
//! Provides the queue length half of the telemetry and the activity store.

use super::{async_trait, ActivityStore, QueueLength};
use crate::error::{Result, ScalerError};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Key prefix of Resque job queues
pub const DEFAULT_QUEUE_KEY_PREFIX: &str = "resque:queue:";

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Which backing role a failed command belongs to, for error mapping
#[derive(Clone, Copy)]
enum Role {
    Queue,
    Activity,
}

impl Role {
    fn error(self, message: String) -> ScalerError {
        match self {
            Role::Queue => ScalerError::Telemetry(message),
            Role::Activity => ScalerError::ActivityStore(message),
        }
    }
}

pub struct UpstashClient {
    client: Client,
    base_url: Url,
    token: String,
    queue_key_prefix: String,
}

impl UpstashClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ScalerError::Config(format!("failed to create Redis HTTP client: {}", e)))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| ScalerError::Config(format!("invalid Redis REST URL {}: {}", base_url, e)))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            queue_key_prefix: DEFAULT_QUEUE_KEY_PREFIX.to_string(),
        })
    }

    pub fn with_queue_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_key_prefix = prefix.into();
        self
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("{}{}", self.queue_key_prefix, queue)
    }

    async fn command(&self, role: Role, args: &[&str]) -> Result<Value> {
        let response = self
            .client
            .post(self.base_url.clone())
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| role.error(format!("{} request failed: {}", args[0], e)))?;

        let status = response.status();
        let reply: CommandReply = response
            .json()
            .await
            .map_err(|e| role.error(format!("{} reply unreadable ({}): {}", args[0], status, e)))?;

        if let Some(error) = reply.error {
            return Err(role.error(format!("{} rejected: {}", args[0], error)));
        }
        if !status.is_success() {
            return Err(role.error(format!("{} failed with status {}", args[0], status)));
        }

        debug!(command = args[0], "Redis command succeeded");
        Ok(reply.result)
    }
}

/// Read an integer reply that may arrive as a JSON number or a string
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl QueueLength for UpstashClient {
    async fn queue_length(&self, queue: &str) -> Result<u64> {
        let key = self.queue_key(queue);
        let value = self.command(Role::Queue, &["LLEN", key.as_str()]).await?;

        as_i64(&value)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| ScalerError::Telemetry(format!("unexpected LLEN reply: {}", value)))
    }
}

#[async_trait]
impl ActivityStore for UpstashClient {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let value = self.command(Role::Activity, &["GET", key]).await?;
        if value.is_null() {
            return Ok(None);
        }

        as_i64(&value)
            .map(Some)
            .ok_or_else(|| ScalerError::ActivityStore(format!("unexpected value under {}: {}", key, value)))
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let seconds = ttl.as_secs().max(1).to_string();
        let value = value.to_string();
        self.command(Role::Activity, &["SETEX", key, seconds.as_str(), value.as_str()])
            .await?;
        Ok(())
    }
}
