//! API client for communicating with the autoscaler service

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// Path of the scaling status and trigger endpoint
pub const SCALING_PATH: &str = "api/scaling";

/// API client for the autoscaler's HTTP surface
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        // Scaling operations can take minutes when workers are created
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(900))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => error.to_string(),
                Err(_) => body,
            };
            anyhow::bail!("API error ({}): {}", status, detail);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn scaling_status(&self) -> Result<ScalingStatus> {
        self.get(SCALING_PATH).await
    }

    pub async fn trigger(&self, force: bool) -> Result<TriggerResult> {
        self.post(SCALING_PATH, &TriggerRequest { force }).await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub queue: String,
    pub queue_size: u64,
    pub available_capacity: u64,
    pub working_count: u64,
    pub idle_count: u64,
    #[serde(default)]
    pub paused_count: u64,
    #[serde(default)]
    pub failed_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub running: u32,
    pub stopped: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub action: String,
    pub target_replicas: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cooldown {
    pub in_cooldown: bool,
    pub remaining_cooldown_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingInfo {
    pub worker_stats: Vec<WorkerStats>,
    pub current_workers: WorkerCounts,
    pub scaling_decision: Decision,
    pub last_activity_time: Option<String>,
    pub cooldown_status: Cooldown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingLimits {
    pub min_workers: u32,
    pub max_workers: u32,
    pub scale_up_threshold: u64,
    pub scale_down_threshold: u64,
    pub scale_cooldown_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingStatus {
    #[serde(flatten)]
    pub info: ScalingInfo,
    pub config: ScalingLimits,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFailure {
    pub operation: String,
    pub instance: String,
    pub message: String,
    #[serde(default)]
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconcile {
    pub direction: String,
    pub previous_running: u32,
    pub target: u32,
    #[serde(default)]
    pub started: Vec<String>,
    #[serde(default)]
    pub created: Vec<String>,
    #[serde(default)]
    pub stopped: Vec<String>,
    #[serde(default)]
    pub failures: Vec<OperationFailure>,
    #[serde(default)]
    pub unmet: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    NoAction,
    Executed {
        reconcile: Reconcile,
    },
    Blocked {
        #[serde(rename = "remainingCooldownSeconds")]
        remaining_cooldown_seconds: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub message: String,
    pub forced: bool,
    pub action: String,
    pub target: u32,
    pub reason: String,
    pub outcome: Outcome,
    pub timestamp: String,
    pub updated_info: Option<ScalingInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.error, message),
            None => write!(f, "{}", self.error),
        }
    }
}
