//! Error types for the autoscaler core

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for autoscaler operations
pub type Result<T> = std::result::Result<T, ScalerError>;

/// Errors that can occur while observing or reconciling the worker pool
///
/// A cooldown block is deliberately absent: it is a normal outcome of a
/// cycle, not a failure.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// Queue depth or backlog could not be read
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Pool instances could not be listed
    #[error("pool inventory error: {0}")]
    Inventory(String),

    /// A provider operation failed for one instance
    #[error("{operation} failed for worker {instance}: {message}")]
    Provider {
        operation: Operation,
        instance: String,
        message: String,
    },

    /// A provider operation did not settle within the per-instance timeout
    #[error("{operation} timed out for worker {instance} after {}s", timeout.as_secs())]
    Timeout {
        operation: Operation,
        instance: String,
        timeout: Duration,
    },

    /// Activity store read or write failed
    #[error("activity store error: {0}")]
    ActivityStore(String),

    /// Configuration violates an invariant
    #[error("configuration error: {0}")]
    Config(String),
}

impl ScalerError {
    pub fn provider(operation: Operation, instance: impl Into<String>, message: impl ToString) -> Self {
        ScalerError::Provider {
            operation,
            instance: instance.into(),
            message: message.to_string(),
        }
    }
}

/// Provider operation kinds, used for error reporting and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Create,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Create => "create",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
