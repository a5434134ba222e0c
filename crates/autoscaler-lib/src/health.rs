//! Component health for the autoscaler's liveness and readiness endpoints
//!
//! Each collaborator the control loop talks to is tracked as a component.
//! A single failed call degrades it; repeated consecutive failures mark it
//! unhealthy, which also takes the service out of readiness.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consecutive failures after which a component is reported unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            last_error: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    fn failed(previous_failures: u32, error: String) -> Self {
        let consecutive_failures = previous_failures + 1;
        let status = if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self {
            status,
            last_error: Some(error),
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const TELEMETRY: &str = "telemetry";
    pub const POOL_INSPECTOR: &str = "pool_inspector";
    pub const PROVIDER: &str = "provider";
    pub const ACTIVITY_STORE: &str = "activity_store";

    pub const ALL: [&str; 4] = [TELEMETRY, POOL_INSPECTOR, PROVIDER, ACTIVITY_STORE];
}

/// Shared component health, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<DashMap<String, ComponentHealth>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every autoscaler component registered as healthy
    pub fn with_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name);
        }
        registry
    }

    pub fn register(&self, name: &str) {
        self.components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub fn record_success(&self, name: &str) {
        self.components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub fn record_failure(&self, name: &str, error: impl ToString) {
        let previous = self
            .components
            .get(name)
            .map(|c| c.consecutive_failures)
            .unwrap_or(0);
        self.components.insert(
            name.to_string(),
            ComponentHealth::failed(previous, error.to_string()),
        );
    }

    /// Record the outcome of one call against a component
    pub fn observe<T, E: ToString>(&self, name: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.record_success(name),
            Err(e) => self.record_failure(name, e.to_string()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.get(name).map(|c| c.clone())
    }

    pub fn health(&self) -> HealthResponse {
        let components: BTreeMap<String, ComponentHealth> = self
            .components
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let status = if components
            .values()
            .any(|c| c.status == ComponentStatus::Unhealthy)
        {
            ComponentStatus::Unhealthy
        } else if components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded)
        {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        HealthResponse { status, components }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Autoscaler not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<String> = self
            .components
            .iter()
            .filter(|r| r.value().status == ComponentStatus::Unhealthy)
            .map(|r| r.key().clone())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", unhealthy.join(", "))),
            }
        }
    }
}
