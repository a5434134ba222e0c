//! Autoscaler library for job-processing worker pools
//!
//! This crate provides the core functionality for:
//! - Deriving worker statistics from queue telemetry
//! - Pure scaling decisions against a configurable policy
//! - Cooldown gating of scale-down
//! - Reconciling the pool through an orchestration provider
//! - Backends for Upstash Redis, PostgreSQL and Azure Container Instances
//! - Health checks and observability

pub mod config;
pub mod control;
pub mod cooldown;
pub mod decision;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconciler;
pub mod sources;
pub mod telemetry;

pub use config::ScalingConfig;
pub use control::{ControlLoop, ControlLoopBuilder, CycleOutcome, CycleReport};
pub use cooldown::CooldownController;
pub use decision::decide;
pub use error::{Operation, Result, ScalerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use reconciler::{PoolReconciler, ReconcileOutcome, ScaleDirection};
