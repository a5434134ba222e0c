//! In-process backends
//!
//! A simulated worker pool, activity store and telemetry source. Used by the
//! `memory` backend of the service for local runs, and as fakes in tests.

use super::{
    async_trait, ActivityStore, BacklogCounter, OrchestrationProvider, PoolInspector, QueueLength,
    TelemetrySource,
};
use crate::error::{Operation, Result, ScalerError};
use crate::models::{InstanceState, PoolInstance, WorkerSpec};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Simulated worker pool acting as both inspector and provider
#[derive(Default)]
pub struct InMemoryPool {
    instances: DashMap<String, PoolInstance>,
    failing: DashSet<(Operation, String)>,
    calls: Mutex<Vec<(Operation, String)>>,
    latency: Mutex<Duration>,
}

impl InMemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the pool with an instance named `{pool}-{ordinal}`
    pub fn insert(&self, pool: &str, ordinal: u32, state: InstanceState) {
        let name = format!("{}-{}", pool, ordinal);
        self.instances.insert(
            name.clone(),
            PoolInstance {
                name,
                state,
                ordinal,
            },
        );
    }

    /// Make `operation` fail for the named instance
    pub fn fail_on(&self, operation: Operation, name: &str) {
        self.failing.insert((operation, name.to_string()));
    }

    /// Delay every operation, to exercise timeouts and concurrency
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Operations issued so far, in call order
    pub fn calls(&self) -> Vec<(Operation, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn state_of(&self, name: &str) -> Option<InstanceState> {
        self.instances.get(name).map(|i| i.state.clone())
    }

    async fn apply(&self, operation: Operation, name: &str) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((operation, name.to_string()));
        }

        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failing.contains(&(operation, name.to_string())) {
            return Err(ScalerError::provider(operation, name, "injected failure"));
        }
        Ok(())
    }

    fn set_state(&self, operation: Operation, name: &str, state: InstanceState) -> Result<()> {
        let mut instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| ScalerError::provider(operation, name, "no such instance"))?;
        instance.state = state;
        Ok(())
    }
}

#[async_trait]
impl PoolInspector for InMemoryPool {
    async fn list_instances(&self, pool: &str) -> Result<Vec<PoolInstance>> {
        let prefix = format!("{}-", pool);
        let mut instances: Vec<PoolInstance> = self
            .instances
            .iter()
            .filter(|r| r.key().starts_with(&prefix))
            .map(|r| r.value().clone())
            .collect();
        instances.sort_by_key(|i| i.ordinal);
        Ok(instances)
    }
}

#[async_trait]
impl OrchestrationProvider for InMemoryPool {
    async fn start(&self, name: &str) -> Result<()> {
        self.apply(Operation::Start, name).await?;
        self.set_state(Operation::Start, name, InstanceState::Running)?;
        debug!(worker = %name, "Started simulated worker");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.apply(Operation::Stop, name).await?;
        self.set_state(Operation::Stop, name, InstanceState::StoppedOrTerminated)?;
        debug!(worker = %name, "Stopped simulated worker");
        Ok(())
    }

    async fn create(&self, spec: &WorkerSpec) -> Result<()> {
        self.apply(Operation::Create, &spec.name).await?;
        self.instances.insert(
            spec.name.clone(),
            PoolInstance {
                name: spec.name.clone(),
                state: InstanceState::Running,
                ordinal: spec.ordinal,
            },
        );
        debug!(worker = %spec.name, ordinal = spec.ordinal, "Created simulated worker");
        Ok(())
    }
}

struct Entry {
    value: i64,
    ttl: Duration,
    expires_at: Instant,
}

/// Activity store with per-key expiry
#[derive(Default)]
pub struct InMemoryActivityStore {
    entries: DashMap<String, Entry>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// TTL the key was last written with
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).map(|e| e.ttl)
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ScalerError::ActivityStore("read unavailable".to_string()));
        }

        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ScalerError::ActivityStore("write unavailable".to_string()));
        }

        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Telemetry with settable readings
#[derive(Default)]
pub struct StaticTelemetry {
    queue_depth: AtomicU64,
    backlog: AtomicU64,
    failing: AtomicBool,
}

impl StaticTelemetry {
    pub fn new(queue_depth: u64, backlog: u64) -> Self {
        Self {
            queue_depth: AtomicU64::new(queue_depth),
            backlog: AtomicU64::new(backlog),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, queue_depth: u64, backlog: u64) {
        self.queue_depth.store(queue_depth, Ordering::SeqCst);
        self.backlog.store(backlog, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ScalerError::Telemetry("metrics unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySource for StaticTelemetry {
    async fn queue_depth(&self, _queue: &str) -> Result<u64> {
        self.check()?;
        Ok(self.queue_depth.load(Ordering::SeqCst))
    }

    async fn backlog_count(&self, _queue: &str) -> Result<u64> {
        self.check()?;
        Ok(self.backlog.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl QueueLength for StaticTelemetry {
    async fn queue_length(&self, queue: &str) -> Result<u64> {
        self.queue_depth(queue).await
    }
}

#[async_trait]
impl BacklogCounter for StaticTelemetry {
    async fn unfinished_jobs(&self) -> Result<u64> {
        self.check()?;
        Ok(self.backlog.load(Ordering::SeqCst))
    }
}
