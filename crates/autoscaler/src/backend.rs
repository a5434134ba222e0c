//! Wiring of the configured backends into a control loop

use crate::config::{AppConfig, Backend, MemoryBackendConfig};
use anyhow::{Context, Result};
use autoscaler_lib::{
    health::HealthRegistry,
    sources::{
        ContainerInstances, InMemoryActivityStore, InMemoryPool, StaticTelemetry,
        SubmissionBacklog, UpstashClient,
    },
    telemetry::SplitTelemetry,
    ControlLoop, ControlLoopBuilder, InstanceState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the control loop for the configured backend
pub fn build_control_loop(config: &AppConfig, health: HealthRegistry) -> Result<ControlLoop> {
    let builder = ControlLoopBuilder::new()
        .config(config.scaling.clone())
        .pool(config.pool.clone())
        .queue(config.queue.clone())
        .health(health);

    let builder = match config.backend {
        Backend::Memory => with_memory_backend(builder, &config.pool, &config.memory),
        Backend::Azure => with_azure_backend(builder, config)?,
    };

    builder.build().context("Failed to build control loop")
}

fn with_memory_backend(
    builder: ControlLoopBuilder,
    pool_name: &str,
    seed: &MemoryBackendConfig,
) -> ControlLoopBuilder {
    let pool = Arc::new(InMemoryPool::new());
    for ordinal in 1..=seed.running_workers {
        pool.insert(pool_name, ordinal, InstanceState::Running);
    }
    for ordinal in 1..=seed.stopped_workers {
        pool.insert(pool_name, seed.running_workers + ordinal, InstanceState::StoppedOrTerminated);
    }
    info!(
        running = seed.running_workers,
        stopped = seed.stopped_workers,
        "Using in-memory worker pool"
    );

    builder
        .telemetry(Arc::new(StaticTelemetry::new(seed.queue_depth, seed.backlog)))
        .inspector(pool.clone())
        .provider(pool)
        .activity_store(Arc::new(InMemoryActivityStore::new()))
}

fn with_azure_backend(builder: ControlLoopBuilder, config: &AppConfig) -> Result<ControlLoopBuilder> {
    let redis = config.redis.as_ref().context("missing [redis] settings")?;
    let database = config.database.as_ref().context("missing [database] settings")?;
    let azure = config.azure.clone().context("missing [azure] settings")?;
    let resource_group = azure.resource_group.clone();

    let upstash = Arc::new(
        UpstashClient::new(&redis.url, redis.token.clone())
            .context("Failed to create Upstash client")?
            .with_queue_key_prefix(redis.queue_key_prefix.clone()),
    );

    let backlog = Arc::new(
        SubmissionBacklog::connect_lazy(
            &database.url,
            Duration::from_secs(database.acquire_timeout_secs),
        )
        .context("Failed to configure submissions database")?,
    );

    let template = config.worker.template(|name| std::env::var(name).ok());
    let instances = Arc::new(
        ContainerInstances::new(azure, template)
            .context("Failed to create Azure Container Instances client")?,
    );

    info!(
        resource_group = %resource_group,
        "Using Azure Container Instances worker pool"
    );

    Ok(builder
        .telemetry(Arc::new(SplitTelemetry::new(upstash.clone(), backlog)))
        .inspector(instances.clone())
        .provider(instances)
        .activity_store(upstash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_lib::ScalingAction;

    fn memory_config(running: u32, stopped: u32, queue_depth: u64) -> AppConfig {
        let json = format!(
            r#"{{"memory": {{"running_workers": {}, "stopped_workers": {}, "queue_depth": {}, "backlog": {}}}}}"#,
            running, stopped, queue_depth, queue_depth
        );
        config::Config::builder()
            .add_source(config::File::from_str(&json, config::FileFormat::Json))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_backend_is_seeded() {
        let config = memory_config(1, 1, 0);
        let scaler = build_control_loop(&config, HealthRegistry::with_components()).unwrap();

        let info = scaler.status().await.unwrap();
        assert_eq!(info.current_workers.running, 1);
        assert_eq!(info.current_workers.stopped, 1);
        assert_eq!(info.current_workers.total, 2);
    }

    #[tokio::test]
    async fn test_memory_backend_scales_up_on_queue() {
        let config = memory_config(0, 2, 12);
        let scaler = build_control_loop(&config, HealthRegistry::with_components()).unwrap();

        let report = scaler.check(false).await.unwrap();
        assert_eq!(report.decision.action, ScalingAction::ScaleUp);

        let info = scaler.status().await.unwrap();
        assert!(info.current_workers.running > 0);
    }
}
