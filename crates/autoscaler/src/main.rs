//! Worker Autoscaler - keeps a job-processing worker pool sized to its queue
//!
//! Runs scaling checks on a timer and on demand over HTTP, and serves
//! health and metrics endpoints.

use anyhow::{Context, Result};
use autoscaler_lib::health::HealthRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worker_autoscaler::{api, backend, config::AppConfig};

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting worker-autoscaler");

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        pool = %config.pool,
        queue = %config.queue,
        backend = config.backend.as_str(),
        min_workers = config.scaling.min_workers,
        max_workers = config.scaling.max_workers,
        "Autoscaler configured"
    );

    let health_registry = HealthRegistry::with_components();
    let scaler = Arc::new(backend::build_control_loop(&config, health_registry.clone())?);
    scaler
        .logger()
        .log_startup(AUTOSCALER_VERSION, config.backend.as_str());

    let app_state = Arc::new(api::AppState::new(scaler.clone()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(
        scaler
            .clone()
            .run(Duration::from_secs(config.check_interval_secs), shutdown_rx),
    );

    health_registry.set_ready(true);

    let api_handle = tokio::spawn(api::serve(config.port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            scaler.logger().log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => scaler.logger().log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false);
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Control loop task panicked");
    }

    info!("Shutdown complete");
    Ok(())
}
