// Scheduler binary entry point

use anyhow::Result;
use common::config::Settings;
use common::scheduler::{register_default_jobs, JobRegistry, Scheduler};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    settings.validate()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        enabled = settings.scheduler.enabled,
        timezone = %settings.scheduler.timezone,
        jobs = settings.scheduler.jobs.len(),
        "Starting Courier Scheduler"
    );

    let mut registry = JobRegistry::new(&settings.scheduler)?;
    register_default_jobs(&mut registry);

    let scheduled = registry.initialize(&settings.scheduler.jobs).await.map_err(|e| {
        error!(error = %e, "Failed to initialize scheduled jobs");
        e
    })?;
    info!(jobs = scheduled, "Scheduled jobs initialized");

    let scheduler = Arc::new(registry);
    scheduler.start().await;

    // Run until Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    scheduler.stop().await;
    telemetry::shutdown_tracer();

    info!("Scheduler stopped");
    Ok(())
}
