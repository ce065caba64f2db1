// Worker binary entry point: one consumer bridge per configured queue

use anyhow::Result;
use common::config::Settings;
use common::messaging::{register_default_processors, ProcessorRegistry};
use common::queue::{self, ConsumerPool};
use common::telemetry;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;
    settings.validate()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting Courier Worker");

    // Connect to the broker and declare the topology
    let broker = queue::connect(&settings.broker).await.map_err(|e| {
        error!(error = %e, "Failed to initialize broker");
        anyhow::anyhow!("Broker initialization error: {}", e)
    })?;

    info!(broker = ?settings.broker.kind, "Broker initialized");

    // Processors are registered once, then shared read-only by every bridge
    let mut registry = ProcessorRegistry::new();
    register_default_processors(&mut registry);
    let registry = Arc::new(registry);

    info!(
        message_types = ?registry.registered_types(),
        "Processor registry initialized"
    );

    let mut pool = ConsumerPool::from_config(broker, registry, &settings.broker);

    info!(
        consumers = pool.len(),
        "Worker is running. Press Ctrl+C to shutdown gracefully"
    );

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown signal received, initiating graceful shutdown"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        },
        exited = pool.next_exit() => {
            warn!(queue = ?exited, "Consumer exited before shutdown was requested");
        }
    }

    // Each bridge settles its in-flight delivery before returning
    info!("Waiting for consumers to complete in-flight messages");
    pool.shutdown().await;
    telemetry::shutdown_tracer();

    info!("Worker shutdown complete");
    Ok(())
}
