use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod middleware;
mod routes;
mod state;

use common::config::Settings;
use common::messaging::{register_default_processors, ProcessorRegistry};
use common::queue::{self, EnvelopePublisher};
use common::scheduler::{register_default_jobs, JobRegistry, Scheduler};
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load()?;
    config.validate()?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;
    let metrics_handle = telemetry::install_metrics_recorder()?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        broker = ?config.broker.kind,
        "Configuration loaded"
    );

    // Broker and publisher
    let broker = queue::connect(&config.broker).await?;
    let publisher = EnvelopePublisher::new(broker).with_source("api");
    tracing::info!("Broker connected");

    // Processor registry, exposed for diagnostics
    let mut processors = ProcessorRegistry::new();
    register_default_processors(&mut processors);

    // Job registry hosted by this process
    let mut jobs = JobRegistry::new(&config.scheduler)?;
    register_default_jobs(&mut jobs);
    jobs.initialize(&config.scheduler.jobs).await?;
    let scheduler: Arc<dyn Scheduler> = Arc::new(jobs);
    scheduler.start().await;

    let state = AppState::new(
        scheduler.clone(),
        Arc::new(processors),
        publisher,
        config.clone(),
    )
    .with_metrics(metrics_handle);

    // Create router
    let app = routes::create_router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    telemetry::shutdown_tracer();

    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
