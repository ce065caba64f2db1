use std::sync::Arc;

use common::config::Settings;
use common::messaging::ProcessorRegistry;
use common::queue::EnvelopePublisher;
use common::scheduler::Scheduler;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<dyn Scheduler>,
    pub processors: Arc<ProcessorRegistry>,
    pub publisher: EnvelopePublisher,
    pub config: Arc<Settings>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        processors: Arc<ProcessorRegistry>,
        publisher: EnvelopePublisher,
        config: Settings,
    ) -> Self {
        Self {
            scheduler,
            processors,
            publisher,
            config: Arc::new(config),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
