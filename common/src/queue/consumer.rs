// Consumer bridge: feeds broker deliveries into the processor registry

use crate::config::BrokerConfig;
use crate::errors::QueueError;
use crate::messaging::{MessageContext, ProcessorRegistry};
use crate::queue::{Broker, Delivery};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Consumer lifecycle
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Consume until shutdown is requested or the delivery stream ends
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown
    fn shutdown(&self);
}

/// Consumes one queue, one delivery at a time
pub struct ConsumerBridge {
    queue: String,
    broker: Arc<dyn Broker>,
    registry: Arc<ProcessorRegistry>,
    max_deliveries: Option<u64>,
    cancel: CancellationToken,
}

impl ConsumerBridge {
    pub fn new(
        queue: impl Into<String>,
        broker: Arc<dyn Broker>,
        registry: Arc<ProcessorRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: queue.into(),
            broker,
            registry,
            max_deliveries: None,
            cancel,
        }
    }

    /// Discard a failing message once it has been delivered this many times
    pub fn with_max_deliveries(mut self, max_deliveries: Option<u64>) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Dispatch one delivery and settle it
    #[instrument(skip(self, delivery), fields(queue = %self.queue, attempt = delivery.delivery_count()))]
    async fn handle_delivery(&self, delivery: Box<dyn Delivery>) -> Result<(), QueueError> {
        let attempt = delivery.delivery_count();
        let ctx = MessageContext::new(self.queue.clone(), attempt, self.cancel.clone());

        match self.registry.dispatch(&ctx, delivery.payload()).await {
            Ok(()) => {
                delivery.ack().await?;
                debug!("Message acknowledged");
            }
            Err(e) => match self.max_deliveries {
                Some(max) if attempt >= max => {
                    error!(
                        error = %e,
                        max_deliveries = max,
                        "Message exceeded its delivery limit, discarding"
                    );
                    delivery.reject(false).await?;
                }
                _ => {
                    warn!(error = %e, "Message processing failed, requeueing");
                    delivery.reject(true).await?;
                }
            },
        }

        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for ConsumerBridge {
    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn start(&self) -> Result<(), QueueError> {
        info!("Starting consumer");

        let mut deliveries = self.broker.subscribe(&self.queue).await?;

        info!("Consumer started, waiting for messages");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        // Settles before the next cancellation check
                        if let Err(e) = self.handle_delivery(delivery).await {
                            error!(error = %e, "Failed to settle message");
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Error receiving message");
                        let _ = tokio::time::timeout(
                            Duration::from_secs(1),
                            self.cancel.cancelled(),
                        )
                        .await;
                    }
                    None => {
                        warn!("Delivery stream ended unexpectedly");
                        break;
                    }
                },
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    fn shutdown(&self) {
        info!(queue = %self.queue, "Requesting consumer shutdown");
        self.cancel.cancel();
    }
}

/// One consumer bridge task per queue, sharing a cancellation token
pub struct ConsumerPool {
    cancel: CancellationToken,
    tasks: JoinSet<(String, Result<(), QueueError>)>,
}

impl ConsumerPool {
    pub fn start<I, S>(
        broker: Arc<dyn Broker>,
        registry: Arc<ProcessorRegistry>,
        queues: I,
        max_deliveries: Option<u64>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for queue in queues {
            let bridge = ConsumerBridge::new(
                queue,
                broker.clone(),
                registry.clone(),
                cancel.child_token(),
            )
            .with_max_deliveries(max_deliveries);

            tasks.spawn(async move {
                let result = bridge.start().await;
                (bridge.queue, result)
            });
        }

        info!(consumers = tasks.len(), "Consumer pool started");
        Self { cancel, tasks }
    }

    /// One bridge for every queue in the broker configuration
    pub fn from_config(
        broker: Arc<dyn Broker>,
        registry: Arc<ProcessorRegistry>,
        config: &BrokerConfig,
    ) -> Self {
        Self::start(
            broker,
            registry,
            config.queues.iter().map(|queue| queue.name.clone()),
            config.max_deliveries,
        )
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the next bridge to exit on its own. `None` once all have exited.
    pub async fn next_exit(&mut self) -> Option<String> {
        let joined = self.tasks.join_next().await?;
        Some(Self::log_exit(joined))
    }

    /// Cancel every bridge and wait for each to finish its in-flight delivery
    pub async fn shutdown(mut self) {
        info!(consumers = self.tasks.len(), "Shutting down consumer pool");
        self.cancel.cancel();

        while let Some(joined) = self.tasks.join_next().await {
            Self::log_exit(joined);
        }

        info!("Consumer pool stopped");
    }

    fn log_exit(
        joined: Result<(String, Result<(), QueueError>), tokio::task::JoinError>,
    ) -> String {
        match joined {
            Ok((queue, Ok(()))) => {
                debug!(queue = %queue, "Consumer exited");
                queue
            }
            Ok((queue, Err(e))) => {
                error!(queue = %queue, error = %e, "Consumer exited with error");
                queue
            }
            Err(e) => {
                error!(error = %e, "Consumer task failed");
                String::new()
            }
        }
    }
}
