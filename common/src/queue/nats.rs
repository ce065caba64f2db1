// NATS JetStream broker
//
// Exchanges become streams capturing `<exchange>.>`; queues become durable
// pull consumers filtered on `<exchange>.<routing_key>`.

use crate::config::{BrokerConfig, QueueConfig};
use crate::errors::QueueError;
use crate::queue::{Broker, Delivery, DeliveryStream};
use async_nats::jetstream::{
    consumer::{pull::Config as PullConfig, AckPolicy, PullConsumer},
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    AckKind, Context as JetStreamContext, Message,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Subject a message published to `exchange` with `routing_key` travels on
pub fn subject(exchange: &str, routing_key: &str) -> String {
    format!("{}.{}", exchange, routing_key)
}

/// NATS JetStream broker
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: BrokerConfig,
}

impl NatsBroker {
    /// Create a broker from an existing client
    pub fn from_client(client: async_nats::Client, config: BrokerConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            config,
        }
    }

    /// Connect to the NATS server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: BrokerConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server successfully");
        Ok(Self::from_client(client, config))
    }

    /// Declare a stream per exchange and a durable consumer per queue
    #[instrument(skip(self))]
    pub async fn initialize_topology(&self) -> Result<(), QueueError> {
        for exchange in &self.config.exchanges {
            self.declare_stream(&exchange.name).await?;
        }
        for queue in &self.config.queues {
            self.declare_consumer(queue).await?;
        }

        info!(
            exchanges = self.config.exchanges.len(),
            queues = self.config.queues.len(),
            "Broker topology declared"
        );
        Ok(())
    }

    async fn declare_stream(&self, exchange: &str) -> Result<Stream, QueueError> {
        let stream_config = StreamConfig {
            name: exchange.to_string(),
            subjects: vec![format!("{}.>", exchange)],
            // Messages are removed once every bound consumer has acknowledged them
            retention: RetentionPolicy::Interest,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| {
                QueueError::StreamCreation(format!("Failed to create stream {}: {}", exchange, e))
            })?;

        info!(exchange = %exchange, "Stream initialized successfully");
        Ok(stream)
    }

    async fn declare_consumer(&self, queue: &QueueConfig) -> Result<PullConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&queue.exchange)
            .await
            .map_err(|e| {
                QueueError::StreamNotFound(format!("Stream {} not found: {}", queue.exchange, e))
            })?;

        let consumer_config = PullConfig {
            durable_name: Some(queue.name.clone()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            max_ack_pending: 1,
            filter_subjects: queue
                .routing_keys
                .iter()
                .map(|key| subject(&queue.exchange, key))
                .collect(),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&queue.name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!(
                    "Failed to create consumer {}: {}",
                    queue.name, e
                ))
            })?;

        info!(
            queue = %queue.name,
            exchange = %queue.exchange,
            routing_keys = ?queue.routing_keys,
            "Consumer created successfully"
        );
        Ok(consumer)
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Verify that every declared stream is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        for exchange in &self.config.exchanges {
            self.jetstream
                .get_stream(&exchange.name)
                .await
                .map_err(|e| QueueError::HealthCheck(format!("Health check failed: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for NatsBroker {
    #[instrument(skip(self))]
    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
        let queue_config = self
            .config
            .queue(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let consumer = self.declare_consumer(queue_config).await?;
        let messages = consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        let deliveries = messages.map(|result| {
            result
                .map(|message| Box::new(NatsDelivery { message }) as Box<dyn Delivery>)
                .map_err(|e| QueueError::ConsumeFailed(format!("Error receiving message: {}", e)))
        });

        Ok(deliveries.boxed())
    }

    #[instrument(skip(self, payload), fields(payload_bytes = payload.len()))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let subject = subject(exchange, routing_key);
        let publish_timeout = self.config.publish_timeout();

        let ack_future = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        match tokio::time::timeout(publish_timeout, ack_future).await {
            Ok(Ok(ack)) => {
                debug!(subject = %subject, sequence = ack.sequence, "Message published");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                publish_timeout
            ))),
        }
    }
}

/// A JetStream message awaiting acknowledgement
struct NatsDelivery {
    message: Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn delivery_count(&self) -> u64 {
        self.message
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::AckFailed(format!("Failed to acknowledge message: {}", e)))
    }

    async fn reject(&self, requeue: bool) -> Result<(), QueueError> {
        let kind = if requeue {
            AckKind::Nak(None)
        } else {
            AckKind::Term
        };

        self.message.ack_with(kind).await.map_err(|e| {
            QueueError::AckFailed(format!("Failed to negative acknowledge message: {}", e))
        })
    }
}
