// Queue module: broker boundary, publishing and consumer bridges

pub mod consumer;
pub mod memory;
pub mod nats;
pub mod publisher;

pub use consumer::{ConsumerBridge, ConsumerPool, MessageConsumer};
pub use memory::{MemoryBroker, MemoryStats};
pub use nats::NatsBroker;
pub use publisher::EnvelopePublisher;

use crate::config::{BrokerConfig, BrokerKind};
use crate::errors::QueueError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// One message handed out by a broker, settled exactly once
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// 1 on first delivery, incremented on each redelivery
    fn delivery_count(&self) -> u64;

    async fn ack(&self) -> Result<(), QueueError>;

    /// Negative acknowledgement; `requeue = false` discards the message
    async fn reject(&self, requeue: bool) -> Result<(), QueueError>;
}

pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, QueueError>>;

/// Message broker with exchange/routing-key publishing and named queues
#[async_trait]
pub trait Broker: Send + Sync {
    /// Subscribe to a declared queue with a prefetch of one
    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, QueueError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), QueueError>;
}

/// Build the broker selected by configuration and declare its topology
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn Broker>, QueueError> {
    match config.kind {
        BrokerKind::Nats => {
            let broker = NatsBroker::connect(config.clone()).await?;
            broker.initialize_topology().await?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => Ok(Arc::new(MemoryBroker::from_config(config))),
    }
}
