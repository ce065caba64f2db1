// Envelope publisher with bounded retry

use crate::envelope::{self, Envelope};
use crate::errors::QueueError;
use crate::queue::Broker;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Encodes envelopes and publishes them through a [`Broker`]
#[derive(Clone)]
pub struct EnvelopePublisher {
    broker: Arc<dyn Broker>,
    source: Option<String>,
    max_retries: u32,
}

impl EnvelopePublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            source: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Stamp every built envelope with `source`
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wrap `payload` in a new envelope of `message_type` and publish it
    pub async fn publish_event<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        message_type: &str,
        payload: &T,
    ) -> Result<Envelope, QueueError> {
        let mut envelope = Envelope::new(message_type, payload)?;
        if let Some(source) = &self.source {
            envelope = envelope.with_source(source.clone());
        }

        self.publish(exchange, routing_key, &envelope).await?;
        Ok(envelope)
    }

    /// Publish an envelope, retrying with exponential backoff
    #[instrument(skip(self, envelope), fields(
        message_id = %envelope.message_id,
        message_type = %envelope.message_type,
    ))]
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
    ) -> Result<(), QueueError> {
        let body = envelope::encode(envelope)?;

        let mut attempt = 0;
        loop {
            match self
                .broker
                .publish(exchange, routing_key, body.clone())
                .await
            {
                Ok(()) => {
                    info!(
                        exchange = %exchange,
                        routing_key = %routing_key,
                        "Message published successfully"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Backoff before retry `attempt` (1-based): doubling from the base delay,
/// capped at `MAX_RETRY_DELAY`
fn retry_delay(attempt: u32) -> Duration {
    2_u32
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| BASE_RETRY_DELAY.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::processors::hello::{HelloEvent, HELLO_MESSAGE_TYPE};
    use crate::queue::{DeliveryStream, MemoryBroker};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` publishes
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Broker for Flaky {
        async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
            Err(QueueError::QueueNotFound(queue.to_string()))
        }

        async fn publish(&self, _: &str, _: &str, _: Vec<u8>) -> Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(QueueError::PublishFailed("broker unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn event() -> HelloEvent {
        HelloEvent {
            content: "hi".to_string(),
            sender: "tester".to_string(),
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_publish_event_reaches_bound_queue() {
        let broker = MemoryBroker::new();
        broker.declare_exchange("hello").await;
        broker.declare_queue("hello_queue", "hello", &["hello"]).await;
        let mut deliveries = broker.subscribe("hello_queue").await.unwrap();

        let publisher = EnvelopePublisher::new(Arc::new(broker.clone())).with_source("api");
        let sent = publisher
            .publish_event("hello", "hello", HELLO_MESSAGE_TYPE, &event())
            .await
            .unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        let received = envelope::decode(delivery.payload()).unwrap();
        assert_eq!(received.message_id, sent.message_id);
        assert_eq!(received.source.as_deref(), Some("api"));
        assert_eq!(received.payload_as::<HelloEvent>().unwrap(), event());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_retries_transient_failures() {
        let broker = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let publisher = EnvelopePublisher::new(broker.clone());

        let result = publisher
            .publish_event("hello", "hello", HELLO_MESSAGE_TYPE, &event())
            .await;
        assert!(result.is_ok());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_gives_up_after_max_retries() {
        let broker = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let publisher = EnvelopePublisher::new(broker.clone()).with_max_retries(2);

        let result = publisher
            .publish_event("hello", "hello", HELLO_MESSAGE_TYPE, &event())
            .await;
        assert!(matches!(result, Err(QueueError::PublishFailed(_))));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(100));
        assert_eq!(retry_delay(2), Duration::from_millis(200));
        assert_eq!(retry_delay(4), Duration::from_millis(800));
        assert_eq!(retry_delay(10), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(33), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_with_many_retries_does_not_overflow() {
        let broker = Arc::new(Flaky {
            failures: 40,
            calls: AtomicU32::new(0),
        });
        let publisher = EnvelopePublisher::new(broker.clone()).with_max_retries(64);

        let result = publisher
            .publish_event("hello", "hello", HELLO_MESSAGE_TYPE, &event())
            .await;
        assert!(result.is_ok());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 41);
    }
}
