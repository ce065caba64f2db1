// In-process broker with exchange bindings and requeue on reject

use crate::config::BrokerConfig;
use crate::errors::QueueError;
use crate::queue::{Broker, Delivery, DeliveryStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

struct QueuedMessage {
    payload: Vec<u8>,
    delivery_count: u64,
}

struct QueueSlot {
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<QueuedMessage>>>,
}

impl QueueSlot {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }
}

struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

#[derive(Default)]
struct Topology {
    exchanges: HashSet<String>,
    bindings: Vec<Binding>,
    queues: HashMap<String, QueueSlot>,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    discarded: AtomicU64,
    unroutable: AtomicU64,
}

/// Point-in-time copy of the broker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub published: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub unroutable: u64,
}

/// Broker kept entirely in memory. Competing subscribers on one queue share
/// its messages; a rejected message with requeue goes to the back of its queue.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    topology: Arc<RwLock<Topology>>,
    counters: Arc<Counters>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every exchange, queue and binding from configuration
    pub fn from_config(config: &BrokerConfig) -> Self {
        let mut topology = Topology::default();
        for exchange in &config.exchanges {
            topology.exchanges.insert(exchange.name.clone());
        }
        for queue in &config.queues {
            topology
                .queues
                .entry(queue.name.clone())
                .or_insert_with(QueueSlot::new);
            for key in &queue.routing_keys {
                topology.bindings.push(Binding {
                    exchange: queue.exchange.clone(),
                    routing_key: key.clone(),
                    queue: queue.name.clone(),
                });
            }
        }

        info!(
            exchanges = topology.exchanges.len(),
            queues = topology.queues.len(),
            "In-memory broker topology declared"
        );

        Self {
            topology: Arc::new(RwLock::new(topology)),
            counters: Arc::default(),
        }
    }

    pub async fn declare_exchange(&self, name: impl Into<String>) {
        self.topology.write().await.exchanges.insert(name.into());
    }

    /// Declare `queue` and bind it to `exchange` under each routing key
    pub async fn declare_queue(&self, queue: &str, exchange: &str, routing_keys: &[&str]) {
        let mut topology = self.topology.write().await;
        topology
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueSlot::new);
        for key in routing_keys {
            topology.bindings.push(Binding {
                exchange: exchange.to_string(),
                routing_key: (*key).to_string(),
                queue: queue.to_string(),
            });
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            published: self.counters.published.load(Ordering::SeqCst),
            acked: self.counters.acked.load(Ordering::SeqCst),
            requeued: self.counters.requeued.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
            unroutable: self.counters.unroutable.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
        let topology = self.topology.read().await;
        let slot = topology
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;

        let receiver = slot.receiver.clone();
        let requeue = slot.sender.clone();
        let counters = self.counters.clone();
        debug!(queue = %queue, "Subscribed to in-memory queue");

        let deliveries = futures::stream::unfold(receiver, move |receiver| {
            let requeue = requeue.clone();
            let counters = counters.clone();
            async move {
                let message = receiver.lock().await.recv().await?;
                let delivery = MemoryDelivery {
                    payload: message.payload,
                    delivery_count: message.delivery_count,
                    requeue,
                    counters,
                    settled: AtomicBool::new(false),
                };
                Some((Ok(Box::new(delivery) as Box<dyn Delivery>), receiver))
            }
        });

        Ok(deliveries.boxed())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let topology = self.topology.read().await;
        if !topology.exchanges.contains(exchange) {
            return Err(QueueError::PublishFailed(format!(
                "Exchange {} is not declared",
                exchange
            )));
        }

        self.counters.published.fetch_add(1, Ordering::SeqCst);

        let mut routed = 0;
        for binding in topology
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
        {
            if let Some(slot) = topology.queues.get(&binding.queue) {
                slot.sender
                    .send(QueuedMessage {
                        payload: payload.clone(),
                        delivery_count: 1,
                    })
                    .map_err(|e| QueueError::PublishFailed(e.to_string()))?;
                routed += 1;
            }
        }

        if routed == 0 {
            self.counters.unroutable.fetch_add(1, Ordering::SeqCst);
            warn!(
                exchange = %exchange,
                routing_key = %routing_key,
                "Message dropped, no queue bound for routing key"
            );
        }

        Ok(())
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    delivery_count: u64,
    requeue: mpsc::UnboundedSender<QueuedMessage>,
    counters: Arc<Counters>,
    settled: AtomicBool,
}

impl MemoryDelivery {
    fn settle(&self) -> Result<(), QueueError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AckFailed(
                "Delivery already acknowledged".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_count(&self) -> u64 {
        self.delivery_count
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.settle()?;
        self.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), QueueError> {
        self.settle()?;

        if !requeue {
            self.counters.discarded.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        self.requeue
            .send(QueuedMessage {
                payload: self.payload.clone(),
                delivery_count: self.delivery_count + 1,
            })
            .map_err(|e| QueueError::AckFailed(format!("Failed to requeue message: {}", e)))?;
        self.counters.requeued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
