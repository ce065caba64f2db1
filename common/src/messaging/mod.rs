// Message dispatch: processor trait, per-message context and the registry
// that routes envelopes to processors by message type.

pub mod processors;
pub mod registry;

use crate::envelope::Envelope;
use crate::errors::ProcessingError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use processors::register_default_processors;
pub use registry::ProcessorRegistry;

/// Handler for one specific message type
#[async_trait]
pub trait Processor: Send + Sync {
    /// Message type tag this processor handles
    fn supported_type(&self) -> &str;

    /// Process one envelope. Errors cause the delivery to be rejected and requeued.
    async fn handle(&self, ctx: &MessageContext, envelope: &Envelope) -> Result<(), ProcessingError>;
}

/// Per-delivery context handed to processors
#[derive(Debug, Clone)]
pub struct MessageContext {
    queue: Option<String>,
    attempt: u64,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub fn new(queue: impl Into<String>, attempt: u64, cancellation: CancellationToken) -> Self {
        Self {
            queue: Some(queue.into()),
            attempt,
            cancellation,
        }
    }

    /// Context for a message that did not come from a queue subscription
    pub fn detached() -> Self {
        Self {
            queue: None,
            attempt: 1,
            cancellation: CancellationToken::new(),
        }
    }

    /// Queue the message was received from
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Delivery attempt, starting at 1
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Token cancelled when the consumer is shutting down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
