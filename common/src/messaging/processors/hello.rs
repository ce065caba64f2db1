// Sample "hello" processor

use crate::envelope::Envelope;
use crate::errors::ProcessingError;
use crate::messaging::{MessageContext, Processor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub const HELLO_MESSAGE_TYPE: &str = "hello";

/// Payload of a "hello" message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloEvent {
    pub content: String,
    pub sender: String,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct HelloProcessor;

impl HelloProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Reply produced for a greeting
    pub fn reply_to(event: &HelloEvent) -> String {
        format!("Hello back, {}!", event.sender)
    }
}

#[async_trait]
impl Processor for HelloProcessor {
    fn supported_type(&self) -> &str {
        HELLO_MESSAGE_TYPE
    }

    #[instrument(skip_all, fields(message_id = %envelope.message_id))]
    async fn handle(&self, _ctx: &MessageContext, envelope: &Envelope) -> Result<(), ProcessingError> {
        let event: HelloEvent = envelope.payload_as()?;

        info!(
            content = %event.content,
            sender = %event.sender,
            timestamp = event.timestamp,
            reply = %Self::reply_to(&event),
            "Hello message processed"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope;

    #[tokio::test]
    async fn test_hello_processor_accepts_event() {
        let envelope = envelope::decode(
            br#"{"message_id":"m1","message_type":"hello","payload":{"content":"hi","sender":"a"},"timestamp":1}"#,
        )
        .unwrap();

        let result = HelloProcessor::new()
            .handle(&MessageContext::detached(), &envelope)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_hello_processor_rejects_bad_payload() {
        let envelope = envelope::decode(
            br#"{"message_id":"m2","message_type":"hello","payload":{"content":42},"timestamp":1}"#,
        )
        .unwrap();

        let result = HelloProcessor::new()
            .handle(&MessageContext::detached(), &envelope)
            .await;
        assert!(matches!(result, Err(ProcessingError::InvalidPayload(_))));
    }

    #[test]
    fn test_reply() {
        let event = HelloEvent {
            content: "hi".to_string(),
            sender: "a".to_string(),
            timestamp: 0,
        };
        assert_eq!(HelloProcessor::reply_to(&event), "Hello back, a!");
    }
}
