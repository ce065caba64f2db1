// Message envelope codec
//
// The envelope carries the routing metadata of a broker message. The business
// payload is kept as raw JSON until the processor for the message type
// decodes it into its own schema.

use crate::errors::DecodeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// Routing wrapper around an opaque business payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub message_type: String,
    #[serde(default = "null_payload")]
    pub payload: Box<RawValue>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn null_payload() -> Box<RawValue> {
    RawValue::NULL.to_owned()
}

impl Envelope {
    /// Build an outbound envelope with a generated id and the current timestamp
    pub fn new<T: Serialize>(message_type: impl Into<String>, payload: &T) -> Result<Self, DecodeError> {
        let payload = serde_json::value::to_raw_value(payload).map_err(DecodeError::Encode)?;
        Ok(Self {
            message_id: format!("msg-{}", Uuid::new_v4()),
            message_type: message_type.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp(),
            source: None,
            version: None,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Decode the payload into the concrete schema of a processor
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_str(self.payload.get()).map_err(|source| DecodeError::Payload {
            message_type: self.message_type.clone(),
            source,
        })
    }

    /// Raw JSON text of the payload
    pub fn raw_payload(&self) -> &str {
        self.payload.get()
    }
}

/// Decode an envelope from broker bytes
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    serde_json::from_slice(bytes).map_err(DecodeError::Envelope)
}

/// Encode an envelope to broker bytes
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, DecodeError> {
    serde_json::to_vec(envelope).map_err(DecodeError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Greeting {
        content: String,
        sender: String,
    }

    #[test]
    fn test_decode_keeps_payload_raw() {
        let bytes = br#"{"message_id":"m1","message_type":"hello","payload":{"content":"hi","sender":"a"},"timestamp":1}"#;
        let envelope = decode(bytes).unwrap();

        assert_eq!(envelope.message_id, "m1");
        assert_eq!(envelope.message_type, "hello");
        assert_eq!(envelope.timestamp, 1);
        assert_eq!(envelope.source, None);
        assert_eq!(envelope.raw_payload(), r#"{"content":"hi","sender":"a"}"#);

        let greeting: Greeting = envelope.payload_as().unwrap();
        assert_eq!(
            greeting,
            Greeting {
                content: "hi".to_string(),
                sender: "a".to_string()
            }
        );
    }

    #[test]
    fn test_decode_optional_fields() {
        let bytes = br#"{"message_id":"m3","message_type":"hello","payload":{},"timestamp":7,"source":"api","version":"v2"}"#;
        let envelope = decode(bytes).unwrap();
        assert_eq!(envelope.source.as_deref(), Some("api"));
        assert_eq!(envelope.version.as_deref(), Some("v2"));
    }

    #[test]
    fn test_missing_payload_decodes_as_null() {
        let envelope = decode(br#"{"message_id":"m4","message_type":"ping"}"#).unwrap();
        assert_eq!(envelope.raw_payload(), "null");
        assert_eq!(envelope.timestamp, 0);
    }

    #[test]
    fn test_decode_rejects_malformed_envelopes() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Envelope(_))));
        assert!(matches!(
            decode(br#"{"message_id":"m5","payload":{}}"#),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn test_payload_schema_mismatch() {
        let envelope =
            decode(br#"{"message_id":"m6","message_type":"hello","payload":{"content":1}}"#).unwrap();
        let err = envelope.payload_as::<Greeting>().unwrap_err();
        assert!(matches!(err, DecodeError::Payload { ref message_type, .. } if message_type == "hello"));
    }

    #[test]
    fn test_new_envelope_encodes_optional_fields_only_when_set() {
        let greeting = Greeting {
            content: "hi".to_string(),
            sender: "a".to_string(),
        };
        let envelope = Envelope::new("hello", &greeting).unwrap();
        assert!(envelope.message_id.starts_with("msg-"));

        let json: serde_json::Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(json["message_type"], "hello");
        assert_eq!(json["payload"]["sender"], "a");
        assert!(json.get("source").is_none());

        let tagged = envelope.with_source("api").with_version("v1");
        let json: serde_json::Value = serde_json::from_slice(&encode(&tagged).unwrap()).unwrap();
        assert_eq!(json["source"], "api");
        assert_eq!(json["version"], "v1");
    }
}
