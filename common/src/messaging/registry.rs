// Processor registry: message type -> processor
//
// Built with `&mut self` during startup, then shared behind an `Arc` as an
// immutable snapshot so dispatch needs no locking.

use crate::envelope;
use crate::errors::DispatchError;
use crate::messaging::{MessageContext, Processor};
use crate::telemetry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under its supported type.
    ///
    /// A second registration for the same type replaces the first.
    pub fn register<P>(&mut self, processor: P)
    where
        P: Processor + 'static,
    {
        self.register_arc(Arc::new(processor));
    }

    pub fn register_arc(&mut self, processor: Arc<dyn Processor>) {
        let message_type = processor.supported_type().to_string();
        if self
            .processors
            .insert(message_type.clone(), processor)
            .is_some()
        {
            warn!(
                message_type = %message_type,
                "Processor already registered for message type, replacing it"
            );
        } else {
            info!(message_type = %message_type, "Message processor registered");
        }
    }

    /// Decode an envelope and hand it to the processor for its type.
    ///
    /// Unknown message types are logged and treated as handled.
    #[instrument(skip(self, ctx, body), fields(queue = ctx.queue(), body_size = body.len()))]
    pub async fn dispatch(&self, ctx: &MessageContext, body: &[u8]) -> Result<(), DispatchError> {
        let envelope = match envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to decode message envelope");
                telemetry::record_message_outcome("unknown", "decode_error");
                return Err(DispatchError::Decode(e));
            }
        };

        info!(
            message_id = %envelope.message_id,
            message_type = %envelope.message_type,
            attempt = ctx.attempt(),
            "Received business message"
        );

        let Some(processor) = self.processors.get(&envelope.message_type) else {
            warn!(
                message_id = %envelope.message_id,
                message_type = %envelope.message_type,
                "No processor found for message type"
            );
            telemetry::record_message_outcome(&envelope.message_type, "unhandled");
            return Ok(());
        };

        let started = Instant::now();
        let result = processor.handle(ctx, &envelope).await;
        telemetry::record_message_duration(&envelope.message_type, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!(message_id = %envelope.message_id, "Message processed");
                telemetry::record_message_outcome(&envelope.message_type, "processed");
                Ok(())
            }
            Err(source) => {
                telemetry::record_message_outcome(&envelope.message_type, "failed");
                Err(DispatchError::Processing {
                    message_type: envelope.message_type,
                    source,
                })
            }
        }
    }

    /// Processor registered for a message type, if any
    pub fn processor_for(&self, message_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(message_type).cloned()
    }

    /// All registered message types, sorted
    pub fn registered_types(&self) -> BTreeSet<String> {
        self.processors.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::errors::ProcessingError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Processor that records every payload it sees
    struct RecordingProcessor {
        message_type: &'static str,
        calls: Arc<AtomicUsize>,
        payloads: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingProcessor {
        fn new(message_type: &'static str) -> Self {
            Self {
                message_type,
                calls: Arc::new(AtomicUsize::new(0)),
                payloads: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }
        }

        fn failing(message_type: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::new(message_type)
            }
        }
    }

    #[async_trait]
    impl Processor for RecordingProcessor {
        fn supported_type(&self) -> &str {
            self.message_type
        }

        async fn handle(&self, _ctx: &MessageContext, envelope: &Envelope) -> Result<(), ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads
                .lock()
                .unwrap()
                .push(envelope.raw_payload().to_string());
            if self.fail {
                return Err(ProcessingError::Failed("downstream unavailable".to_string()));
            }
            Ok(())
        }
    }

    /// In-memory log sink for a scoped fmt subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn message(message_type: &str) -> Vec<u8> {
        format!(
            r#"{{"message_id":"m1","message_type":"{}","payload":{{"n":1}},"timestamp":1}}"#,
            message_type
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_dispatch_invokes_only_matching_processor() {
        let hello = RecordingProcessor::new("hello");
        let order = RecordingProcessor::new("order");
        let (hello_calls, order_calls) = (hello.calls.clone(), order.calls.clone());

        let mut registry = ProcessorRegistry::new();
        registry.register(hello);
        registry.register(order);

        registry
            .dispatch(&MessageContext::detached(), &message("hello"))
            .await
            .unwrap();

        assert_eq!(hello_calls.load(Ordering::SeqCst), 1);
        assert_eq!(order_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_not_an_error() {
        let hello = RecordingProcessor::new("hello");
        let calls = hello.calls.clone();
        let mut registry = ProcessorRegistry::new();
        registry.register(hello);

        let result = registry
            .dispatch(&MessageContext::detached(), &message("unknown"))
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_logs_one_warning() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut registry = ProcessorRegistry::new();
        registry.register(RecordingProcessor::new("hello"));

        registry
            .dispatch(&MessageContext::detached(), &message("unknown"))
            .await
            .unwrap();

        let warnings: Vec<_> = logs
            .lines()
            .into_iter()
            .filter(|line| line.contains("WARN"))
            .collect();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("No processor found for message type"));
        assert!(warnings[0].contains("unknown"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_dispatch_error() {
        let registry = ProcessorRegistry::new();
        let result = registry
            .dispatch(&MessageContext::detached(), b"{not json")
            .await;
        assert!(matches!(result, Err(DispatchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_processor_error_propagates() {
        let mut registry = ProcessorRegistry::new();
        registry.register(RecordingProcessor::failing("hello"));

        let result = registry
            .dispatch(&MessageContext::detached(), &message("hello"))
            .await;

        match result {
            Err(DispatchError::Processing {
                message_type,
                source: ProcessingError::Failed(reason),
            }) => {
                assert_eq!(message_type, "hello");
                assert_eq!(reason, "downstream unavailable");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let first = RecordingProcessor::new("hello");
        let second = RecordingProcessor::new("hello");
        let (first_calls, second_calls) = (first.calls.clone(), second.calls.clone());

        let mut registry = ProcessorRegistry::new();
        registry.register(first);
        registry.register(second);
        assert_eq!(registry.len(), 1);

        registry
            .dispatch(&MessageContext::detached(), &message("hello"))
            .await
            .unwrap();

        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_types_sorted() {
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        registry.register(RecordingProcessor::new("order"));
        registry.register(RecordingProcessor::new("hello"));

        let types: Vec<String> = registry.registered_types().into_iter().collect();
        assert_eq!(types, vec!["hello".to_string(), "order".to_string()]);
        assert!(registry.processor_for("order").is_some());
        assert!(registry.processor_for("missing").is_none());
    }
}
