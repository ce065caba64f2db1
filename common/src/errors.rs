// Error handling framework

use thiserror::Error;

/// Configuration errors: bad trigger schedules, missing job factories and
/// invalid settings. These are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid duration '{schedule}': {reason}")]
    InvalidDuration { schedule: String, reason: String },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid daily time '{schedule}' (expected HH:MM): {reason}")]
    InvalidDailyTime { schedule: String, reason: String },

    #[error("Unsupported trigger type: {0}")]
    UnknownTriggerKind(String),

    #[error("Schedule '{schedule}' has no future occurrence")]
    NoNextOccurrence { schedule: String },

    #[error("Job factory not found for: {0}")]
    MissingJobFactory(String),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Failed to add job {job}: {source}")]
    InvalidJob {
        job: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

impl ConfigError {
    /// Attach the offending job name to a schedule or factory error
    pub fn for_job(job: impl Into<String>, source: ConfigError) -> Self {
        ConfigError::InvalidJob {
            job: job.into(),
            source: Box::new(source),
        }
    }
}

/// Envelope or payload could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed payload for message type '{message_type}': {source}")]
    Payload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode message envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors returned by a processor's `handle`
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error(transparent)]
    InvalidPayload(#[from] DecodeError),

    #[error("Processing failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced by `ProcessorRegistry::dispatch`.
///
/// A message type without a processor is not an error: such messages are
/// dropped with a warning.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to decode message envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("Processor for message type '{message_type}' failed: {source}")]
    Processing {
        message_type: String,
        #[source]
        source: ProcessingError,
    },
}

/// Scheduled job execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Job execution failed: {0}")]
    Failed(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Queue not configured: {0}")]
    QueueNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

impl From<DecodeError> for QueueError {
    fn from(err: DecodeError) -> Self {
        QueueError::SerializationFailed(err.to_string())
    }
}
