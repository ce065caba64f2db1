// Configuration management with layered configuration (file, env)

use crate::errors::ConfigError;
use crate::scheduler::{JobSpec, OverlapPolicy};
use crate::trigger::{self, Trigger};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub scheduler: SchedulerConfig,
    pub messages: MessagesConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Nats,
    Memory,
}

/// Broker connection and topology.
///
/// Exchanges are publish targets; queues are durable subscriptions bound to
/// one exchange by routing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub url: String,
    pub exchanges: Vec<ExchangeConfig>,
    pub queues: Vec<QueueConfig>,
    /// Maximum age for messages retained by an exchange
    pub max_age_seconds: u64,
    /// Time the broker waits for an ack before redelivering
    pub ack_wait_seconds: u64,
    /// Failed deliveries are dropped after this many attempts; unset means
    /// requeue indefinitely
    pub max_deliveries: Option<u64>,
    pub publish_timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Nats,
            url: "nats://localhost:4222".to_string(),
            exchanges: vec![ExchangeConfig {
                name: "hello".to_string(),
            }],
            queues: vec![QueueConfig {
                name: "hello_queue".to_string(),
                exchange: "hello".to_string(),
                routing_keys: vec!["hello".to_string()],
            }],
            max_age_seconds: 86400, // 24 hours
            ack_wait_seconds: 300,
            max_deliveries: None,
            publish_timeout_seconds: 5,
        }
    }
}

impl BrokerConfig {
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub exchange: String,
    #[serde(default)]
    pub routing_keys: Vec<String>,
}

/// Job scheduler settings and job specs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// IANA timezone used by cron and daily triggers
    pub timezone: String,
    /// Upper bound on how long the loop sleeps before re-checking due jobs
    pub poll_interval_seconds: u64,
    /// How long `stop()` waits for in-flight executions
    pub stop_grace_seconds: u64,
    pub overlap: OverlapPolicy,
    pub jobs: Vec<JobSpec>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_string(),
            poll_interval_seconds: 60,
            stop_grace_seconds: 30,
            overlap: OverlapPolicy::Skip,
            jobs: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        trigger::parse_timezone(&self.timezone)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

/// Where the API publishes hello messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub hello_exchange: String,
    pub hello_routing_key: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            hello_exchange: "hello".to_string(),
            hello_routing_key: "hello".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: 9090,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate configuration settings, including every enabled job schedule
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidSettings(msg));

        if self.server.port == 0 {
            return invalid("Server port must be greater than 0".to_string());
        }

        if self.broker.kind == BrokerKind::Nats && self.broker.url.is_empty() {
            return invalid("Broker URL cannot be empty".to_string());
        }

        let mut exchanges = HashSet::new();
        for exchange in &self.broker.exchanges {
            if !is_valid_name(&exchange.name) {
                return invalid(format!("Invalid exchange name '{}'", exchange.name));
            }
            if !exchanges.insert(exchange.name.as_str()) {
                return invalid(format!("Duplicate exchange '{}'", exchange.name));
            }
        }

        let mut queues = HashSet::new();
        for queue in &self.broker.queues {
            if !is_valid_name(&queue.name) {
                return invalid(format!("Invalid queue name '{}'", queue.name));
            }
            if !queues.insert(queue.name.as_str()) {
                return invalid(format!("Duplicate queue '{}'", queue.name));
            }
            if !exchanges.contains(queue.exchange.as_str()) {
                return invalid(format!(
                    "Queue '{}' is bound to unknown exchange '{}'",
                    queue.name, queue.exchange
                ));
            }
            if queue.routing_keys.iter().any(|k| k.trim().is_empty()) {
                return invalid(format!("Queue '{}' has an empty routing key", queue.name));
            }
        }

        if self.broker.max_deliveries == Some(0) {
            return invalid("Broker max_deliveries must be greater than 0".to_string());
        }

        self.scheduler.timezone()?;

        if self.scheduler.poll_interval_seconds == 0 {
            return invalid("Scheduler poll_interval_seconds must be greater than 0".to_string());
        }

        let mut job_names = HashSet::new();
        for job in self.scheduler.jobs.iter().filter(|j| j.enabled) {
            if !job_names.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJob(job.name.clone()));
            }
            Trigger::parse(job.trigger_kind, &job.schedule)
                .map_err(|e| ConfigError::for_job(&job.name, e))?;
        }

        Ok(())
    }
}

/// Exchange and queue names become JetStream stream and consumer names
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
}
