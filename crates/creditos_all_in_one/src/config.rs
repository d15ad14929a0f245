use common::nats::SubscriptionConfig;
use common::postgres::PostgresConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    /// Service name attached to every log line
    #[serde(default = "default_service_name")]
    pub service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream carrying credit batches
    #[serde(default = "default_credits_stream")]
    pub credits_stream: String,

    /// Subject pattern bound to the stream and used as consumer filter
    #[serde(default = "default_credits_subject")]
    pub credits_subject: String,

    /// Durable consumer name (the consumer group)
    #[serde(default = "default_credits_consumer_name")]
    pub credits_consumer_name: String,

    /// Deliveries before JetStream gives up on a message that is never committed
    #[serde(default = "default_credits_max_deliver")]
    pub credits_max_deliver: i64,

    // Consumer loop configuration
    /// Interval between poll cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum wait for a single poll in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound of messages handled in one poll cycle
    #[serde(default = "default_max_messages_per_cycle")]
    pub max_messages_per_cycle: usize,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Time allowed for closers on shutdown in seconds
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    // PostgreSQL configuration
    /// PostgreSQL host
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    /// PostgreSQL port
    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    /// PostgreSQL database name
    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    /// PostgreSQL username
    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    /// PostgreSQL password
    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    /// Maximum pooled PostgreSQL connections
    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_service_name() -> String {
    "creditos-all-in-one".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_credits_stream() -> String {
    "integrar-credito-constituido-entry".to_string()
}

fn default_credits_subject() -> String {
    "integrar-credito-constituido-entry.>".to_string()
}

fn default_credits_consumer_name() -> String {
    "creditos-api-consumer-group".to_string()
}

fn default_credits_max_deliver() -> i64 {
    10
}

// Consumer loop defaults
fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_max_messages_per_cycle() -> usize {
    100
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_closer_timeout_secs() -> u64 {
    10
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "CreditosDb".to_string()
}

fn default_postgres_username() -> String {
    "postgres".to_string()
}

fn default_postgres_password() -> String {
    "postgres".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("CREDITOS"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.service_name.clone(),
            log_level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            stream_name: self.credits_stream.clone(),
            consumer_name: self.credits_consumer_name.clone(),
            filter_subject: self.credits_subject.clone(),
            max_deliver: self.credits_max_deliver,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn closer_timeout(&self) -> Duration {
        Duration::from_secs(self.closer_timeout_secs)
    }
}

// Hand-written so the password never reaches the logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("log_json", &self.log_json)
            .field("service_name", &self.service_name)
            .field("nats_url", &self.nats_url)
            .field("credits_stream", &self.credits_stream)
            .field("credits_subject", &self.credits_subject)
            .field("credits_consumer_name", &self.credits_consumer_name)
            .field("credits_max_deliver", &self.credits_max_deliver)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_timeout_ms", &self.poll_timeout_ms)
            .field("max_messages_per_cycle", &self.max_messages_per_cycle)
            .field("startup_timeout_secs", &self.startup_timeout_secs)
            .field("closer_timeout_secs", &self.closer_timeout_secs)
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_database", &self.postgres_database)
            .field("postgres_username", &self.postgres_username)
            .field("postgres_password", &"<redacted>")
            .field("postgres_max_pool_size", &self.postgres_max_pool_size)
            .finish()
    }
}
