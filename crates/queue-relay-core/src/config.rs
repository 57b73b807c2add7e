//! # Relay Configuration
//!
//! Layered configuration for the relay, loaded with the `config` crate.
//!
//! Sources, applied in order (later sources override earlier ones):
//! 1. Built-in defaults (every field carries a serde default)
//! 2. An optional file given by the caller (TOML, YAML or JSON by extension)
//! 3. Environment variables prefixed `QUEUE_RELAY__` with `__` separators,
//!    e.g. `QUEUE_RELAY__QUEUE__NAME=test-q` sets `queue.name`
//!
//! AWS credentials missing from all of the above fall back to the standard
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//! variables.

use crate::consumer::ConsumerConfig;
use crate::retry::BackoffPolicy;
use config::{Config, Environment, File, Map};
use queue_relay_runtime::message::{validate_message_body, validate_subject};
use queue_relay_runtime::{
    AwsConfig, ProviderType, QueueAttributes, QueueName, ReceiveOptions, TopicArn, ValidationError,
    MAX_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`RelayConfig::load`]
pub const ENV_PREFIX: &str = "QUEUE_RELAY";

/// Errors raised while loading or checking configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

fn invalid(field: &str, error: impl Display) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: error.to_string(),
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Queue to create and use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub receive_wait_time_seconds: u32,
    pub visibility_timeout_seconds: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "backspace-lab".to_string(),
            receive_wait_time_seconds: 20,
            visibility_timeout_seconds: 60,
        }
    }
}

impl QueueSettings {
    pub fn queue_name(&self) -> Result<QueueName, ValidationError> {
        QueueName::new(self.name.clone())
    }

    pub fn attributes(&self) -> QueueAttributes {
        QueueAttributes {
            receive_wait_time_seconds: self.receive_wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }
}

/// Topic to publish to, and the default message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub arn: String,
    pub subject: String,
    pub message: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            arn: "arn:aws:sns:us-east-1:801868729718:backspace-lab".to_string(),
            subject: "SNS Message 2".to_string(),
            message: "This is another message from AWS SNS!".to_string(),
        }
    }
}

impl TopicSettings {
    pub fn topic_arn(&self) -> Result<TopicArn, ValidationError> {
        TopicArn::new(self.arn.clone())
    }
}

/// Message generation defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub message_count: usize,
    pub batch_size: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            message_count: 50,
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// Polling loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub max_messages: u32,
    pub wait_time_seconds: u32,
    pub visibility_timeout_seconds: u32,
    pub idle_backoff_seconds: u64,
    pub delete_pause_millis: u64,
    pub failure_backoff: BackoffPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        let receive = ReceiveOptions::default();
        Self {
            max_messages: receive.max_messages,
            wait_time_seconds: receive.wait_time_seconds,
            visibility_timeout_seconds: receive.visibility_timeout_seconds,
            idle_backoff_seconds: 60,
            delete_pause_millis: 1000,
            failure_backoff: BackoffPolicy::default(),
        }
    }
}

impl ConsumerSettings {
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
        }
    }

    /// Loop settings without a poll limit
    pub fn to_consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            receive: self.receive_options(),
            idle_backoff: Duration::from_secs(self.idle_backoff_seconds),
            delete_pause: Duration::from_millis(self.delete_pause_millis),
            failure_backoff: self.failure_backoff.clone(),
            max_polls: None,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Complete relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub provider: ProviderType,
    pub aws: AwsConfig,
    pub queue: QueueSettings,
    pub topic: TopicSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::Aws,
            aws: AwsConfig::default(),
            queue: QueueSettings::default(),
            topic: TopicSettings::default(),
            producer: ProducerSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load from the optional file and the process environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_sources(path, None)?;
        config.aws = config.aws.with_env_credentials();
        Ok(config)
    }

    /// Load from the optional file and the given variables instead of the
    /// process environment, then validate.
    ///
    /// No AWS credential fallback is applied.
    pub fn load_from_sources(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: RelayConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the services would refuse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.region.trim().is_empty() {
            return Err(invalid("aws.region", "must not be empty"));
        }
        if self.aws.request_timeout_seconds == 0 {
            return Err(invalid("aws.request_timeout_seconds", "must be at least 1"));
        }

        self.queue
            .queue_name()
            .map_err(|e| invalid("queue.name", e))?;
        self.queue
            .attributes()
            .validate()
            .map_err(|e| invalid("queue", e))?;

        self.topic.topic_arn().map_err(|e| invalid("topic.arn", e))?;
        validate_subject(&self.topic.subject).map_err(|e| invalid("topic.subject", e))?;
        validate_message_body(&self.topic.message).map_err(|e| invalid("topic.message", e))?;

        if self.producer.batch_size == 0 || self.producer.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(
                "producer.batch_size",
                format!("must be between 1 and {}", MAX_BATCH_SIZE),
            ));
        }

        self.consumer
            .receive_options()
            .validate()
            .map_err(|e| invalid("consumer", e))?;

        let backoff = &self.consumer.failure_backoff;
        if backoff.max_attempts == 0 {
            return Err(invalid(
                "consumer.failure_backoff.max_attempts",
                "must be at least 1",
            ));
        }
        if backoff.backoff_multiplier < 1.0 {
            return Err(invalid(
                "consumer.failure_backoff.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if backoff.initial_delay > backoff.max_delay {
            return Err(invalid(
                "consumer.failure_backoff.initial_delay",
                "must not exceed max_delay",
            ));
        }

        Ok(())
    }

    /// Render as TOML with credentials redacted
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        if redacted.aws.secret_access_key.is_some() {
            redacted.aws.secret_access_key = Some("<redacted>".to_string());
        }
        if redacted.aws.session_token.is_some() {
            redacted.aws.session_token = Some("<redacted>".to_string());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}
