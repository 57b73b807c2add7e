//! # Queue Relay Core
//!
//! Producer and consumer logic on top of the capability traits from
//! `queue-relay-runtime`.
//!
//! - [`producer`] - Single, batched and fan-out sends with per-item reports
//! - [`consumer`] - At-least-once polling loop with idle and failure backoff
//! - [`retry`] - Exponential backoff policy for consecutive failures
//! - [`shutdown`] - Cancellation token raced against long polls and sleeps
//! - [`config`] - Layered configuration (defaults, file, environment)

pub mod config;
pub mod consumer;
pub mod producer;
pub mod retry;
pub mod shutdown;

pub use config::{ConfigError, RelayConfig};
pub use consumer::{
    ConsumerConfig, ConsumerError, ConsumerStats, LoggingHandler, MessageConsumer, MessageHandler,
    PollOutcome,
};
pub use producer::{BatchReport, MessageProducer, ProducerError, SendReport};
pub use retry::BackoffPolicy;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
