//! # Queue Relay Runtime
//!
//! Capability clients for a managed message queue and a fan-out topic, with
//! an AWS implementation over the HTTP query APIs and an in-memory stand-in.
//!
//! This library provides:
//! - Provider-agnostic queue operations (create, send, batch send, receive, delete)
//! - Topic publishing with notification envelopes delivered to subscribed queues
//! - Local batch screening so duplicate entry ids never overwrite each other
//! - Error classification into validation and service failures
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue and topic operations
//! - [`message`] - Identifiers, batch entries, receive options and envelopes
//! - [`provider`] - Provider types and AWS connection settings
//! - [`client`] - The `QueueClient` and `TopicPublisher` capability traits
//! - [`providers`] - AWS and in-memory implementations

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, TopicPublisher};
pub use error::{ConfigurationError, ErrorKind, QueueError, ValidationError};
pub use message::{
    BatchEntry, BatchEntryId, BatchFailure, BatchSuccess, MessageId, Notification,
    QueueAttributes, QueueName, QueueUrl, ReceiptHandle, ReceiveOptions, ReceivedMessage,
    SendBatchOutcome, TopicArn, MAX_BATCH_SIZE, MAX_MESSAGE_SIZE, MAX_RECEIVE_MESSAGES,
};
pub use provider::{AwsConfig, ProviderType};
pub use providers::{InMemoryQueueService, InMemoryTopicPublisher, SnsTopicPublisher, SqsQueueClient};
