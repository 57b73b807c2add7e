//! Queue and topic backends.
//!
//! This module contains concrete implementations of the `QueueClient` and
//! `TopicPublisher` traits for the managed AWS services and for a
//! process-local stand-in.

pub mod aws;
pub mod memory;

pub use aws::{AwsError, SnsTopicPublisher, SqsQueueClient};
pub use memory::{InMemoryQueueService, InMemoryTopicPublisher};
