//! Capability traits for queue and topic operations.
//!
//! Both traits are object safe so that producers and consumers can hold an
//! `Arc<dyn QueueClient>` / `Arc<dyn TopicPublisher>` built once at startup
//! and swap in the in-memory backends under test.

use crate::error::QueueError;
use crate::message::{
    BatchEntry, MessageId, QueueAttributes, QueueName, QueueUrl, ReceiptHandle, ReceiveOptions,
    ReceivedMessage, SendBatchOutcome, TopicArn, MAX_BATCH_SIZE,
};
use async_trait::async_trait;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Remote operations against a managed message queue
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Create a queue, or return the existing one when the attributes match
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueUrl, QueueError>;

    /// Send single message to queue
    async fn send_message(&self, queue: &QueueUrl, body: &str) -> Result<MessageId, QueueError>;

    /// Send up to [`QueueClient::max_batch_size`] messages in one call.
    ///
    /// Entries fail individually; only a malformed batch as a whole (empty or
    /// oversized) or a transport failure returns `Err`.
    async fn send_message_batch(
        &self,
        queue: &QueueUrl,
        entries: &[BatchEntry],
    ) -> Result<SendBatchOutcome, QueueError>;

    /// Long-poll for messages. An empty result is not an error.
    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Permanently remove a received message
    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError>;

    /// Get maximum batch size
    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}

/// Fan-out publishing to every subscriber of a topic
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publish one message; delivery to subscribers happens asynchronously
    async fn publish(
        &self,
        topic: &TopicArn,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, QueueError>;
}
