//! # Message Producer
//!
//! Generates demo payloads and pushes them into a queue, either one call per
//! message or in batches, and publishes single messages to a topic.
//!
//! Every operation is best effort: a failed send or a failed batch is logged
//! and recorded in the returned report, and the remaining work still runs.

use queue_relay_runtime::{
    BatchEntry, BatchEntryId, BatchFailure, MessageId, QueueClient, QueueError, QueueUrl,
    SendBatchOutcome, TopicArn, TopicPublisher,
};
use std::ops::Range;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Errors that stop a producer operation before any message is sent
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Invalid batch size {batch_size}: must be between 1 and {max_size}")]
    InvalidBatchSize { batch_size: usize, max_size: usize },
}

/// Body of the `index`-th generated message
pub fn message_body(index: usize) -> String {
    format!("This is the content for message {}", index)
}

/// Batch entry id of the `index`-th generated message
pub fn batch_entry_id(index: usize) -> String {
    format!("Message{}", index)
}

/// Split `total` messages into consecutive index ranges of at most `batch_size`.
///
/// Produces `ceil(total / batch_size)` ranges; zero messages produce none.
///
/// # Examples
///
/// ```rust
/// use queue_relay_core::producer::plan_batches;
///
/// assert_eq!(plan_batches(25, 10, 10).unwrap(), vec![0..10, 10..20, 20..25]);
/// ```
pub fn plan_batches(
    total: usize,
    batch_size: usize,
    max_size: usize,
) -> Result<Vec<Range<usize>>, ProducerError> {
    if batch_size == 0 || batch_size > max_size {
        return Err(ProducerError::InvalidBatchSize {
            batch_size,
            max_size,
        });
    }

    Ok((0..total)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(total))
        .collect())
}

// ============================================================================
// Reports
// ============================================================================

/// Result of sending one generated message
#[derive(Debug)]
pub struct SendResult {
    pub index: usize,
    pub outcome: Result<MessageId, QueueError>,
}

/// Per-message results of [`MessageProducer::send_n`], in send order
#[derive(Debug, Default)]
pub struct SendReport {
    pub results: Vec<SendResult>,
}

impl SendReport {
    /// Ids of the stored messages, in send order
    pub fn message_ids(&self) -> Vec<&MessageId> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }
}

/// Result of one batch call
#[derive(Debug)]
pub struct BatchResult {
    /// Position of the batch in the plan
    pub batch_index: usize,
    /// Entry ids submitted in this batch, in order
    pub entry_ids: Vec<BatchEntryId>,
    /// Per-entry outcome, or the error that failed the whole call
    pub outcome: Result<SendBatchOutcome, QueueError>,
}

impl BatchResult {
    pub fn successful_count(&self) -> usize {
        self.outcome.as_ref().map_or(0, |o| o.successful.len())
    }

    /// Entries not stored, counting every entry of a failed call
    pub fn failed_count(&self) -> usize {
        match &self.outcome {
            Ok(outcome) => outcome.failed.len(),
            Err(_) => self.entry_ids.len(),
        }
    }
}

/// Per-batch results of [`MessageProducer::send_batched`]
#[derive(Debug, Default)]
pub struct BatchReport {
    pub batches: Vec<BatchResult>,
}

impl BatchReport {
    /// Number of batch calls issued
    pub fn batch_calls(&self) -> usize {
        self.batches.len()
    }

    /// Every entry id submitted, across all batches
    pub fn entry_ids(&self) -> Vec<&BatchEntryId> {
        self.batches.iter().flat_map(|b| b.entry_ids.iter()).collect()
    }

    pub fn successful_count(&self) -> usize {
        self.batches.iter().map(BatchResult::successful_count).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.batches.iter().map(BatchResult::failed_count).sum()
    }

    /// Entries the service or local screening rejected individually
    pub fn entry_failures(&self) -> Vec<&BatchFailure> {
        self.batches
            .iter()
            .filter_map(|b| b.outcome.as_ref().ok())
            .flat_map(|o| o.failed.iter())
            .collect()
    }
}

// ============================================================================
// Producer
// ============================================================================

/// Drives queue sends and topic publishes
pub struct MessageProducer {
    queue_client: Arc<dyn QueueClient>,
    publisher: Arc<dyn TopicPublisher>,
}

impl MessageProducer {
    pub fn new(queue_client: Arc<dyn QueueClient>, publisher: Arc<dyn TopicPublisher>) -> Self {
        Self {
            queue_client,
            publisher,
        }
    }

    /// Send `count` generated messages, one call each.
    ///
    /// A failed send is logged and recorded; the remaining sends continue.
    pub async fn send_n(&self, queue: &QueueUrl, count: usize) -> SendReport {
        let mut report = SendReport::default();

        for index in 0..count {
            let body = message_body(index);
            let outcome = self.queue_client.send_message(queue, &body).await;

            match &outcome {
                Ok(message_id) => {
                    info!(queue = %queue, index, message_id = %message_id, "Sent message");
                }
                Err(e) => {
                    warn!(queue = %queue, index, error = %e, "Failed to send message");
                }
            }

            report.results.push(SendResult { index, outcome });
        }

        info!(
            queue = %queue,
            sent = report.sent_count(),
            failed = report.failed_count(),
            "Finished sending messages"
        );
        report
    }

    /// Send `total` generated messages in batches of `batch_size`.
    ///
    /// Batches are submitted sequentially; a failed batch does not stop the
    /// ones after it.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::InvalidBatchSize`] before sending anything if
    /// `batch_size` is zero or above the client's batch limit.
    pub async fn send_batched(
        &self,
        queue: &QueueUrl,
        total: usize,
        batch_size: usize,
    ) -> Result<BatchReport, ProducerError> {
        let plan = plan_batches(total, batch_size, self.queue_client.max_batch_size())?;
        let mut report = BatchReport::default();

        for (batch_index, range) in plan.into_iter().enumerate() {
            let mut entries = Vec::with_capacity(range.len());
            for index in range {
                // Generated ids are always alphanumeric, so this cannot fail
                match BatchEntryId::new(batch_entry_id(index)) {
                    Ok(id) => entries.push(BatchEntry::new(id, message_body(index))),
                    Err(e) => error!(index, error = %e, "Skipping entry with invalid id"),
                }
            }
            let entry_ids: Vec<BatchEntryId> = entries.iter().map(|e| e.id.clone()).collect();

            let outcome = self.queue_client.send_message_batch(queue, &entries).await;

            match &outcome {
                Ok(result) => {
                    info!(
                        queue = %queue,
                        batch = batch_index,
                        successful = ?result.successful_ids(),
                        "Batch sent"
                    );
                    for failure in &result.failed {
                        warn!(
                            queue = %queue,
                            batch = batch_index,
                            entry_id = %failure.id,
                            code = %failure.code,
                            error = %failure.message,
                            "Batch entry rejected"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        queue = %queue,
                        batch = batch_index,
                        entries = entry_ids.len(),
                        error = %e,
                        "Batch send failed"
                    );
                }
            }

            report.batches.push(BatchResult {
                batch_index,
                entry_ids,
                outcome,
            });
        }

        info!(
            queue = %queue,
            batches = report.batch_calls(),
            successful = report.successful_count(),
            failed = report.failed_count(),
            "Finished sending batches"
        );
        Ok(report)
    }

    /// Publish one message to a topic
    pub async fn publish_one(
        &self,
        topic: &TopicArn,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, QueueError> {
        match self.publisher.publish(topic, subject, body).await {
            Ok(message_id) => {
                info!(topic = %topic, message_id = %message_id, "Published message");
                Ok(message_id)
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to publish message");
                Err(e)
            }
        }
    }
}
