//! Message types for queue operations including core domain identifiers.

use crate::error::{QueueError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Maximum number of entries in a single send batch
pub const MAX_BATCH_SIZE: usize = 10;

/// Maximum number of messages returned by a single receive
pub const MAX_RECEIVE_MESSAGES: u32 = 10;

/// Maximum message body size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Longest long-poll wait the service accepts
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Longest visibility timeout the service accepts (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u32 = 43_200;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

fn validate_identifier(field: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max_len {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", max_len),
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
        });
    }

    Ok(())
}

/// Validated queue name (1-80 characters, alphanumerics, hyphens, underscores)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_identifier("queue_name", &name, 80)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Opaque queue reference returned when a queue is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueUrl(String);

impl QueueUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, ValidationError> {
        let url = url.into();
        if url.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque topic reference used for fan-out publishing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicArn(String);

impl TopicArn {
    pub fn new(arn: impl Into<String>) -> Result<Self, ValidationError> {
        let arn = arn.into();
        if arn.is_empty() {
            return Err(ValidationError::Required {
                field: "topic_arn".to_string(),
            });
        }
        Ok(Self(arn))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicArn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicArn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Service-assigned identifier of a stored message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Per-receive token required to delete a message.
///
/// Only valid while the visibility timeout of the receive that produced it
/// is running.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-assigned id distinguishing entries within one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchEntryId(String);

impl BatchEntryId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate_identifier("batch_entry_id", &id, 80)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchEntryId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Check a message body against the service limits
pub fn validate_message_body(body: &str) -> Result<(), QueueError> {
    if body.is_empty() {
        return Err(QueueError::Validation(ValidationError::Required {
            field: "message_body".to_string(),
        }));
    }

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(QueueError::MessageTooLarge {
            size: body.len(),
            max_size: MAX_MESSAGE_SIZE,
        });
    }

    Ok(())
}

/// Check a publish subject. An empty subject means "no subject".
pub fn validate_subject(subject: &str) -> Result<(), ValidationError> {
    if subject.len() > 100 {
        return Err(ValidationError::OutOfRange {
            field: "subject".to_string(),
            message: "maximum 100 characters".to_string(),
        });
    }

    if subject.chars().any(|c| !c.is_ascii() || c.is_ascii_control()) {
        return Err(ValidationError::InvalidFormat {
            field: "subject".to_string(),
            message: "only ASCII printable characters allowed".to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Queue Settings
// ============================================================================

/// Attributes applied when a queue is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    /// Default long-poll duration for receives on this queue
    pub receive_wait_time_seconds: u32,
    /// Seconds a received-but-undeleted message stays hidden
    pub visibility_timeout_seconds: u32,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            receive_wait_time_seconds: 20,
            visibility_timeout_seconds: 60,
        }
    }
}

impl QueueAttributes {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.receive_wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "receive_wait_time_seconds".to_string(),
                message: format!("must be 0-{}", MAX_WAIT_TIME_SECONDS),
            });
        }

        if self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout_seconds".to_string(),
                message: format!("must be 0-{}", MAX_VISIBILITY_TIMEOUT_SECONDS),
            });
        }

        Ok(())
    }
}

/// Parameters for a single receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveOptions {
    pub max_messages: u32,
    pub wait_time_seconds: u32,
    pub visibility_timeout_seconds: u32,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: MAX_RECEIVE_MESSAGES,
            wait_time_seconds: 20,
            visibility_timeout_seconds: 60,
        }
    }
}

impl ReceiveOptions {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_messages == 0 || self.max_messages > MAX_RECEIVE_MESSAGES {
            return Err(ValidationError::OutOfRange {
                field: "max_messages".to_string(),
                message: format!("must be 1-{}", MAX_RECEIVE_MESSAGES),
            });
        }

        if self.wait_time_seconds > MAX_WAIT_TIME_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "wait_time_seconds".to_string(),
                message: format!("must be 0-{}", MAX_WAIT_TIME_SECONDS),
            });
        }

        if self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout_seconds".to_string(),
                message: format!("must be 0-{}", MAX_VISIBILITY_TIMEOUT_SECONDS),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// One entry of a send batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub id: BatchEntryId,
    pub body: String,
}

impl BatchEntry {
    pub fn new(id: BatchEntryId, body: impl Into<String>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }
}

/// Batch entry that the service stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSuccess {
    pub id: BatchEntryId,
    pub message_id: MessageId,
}

/// Batch entry that was rejected, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub id: BatchEntryId,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

/// Per-entry result of a batch send. Partial failure is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchOutcome {
    pub successful: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
}

impl SendBatchOutcome {
    /// Ids of the entries that were stored
    pub fn successful_ids(&self) -> Vec<&BatchEntryId> {
        self.successful.iter().map(|s| &s.id).collect()
    }

    /// Ids of the entries that were rejected
    pub fn failed_ids(&self) -> Vec<&BatchEntryId> {
        self.failed.iter().map(|f| &f.id).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another outcome into this one
    pub fn merge(&mut self, other: SendBatchOutcome) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
    }
}

/// Result of checking a batch before it is submitted
#[derive(Debug)]
pub struct ScreenedBatch<'a> {
    /// Entries that may be sent, in submission order
    pub accepted: Vec<&'a BatchEntry>,
    /// Entries rejected locally (duplicate ids, invalid bodies)
    pub rejected: Vec<BatchFailure>,
}

/// Split a batch into entries to submit and entries to report as failed.
///
/// The first entry carrying a given id is kept; later entries with the same
/// id are rejected with `BatchEntryIdsNotDistinct` so that nothing is
/// overwritten silently. An empty or oversized batch fails as a whole.
pub fn screen_batch(entries: &[BatchEntry], max_size: usize) -> Result<ScreenedBatch<'_>, QueueError> {
    if entries.is_empty() {
        return Err(QueueError::EmptyBatch);
    }

    if entries.len() > max_size {
        return Err(QueueError::BatchTooLarge {
            size: entries.len(),
            max_size,
        });
    }

    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();

    for entry in entries {
        if !seen.insert(&entry.id) {
            rejected.push(BatchFailure {
                id: entry.id.clone(),
                code: "BatchEntryIdsNotDistinct".to_string(),
                message: format!("Id {} repeated within the batch", entry.id),
                sender_fault: true,
            });
            continue;
        }

        if let Err(e) = validate_message_body(&entry.body) {
            rejected.push(BatchFailure {
                id: entry.id.clone(),
                code: "InvalidMessageContents".to_string(),
                message: e.to_string(),
                sender_fault: true,
            });
            continue;
        }

        accepted.push(entry);
    }

    Ok(ScreenedBatch { accepted, rejected })
}

/// A message received from the queue with its delete token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: String,
    pub receipt_handle: ReceiptHandle,
    /// Approximate number of times the message has been received
    pub receive_count: u32,
}

impl ReceivedMessage {
    /// Decode the body as a topic notification envelope, if it is one
    pub fn notification(&self) -> Option<Notification> {
        serde_json::from_str::<Notification>(&self.body)
            .ok()
            .filter(|n| n.kind == "Notification")
    }
}

/// Envelope a topic wraps around a message delivered to a subscribed queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(rename = "Type")]
    pub kind: String,
    pub message_id: String,
    pub topic_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        message_id: &MessageId,
        topic: &TopicArn,
        subject: Option<&str>,
        message: &str,
    ) -> Self {
        Self {
            kind: "Notification".to_string(),
            message_id: message_id.as_str().to_string(),
            topic_arn: topic.as_str().to_string(),
            subject: subject.map(str::to_string),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
