//! Error types for queue and topic operations.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`QueueError`].
///
/// Validation errors are caller bugs and must not be retried unchanged.
/// Service errors are remote failures; [`QueueError::is_transient`] tells
/// which of them are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Service,
}

/// Comprehensive error type for all queue and topic operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Queue '{queue_name}' already exists with different attributes")]
    QueueAlreadyExists { queue_name: String },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Receipt handle is invalid or expired: {receipt}")]
    ReceiptHandleInvalid { receipt: String },

    #[error("Batch must contain at least one entry")]
    EmptyBatch,

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Service error ({service}): {code} - {message}")]
    ServiceError {
        service: String,
        code: String,
        message: String,
        sender_fault: bool,
    },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Map the error onto the validation/service taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyBatch
            | Self::BatchTooLarge { .. }
            | Self::MessageTooLarge { .. }
            | Self::Configuration(_)
            | Self::Validation(_) => ErrorKind::Validation,
            Self::ServiceError { sender_fault, .. } if *sender_fault => ErrorKind::Validation,
            _ => ErrorKind::Service,
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::QueueAlreadyExists { .. } => false,
            Self::TopicNotFound { .. } => false,
            Self::ReceiptHandleInvalid { .. } => false,
            Self::EmptyBatch => false,
            Self::BatchTooLarge { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::AuthenticationFailed { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::ServiceError { sender_fault, .. } => !sender_fault,
            Self::Serialization { .. } => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Minimum delay before retrying, when the failure suggests one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
