//! # Message Consumer
//!
//! At-least-once polling loop: long-poll a batch, hand each message to a
//! [`MessageHandler`], delete it once handled, and back off when the queue is
//! empty or the service keeps failing.
//!
//! A message whose handler fails, or whose delete fails, is left on the queue
//! and becomes visible again after its visibility timeout. Handlers must
//! therefore tolerate duplicates.

use crate::retry::{BackoffPolicy, FailureState};
use crate::shutdown::ShutdownToken;
use async_trait::async_trait;
use queue_relay_runtime::{
    QueueClient, QueueError, QueueUrl, ReceiveOptions, ReceivedMessage, ValidationError,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

// ============================================================================
// Errors and Configuration
// ============================================================================

/// Errors that end the consumer loop
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Invalid consumer configuration: {0}")]
    Configuration(#[from] ValidationError),

    #[error("Receive failed {attempts} times in a row: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: QueueError,
    },

    #[error("Receive failed with a non-retryable error: {source}")]
    Permanent {
        #[source]
        source: QueueError,
    },
}

/// Consumer loop settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Options for every receive call
    pub receive: ReceiveOptions,
    /// Sleep after a poll that returned no messages
    pub idle_backoff: Duration,
    /// Pause between handling consecutive messages of one batch
    pub delete_pause: Duration,
    /// Backoff for consecutive receive failures
    pub failure_backoff: BackoffPolicy,
    /// Stop after this many completed polls
    pub max_polls: Option<u64>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            receive: ReceiveOptions::default(),
            idle_backoff: Duration::from_secs(60),
            delete_pause: Duration::from_secs(1),
            failure_backoff: BackoffPolicy::default(),
            max_polls: None,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Processes one received message.
///
/// Returning `Err` leaves the message on the queue for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()>;
}

/// Handler that logs each message and always succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        match message.notification() {
            Some(notification) => info!(
                message_id = %message.message_id,
                topic = %notification.topic_arn,
                subject = notification.subject.as_deref().unwrap_or(""),
                body = %notification.message,
                "Received notification"
            ),
            None => info!(
                message_id = %message.message_id,
                receive_count = message.receive_count,
                body = %message.body,
                "Received message"
            ),
        }
        Ok(())
    }
}

// ============================================================================
// Poll Results
// ============================================================================

/// Result of a single receive-process-delete pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The long poll returned no messages
    Empty,
    /// Messages were received and handled
    Processed {
        received: usize,
        deleted: usize,
        handler_failures: usize,
        delete_failures: usize,
    },
    /// Shutdown was requested while waiting
    Cancelled,
}

/// Running totals across the life of a consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub polls: u64,
    pub empty_polls: u64,
    pub messages_received: u64,
    pub messages_deleted: u64,
    pub handler_failures: u64,
    pub delete_failures: u64,
    pub receive_failures: u64,
}

// ============================================================================
// Consumer
// ============================================================================

/// Polls one queue and removes the messages it handles
pub struct MessageConsumer {
    queue_client: Arc<dyn QueueClient>,
    queue: QueueUrl,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    stats: ConsumerStats,
}

impl MessageConsumer {
    pub fn new(
        queue_client: Arc<dyn QueueClient>,
        queue: QueueUrl,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue_client,
            queue,
            handler,
            config,
            stats: ConsumerStats::default(),
        }
    }

    /// Consumer that logs every message it receives
    pub fn with_logging_handler(
        queue_client: Arc<dyn QueueClient>,
        queue: QueueUrl,
        config: ConsumerConfig,
    ) -> Self {
        Self::new(queue_client, queue, Arc::new(LoggingHandler), config)
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn queue(&self) -> &QueueUrl {
        &self.queue
    }

    /// Receive one batch, handle each message and delete the handled ones.
    ///
    /// The receive is abandoned if shutdown is requested during the long
    /// poll. Shutdown during the pause between messages stops the pass; the
    /// remaining messages reappear after their visibility timeout.
    pub async fn poll_once(
        &mut self,
        shutdown: &mut ShutdownToken,
    ) -> Result<PollOutcome, QueueError> {
        let receive = self
            .queue_client
            .receive_messages(&self.queue, &self.config.receive);

        let messages = match shutdown.run_until_shutdown(receive).await {
            None => return Ok(PollOutcome::Cancelled),
            Some(result) => {
                self.stats.polls += 1;
                match result {
                    Ok(messages) => messages,
                    Err(e) => {
                        self.stats.receive_failures += 1;
                        return Err(e);
                    }
                }
            }
        };

        if messages.is_empty() {
            self.stats.empty_polls += 1;
            debug!(queue = %self.queue, "No messages received");
            return Ok(PollOutcome::Empty);
        }

        let received = messages.len();
        self.stats.messages_received += received as u64;
        debug!(queue = %self.queue, received, "Received messages");

        let mut deleted = 0;
        let mut handler_failures = 0;
        let mut delete_failures = 0;

        for (position, message) in messages.iter().enumerate() {
            let pause = self.config.delete_pause;
            if position > 0 && !pause.is_zero() && !shutdown.sleep(pause).await {
                break;
            }

            if let Err(e) = self.handler.handle(message).await {
                handler_failures += 1;
                self.stats.handler_failures += 1;
                warn!(
                    queue = %self.queue,
                    message_id = %message.message_id,
                    error = %e,
                    "Handler failed; message left for redelivery"
                );
                continue;
            }

            match self
                .queue_client
                .delete_message(&self.queue, &message.receipt_handle)
                .await
            {
                Ok(()) => {
                    deleted += 1;
                    self.stats.messages_deleted += 1;
                    debug!(queue = %self.queue, message_id = %message.message_id, "Deleted message");
                }
                Err(e) => {
                    delete_failures += 1;
                    self.stats.delete_failures += 1;
                    warn!(
                        queue = %self.queue,
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to delete message"
                    );
                }
            }
        }

        Ok(PollOutcome::Processed {
            received,
            deleted,
            handler_failures,
            delete_failures,
        })
    }

    /// Poll until shutdown, the poll limit, or too many consecutive receive failures.
    ///
    /// An empty poll is followed by exactly one idle backoff before the next
    /// poll. A transient receive failure is followed by an exponential
    /// backoff, never shorter than the error's own retry hint; a successful
    /// poll resets the failure count. A non-transient failure (a rejected
    /// request, a missing queue, bad credentials) stops the loop at once.
    pub async fn run(&mut self, mut shutdown: ShutdownToken) -> Result<ConsumerStats, ConsumerError> {
        self.config.receive.validate()?;

        info!(
            queue = %self.queue,
            max_messages = self.config.receive.max_messages,
            wait_time_seconds = self.config.receive.wait_time_seconds,
            visibility_timeout_seconds = self.config.receive.visibility_timeout_seconds,
            "Starting consumer"
        );

        let mut failures = FailureState::new();

        loop {
            if shutdown.is_shutdown() || self.poll_budget_spent() {
                break;
            }

            let outcome = self.poll_once(&mut shutdown).await;
            let budget_spent = self.poll_budget_spent();

            let pause = match outcome {
                Ok(PollOutcome::Cancelled) => break,
                Ok(PollOutcome::Empty) => {
                    failures.reset();
                    self.config.idle_backoff
                }
                Ok(PollOutcome::Processed { .. }) => {
                    failures.reset();
                    Duration::ZERO
                }
                Err(e) if !e.is_transient() => {
                    error!(
                        queue = %self.queue,
                        kind = ?e.kind(),
                        error = %e,
                        "Receive failed with a non-retryable error; stopping consumer"
                    );
                    return Err(ConsumerError::Permanent { source: e });
                }
                Err(e) => {
                    let attempts = failures.record_failure();
                    if !failures.can_retry(&self.config.failure_backoff) {
                        error!(
                            queue = %self.queue,
                            attempts,
                            error = %e,
                            "Receive failed too many times; stopping consumer"
                        );
                        return Err(ConsumerError::RetriesExhausted {
                            attempts,
                            source: e,
                        });
                    }

                    let delay = failures
                        .next_delay(&self.config.failure_backoff)
                        .max(e.retry_after().unwrap_or_default());
                    warn!(
                        queue = %self.queue,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Receive failed"
                    );
                    delay
                }
            };

            if budget_spent {
                break;
            }

            if !pause.is_zero() && !shutdown.sleep(pause).await {
                break;
            }
        }

        info!(
            queue = %self.queue,
            polls = self.stats.polls,
            received = self.stats.messages_received,
            deleted = self.stats.messages_deleted,
            "Consumer stopped"
        );
        Ok(self.stats)
    }

    fn poll_budget_spent(&self) -> bool {
        self.config
            .max_polls
            .is_some_and(|max| self.stats.polls >= max)
    }
}
