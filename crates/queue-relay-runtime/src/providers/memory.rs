//! In-memory queue and topic implementation for testing and dry runs.
//!
//! This module provides a functional stand-in for the managed service that:
//! - Creates queues idempotently and hands out URL-like references
//! - Hides received messages for their visibility timeout
//! - Issues a fresh receipt handle on every receive
//! - Long-polls, waking early when a message is sent or becomes visible
//! - Fans topic publishes out to subscribed queues as notification envelopes
//!
//! Timing uses `tokio::time`, so tests running with a paused clock observe
//! visibility timeouts and long polls deterministically.

use crate::client::{QueueClient, TopicPublisher};
use crate::error::QueueError;
use crate::message::{
    screen_batch, validate_message_body, validate_subject, BatchEntry, BatchSuccess, MessageId,
    Notification, QueueAttributes, QueueName, QueueUrl, ReceiptHandle, ReceiveOptions,
    ReceivedMessage, SendBatchOutcome, TopicArn, MAX_BATCH_SIZE,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const ACCOUNT_ID: &str = "000000000000";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Storage shared by every clone of the service
#[derive(Default)]
struct ServiceState {
    queues: HashMap<QueueUrl, InMemoryQueue>,
    urls_by_name: HashMap<QueueName, QueueUrl>,
}

impl ServiceState {
    fn queue_mut(&mut self, url: &QueueUrl) -> Result<&mut InMemoryQueue, QueueError> {
        self.queues
            .get_mut(url)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: url.as_str().to_string(),
            })
    }
}

struct InMemoryQueue {
    attributes: QueueAttributes,
    messages: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn new(attributes: QueueAttributes) -> Self {
        Self {
            attributes,
            messages: VecDeque::new(),
        }
    }

    fn enqueue(&mut self, body: String) -> MessageId {
        let message_id = MessageId::generate();
        self.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            receive_count: 0,
            lease: None,
        });
        message_id
    }

    /// Lease up to `max` visible messages for `visibility`
    fn lease_visible(&mut self, max: usize, visibility: Duration, now: Instant) -> Vec<ReceivedMessage> {
        let mut leased = Vec::new();

        for stored in self.messages.iter_mut() {
            if leased.len() >= max {
                break;
            }
            if !stored.is_visible(now) {
                continue;
            }

            let receipt = ReceiptHandle::new(uuid::Uuid::new_v4().to_string());
            stored.receive_count += 1;
            stored.lease = Some(Lease {
                receipt: receipt.clone(),
                visible_at: now + visibility,
            });

            leased.push(ReceivedMessage {
                message_id: stored.message_id.clone(),
                body: stored.body.clone(),
                receipt_handle: receipt,
                receive_count: stored.receive_count,
            });
        }

        leased
    }

    /// Earliest moment an in-flight message becomes visible again
    fn next_visible_at(&self) -> Option<Instant> {
        self.messages
            .iter()
            .filter_map(|m| m.lease.as_ref().map(|l| l.visible_at))
            .min()
    }
}

/// A message stored in the queue
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
    lease: Option<Lease>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        match &self.lease {
            Some(lease) => now >= lease.visible_at,
            None => true,
        }
    }
}

/// Visibility lease granted by the latest receive
struct Lease {
    receipt: ReceiptHandle,
    visible_at: Instant,
}

// ============================================================================
// InMemoryQueueService
// ============================================================================

/// In-memory queue service implementing [`QueueClient`].
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryQueueService {
    state: Arc<Mutex<ServiceState>>,
    arrivals: Arc<Notify>,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServiceState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::ServiceError {
            service: "memory".to_string(),
            code: "InternalError".to_string(),
            message: "queue state lock poisoned".to_string(),
            sender_fault: false,
        })
    }

    /// Number of messages stored in the queue, visible or not
    pub fn message_count(&self, queue: &QueueUrl) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        Ok(state.queue_mut(queue)?.messages.len())
    }

    /// Number of messages currently hidden by a visibility lease
    pub fn in_flight_count(&self, queue: &QueueUrl) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        Ok(state
            .queue_mut(queue)?
            .messages
            .iter()
            .filter(|m| !m.is_visible(now))
            .count())
    }

    /// Resolve a queue name to its URL
    pub fn queue_url(&self, name: &QueueName) -> Result<QueueUrl, QueueError> {
        let state = self.lock()?;
        state
            .urls_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: name.as_str().to_string(),
            })
    }

    fn enqueue(&self, queue: &QueueUrl, body: String) -> Result<MessageId, QueueError> {
        let message_id = {
            let mut state = self.lock()?;
            state.queue_mut(queue)?.enqueue(body)
        };
        self.arrivals.notify_waiters();
        Ok(message_id)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueService {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &QueueAttributes,
    ) -> Result<QueueUrl, QueueError> {
        attributes.validate()?;

        let mut state = self.lock()?;
        if let Some(url) = state.urls_by_name.get(name).cloned() {
            let existing = state.queue_mut(&url)?;
            if existing.attributes != *attributes {
                return Err(QueueError::QueueAlreadyExists {
                    queue_name: name.as_str().to_string(),
                });
            }
            return Ok(url);
        }

        let url = QueueUrl::new(format!(
            "http://queue.localhost/{}/{}",
            ACCOUNT_ID,
            name.as_str()
        ))?;
        state
            .queues
            .insert(url.clone(), InMemoryQueue::new(*attributes));
        state.urls_by_name.insert(name.clone(), url.clone());

        debug!(queue = %url, "Created in-memory queue");
        Ok(url)
    }

    async fn send_message(&self, queue: &QueueUrl, body: &str) -> Result<MessageId, QueueError> {
        validate_message_body(body)?;
        self.enqueue(queue, body.to_string())
    }

    async fn send_message_batch(
        &self,
        queue: &QueueUrl,
        entries: &[BatchEntry],
    ) -> Result<SendBatchOutcome, QueueError> {
        let screened = screen_batch(entries, MAX_BATCH_SIZE)?;

        let successful = {
            let mut state = self.lock()?;
            let target = state.queue_mut(queue)?;
            screened
                .accepted
                .iter()
                .map(|entry| BatchSuccess {
                    id: entry.id.clone(),
                    message_id: target.enqueue(entry.body.clone()),
                })
                .collect::<Vec<_>>()
        };

        if !successful.is_empty() {
            self.arrivals.notify_waiters();
        }

        Ok(SendBatchOutcome {
            successful,
            failed: screened.rejected,
        })
    }

    async fn receive_messages(
        &self,
        queue: &QueueUrl,
        options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        options.validate()?;

        let visibility = Duration::from_secs(u64::from(options.visibility_timeout_seconds));
        let deadline = Instant::now() + Duration::from_secs(u64::from(options.wait_time_seconds));

        loop {
            // Registered before inspecting the queue so a concurrent send
            // between the check and the wait is not missed.
            let arrival = self.arrivals.notified();

            let now = Instant::now();
            let next_visible_at = {
                let mut state = self.lock()?;
                let target = state.queue_mut(queue)?;
                let leased = target.lease_visible(options.max_messages as usize, visibility, now);
                if !leased.is_empty() {
                    return Ok(leased);
                }
                target.next_visible_at()
            };

            if now >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible_at.map_or(deadline, |at| at.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, arrival).await;
        }
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let target = state.queue_mut(queue)?;

        let position = target.messages.iter().position(|m| {
            m.lease
                .as_ref()
                .is_some_and(|lease| lease.receipt == *receipt && now < lease.visible_at)
        });

        match position {
            Some(index) => {
                target.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::ReceiptHandleInvalid {
                receipt: receipt.as_str().to_string(),
            }),
        }
    }
}

// ============================================================================
// InMemoryTopic
// ============================================================================

/// In-memory topic registry implementing [`TopicPublisher`].
///
/// Publishing delivers a [`Notification`] envelope into every queue
/// subscribed to the topic.
#[derive(Clone)]
pub struct InMemoryTopicPublisher {
    queues: InMemoryQueueService,
    subscriptions: Arc<Mutex<HashMap<TopicArn, Vec<QueueUrl>>>>,
}

impl InMemoryTopicPublisher {
    /// Create a publisher delivering into the given queue service
    pub fn new(queues: InMemoryQueueService) -> Self {
        Self {
            queues,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TopicArn, Vec<QueueUrl>>>, QueueError> {
        self.subscriptions
            .lock()
            .map_err(|_| QueueError::ServiceError {
                service: "memory".to_string(),
                code: "InternalError".to_string(),
                message: "subscription lock poisoned".to_string(),
                sender_fault: false,
            })
    }

    /// Register a topic; registering an existing topic is a no-op
    pub fn create_topic(&self, topic: &TopicArn) -> Result<(), QueueError> {
        self.lock()?.entry(topic.clone()).or_default();
        Ok(())
    }

    /// Subscribe a queue to a topic
    pub fn subscribe(&self, topic: &TopicArn, queue: &QueueUrl) -> Result<(), QueueError> {
        let mut subscriptions = self.lock()?;
        let subscribers = subscriptions
            .get_mut(topic)
            .ok_or_else(|| QueueError::TopicNotFound {
                topic: topic.as_str().to_string(),
            })?;
        if !subscribers.contains(queue) {
            subscribers.push(queue.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl TopicPublisher for InMemoryTopicPublisher {
    async fn publish(
        &self,
        topic: &TopicArn,
        subject: &str,
        body: &str,
    ) -> Result<MessageId, QueueError> {
        validate_subject(subject)?;
        validate_message_body(body)?;

        let subscribers = self
            .lock()?
            .get(topic)
            .cloned()
            .ok_or_else(|| QueueError::TopicNotFound {
                topic: topic.as_str().to_string(),
            })?;

        let message_id = MessageId::generate();
        let subject = (!subject.is_empty()).then_some(subject);
        let envelope = serde_json::to_string(&Notification::new(&message_id, topic, subject, body))
            .map_err(|e| QueueError::Serialization {
                message: e.to_string(),
            })?;

        for queue in &subscribers {
            self.queues.enqueue(queue, envelope.clone())?;
        }

        debug!(
            topic = %topic,
            subscribers = subscribers.len(),
            message_id = %message_id,
            "Published to in-memory topic"
        );
        Ok(message_id)
    }
}
