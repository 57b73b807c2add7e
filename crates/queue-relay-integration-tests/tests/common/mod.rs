//! Common test utilities for queue-relay integration tests
//!
//! This module provides:
//! - An in-memory relay fixture with a queue subscribed to a topic
//! - A recording message handler
//! - Consumer settings suited to paused-time tests

use async_trait::async_trait;
use queue_relay_core::{ConsumerConfig, MessageHandler, MessageProducer};
use queue_relay_runtime::{
    InMemoryQueueService, InMemoryTopicPublisher, QueueAttributes, QueueClient, QueueName,
    QueueUrl, ReceivedMessage, TopicArn,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_TOPIC: &str = "arn:aws:sns:us-east-1:000000000000:test-topic";

/// In-memory queue service and topic wired together
#[allow(dead_code)]
pub struct Fixture {
    pub queues: InMemoryQueueService,
    pub topics: InMemoryTopicPublisher,
    pub queue: QueueUrl,
    pub topic: TopicArn,
}

impl Fixture {
    /// Create `queue_name` with the given attributes and subscribe it to the test topic
    pub async fn new(queue_name: &str, attributes: QueueAttributes) -> Self {
        let queues = InMemoryQueueService::new();
        let topics = InMemoryTopicPublisher::new(queues.clone());
        let topic = TopicArn::new(TEST_TOPIC).unwrap();
        topics.create_topic(&topic).unwrap();

        let queue = queues
            .create_queue(&QueueName::new(queue_name).unwrap(), &attributes)
            .await
            .unwrap();
        topics.subscribe(&topic, &queue).unwrap();

        Self {
            queues,
            topics,
            queue,
            topic,
        }
    }

    /// Queue client as the producer and consumer see it
    pub fn client(&self) -> Arc<dyn QueueClient> {
        Arc::new(self.queues.clone())
    }

    pub fn producer(&self) -> MessageProducer {
        MessageProducer::new(self.client(), Arc::new(self.topics.clone()))
    }

    #[allow(dead_code)]
    pub fn stored(&self) -> usize {
        self.queues.message_count(&self.queue).unwrap()
    }
}

/// Handler that records the bodies it sees
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RecordingHandler {
    bodies: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        self.bodies.lock().unwrap().push(message.body.clone());
        Ok(())
    }
}

/// Consumer settings with short pauses and a poll limit
#[allow(dead_code)]
pub fn consumer_config(max_polls: u64) -> ConsumerConfig {
    let mut config = ConsumerConfig::default();
    config.receive.wait_time_seconds = 1;
    config.idle_backoff = Duration::from_secs(5);
    config.delete_pause = Duration::from_millis(10);
    config.max_polls = Some(max_polls);
    config
}
