//! Integration tests for publishing to a topic and consuming the fan-out
//!
//! These tests verify:
//! - A published message arrives in every subscribed queue as a notification
//! - The consumer unwraps and removes notifications
//! - Publishing to an unknown topic fails without touching any queue

mod common;

use common::{consumer_config, Fixture, RecordingHandler};
use queue_relay_core::{shutdown_channel, MessageConsumer};
use queue_relay_runtime::{
    ErrorKind, QueueAttributes, QueueClient, QueueError, QueueName, ReceiveOptions, TopicArn,
};
use std::sync::Arc;

/// Verify the subscribed queue receives the notification envelope
#[tokio::test]
async fn test_publish_reaches_subscribed_queues() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    let second = fixture
        .queues
        .create_queue(
            &QueueName::new("second-q").unwrap(),
            &QueueAttributes::default(),
        )
        .await
        .unwrap();
    fixture.topics.subscribe(&fixture.topic, &second).unwrap();

    let message_id = fixture
        .producer()
        .publish_one(&fixture.topic, "SNS Message 2", "This is another message from AWS SNS!")
        .await
        .unwrap();

    let options = ReceiveOptions {
        wait_time_seconds: 0,
        ..Default::default()
    };
    for queue in [&fixture.queue, &second] {
        let received = fixture
            .queues
            .receive_messages(queue, &options)
            .await
            .unwrap();
        assert_eq!(received.len(), 1);

        let notification = received[0].notification().unwrap();
        assert_eq!(notification.message_id, message_id.as_str());
        assert_eq!(notification.topic_arn, fixture.topic.as_str());
        assert_eq!(notification.subject.as_deref(), Some("SNS Message 2"));
        assert_eq!(notification.message, "This is another message from AWS SNS!");
    }
}

/// Verify the consumer handles and deletes a published notification
#[tokio::test(start_paused = true)]
async fn test_consumer_removes_published_notification() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    fixture
        .producer()
        .publish_one(&fixture.topic, "", "no subject")
        .await
        .unwrap();

    let handler = RecordingHandler::new();
    let mut consumer = MessageConsumer::new(
        fixture.client(),
        fixture.queue.clone(),
        Arc::new(handler.clone()),
        consumer_config(1),
    );
    let (_sender, shutdown) = shutdown_channel();

    let stats = consumer.run(shutdown).await.unwrap();

    assert_eq!(stats.messages_deleted, 1);
    assert_eq!(fixture.stored(), 0);

    let bodies = handler.bodies();
    assert_eq!(bodies.len(), 1);
    let envelope: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(envelope["Message"], "no subject");
    assert!(envelope.get("Subject").is_none() || envelope["Subject"].is_null());
}

/// Verify an unknown topic is reported and nothing is enqueued
#[tokio::test]
async fn test_publish_to_unknown_topic_fails() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    let unknown = TopicArn::new("arn:aws:sns:us-east-1:000000000000:missing").unwrap();

    let err = fixture
        .producer()
        .publish_one(&unknown, "subject", "body")
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::TopicNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Service);
    assert!(!err.is_transient());
    assert_eq!(fixture.stored(), 0);
}
