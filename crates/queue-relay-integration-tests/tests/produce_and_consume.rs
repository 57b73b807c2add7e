//! Integration tests for producing into a queue and draining it
//!
//! These tests verify:
//! - Single sends return distinct ids and are deleted for good once handled
//! - Batched sends are split into calls of at most ten entries
//! - Duplicate batch entry ids are reported as failed entries
//! - The consumer drains a queue and idles between empty polls

mod common;

use common::{consumer_config, Fixture, RecordingHandler};
use queue_relay_core::{shutdown_channel, MessageConsumer, PollOutcome};
use queue_relay_runtime::{BatchEntry, BatchEntryId, QueueAttributes, ReceiveOptions};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

fn no_wait(max_messages: u32) -> ReceiveOptions {
    ReceiveOptions {
        max_messages,
        wait_time_seconds: 0,
        visibility_timeout_seconds: 30,
    }
}

/// Verify send, receive and delete of three messages on "test-q"
#[tokio::test]
async fn test_send_receive_delete_round() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    let client = fixture.client();

    let report = fixture.producer().send_n(&fixture.queue, 3).await;

    assert_eq!(report.sent_count(), 3);
    let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let ids: HashSet<_> = report.message_ids().into_iter().collect();
    assert_eq!(ids.len(), 3);

    let received = client
        .receive_messages(&fixture.queue, &no_wait(10))
        .await
        .unwrap();
    assert_eq!(received.len(), 3);

    for message in &received {
        client
            .delete_message(&fixture.queue, &message.receipt_handle)
            .await
            .unwrap();
    }

    let again = client
        .receive_messages(&fixture.queue, &no_wait(10))
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(fixture.stored(), 0);
}

/// Verify a deleted message stays gone after its visibility timeout passes
#[tokio::test(start_paused = true)]
async fn test_deleted_message_does_not_reappear() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    let client = fixture.client();
    fixture.producer().send_n(&fixture.queue, 2).await;

    let received = client
        .receive_messages(&fixture.queue, &no_wait(10))
        .await
        .unwrap();
    assert_eq!(received.len(), 2);

    client
        .delete_message(&fixture.queue, &received[0].receipt_handle)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;

    let redelivered = client
        .receive_messages(&fixture.queue, &no_wait(10))
        .await
        .unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].message_id, received[1].message_id);
    assert_eq!(redelivered[0].receive_count, 2);
}

/// Verify 25 messages go out as batches of 10, 10 and 5
#[tokio::test]
async fn test_send_batched_twenty_five() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;

    let report = fixture
        .producer()
        .send_batched(&fixture.queue, 25, 10)
        .await
        .unwrap();

    assert_eq!(report.batch_calls(), 3);
    let sizes: Vec<usize> = report.batches.iter().map(|b| b.entry_ids.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    let ids: Vec<String> = report
        .entry_ids()
        .into_iter()
        .map(|id| id.as_str().to_string())
        .collect();
    let expected: Vec<String> = (0..25).map(|i| format!("Message{}", i)).collect();
    assert_eq!(ids, expected);

    assert_eq!(report.successful_count(), 25);
    assert_eq!(report.failed_count(), 0);
    assert_eq!(fixture.stored(), 25);
}

/// Verify batch call counts for totals around the batch boundary
#[tokio::test]
async fn test_send_batched_call_counts() {
    for (total, calls) in [(0, 0), (1, 1), (10, 1), (11, 2), (30, 3)] {
        let fixture = Fixture::new("test-q", QueueAttributes::default()).await;

        let report = fixture
            .producer()
            .send_batched(&fixture.queue, total, 10)
            .await
            .unwrap();

        assert_eq!(report.batch_calls(), calls, "total {}", total);
        let distinct: HashSet<_> = report.entry_ids().into_iter().collect();
        assert_eq!(distinct.len(), total);
        assert_eq!(fixture.stored(), total);
    }
}

/// Verify a repeated entry id surfaces as a failed entry instead of overwriting the first
#[tokio::test]
async fn test_duplicate_batch_id_is_failed() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    let client = fixture.client();

    let entries = vec![
        BatchEntry::new(BatchEntryId::new("Message0").unwrap(), "first"),
        BatchEntry::new(BatchEntryId::new("Message1").unwrap(), "second"),
        BatchEntry::new(BatchEntryId::new("Message0").unwrap(), "duplicate"),
    ];

    let outcome = client
        .send_message_batch(&fixture.queue, &entries)
        .await
        .unwrap();

    assert!(!outcome.is_complete_success());
    assert!(outcome
        .failed_ids()
        .iter()
        .any(|id| id.as_str() == "Message0"));
    let successful: Vec<&str> = outcome
        .successful_ids()
        .into_iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(successful, vec!["Message0", "Message1"]);

    let bodies: Vec<String> = client
        .receive_messages(&fixture.queue, &no_wait(10))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert!(!bodies.contains(&"duplicate".to_string()));
}

/// Verify the consumer drains the queue, then waits one idle backoff per empty poll
#[tokio::test(start_paused = true)]
async fn test_consumer_drains_then_idles() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    fixture.producer().send_n(&fixture.queue, 3).await;

    let handler = RecordingHandler::new();
    let config = consumer_config(3);
    let idle_backoff = config.idle_backoff;
    let long_poll = Duration::from_secs(u64::from(config.receive.wait_time_seconds));
    let mut consumer = MessageConsumer::new(
        fixture.client(),
        fixture.queue.clone(),
        Arc::new(handler.clone()),
        config,
    );
    let (_sender, shutdown) = shutdown_channel();

    let started = Instant::now();
    let stats = consumer.run(shutdown).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(stats.polls, 3);
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.messages_deleted, 3);
    assert_eq!(stats.empty_polls, 2);
    assert_eq!(handler.bodies().len(), 3);
    assert_eq!(fixture.stored(), 0);

    // Two empty long polls with one idle backoff between them
    assert!(elapsed >= long_poll * 2 + idle_backoff);
    assert!(elapsed < long_poll * 2 + idle_backoff * 2);
}

/// Verify a single pass reports what it handled
#[tokio::test]
async fn test_poll_once_reports_processed() {
    let fixture = Fixture::new("test-q", QueueAttributes::default()).await;
    fixture.producer().send_n(&fixture.queue, 2).await;

    let mut config = consumer_config(1);
    config.receive.wait_time_seconds = 0;
    config.delete_pause = Duration::ZERO;
    let mut consumer = MessageConsumer::with_logging_handler(
        fixture.client(),
        fixture.queue.clone(),
        config,
    );
    let (_sender, mut shutdown) = shutdown_channel();

    let outcome = consumer.poll_once(&mut shutdown).await.unwrap();

    assert_eq!(
        outcome,
        PollOutcome::Processed {
            received: 2,
            deleted: 2,
            handler_failures: 0,
            delete_failures: 0,
        }
    );
    assert_eq!(
        consumer.poll_once(&mut shutdown).await.unwrap(),
        PollOutcome::Empty
    );
}
