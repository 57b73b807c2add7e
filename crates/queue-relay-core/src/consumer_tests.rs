//! Tests for the consumer loop

use super::*;
use crate::shutdown::shutdown_channel;
use queue_relay_runtime::{
    BatchEntry, InMemoryQueueService, MessageId, QueueAttributes, QueueName, ReceiptHandle,
    SendBatchOutcome,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

/// Queue client replaying scripted receive results.
///
/// Once the script runs out every receive is empty. Receive instants and
/// deleted receipts are recorded for assertions.
#[derive(Default)]
struct ScriptedQueueClient {
    script: Mutex<VecDeque<Result<Vec<ReceivedMessage>, QueueError>>>,
    polls: Mutex<Vec<Instant>>,
    deleted: Mutex<Vec<ReceiptHandle>>,
    failing_deletes: HashSet<String>,
}

impl ScriptedQueueClient {
    fn new(script: Vec<Result<Vec<ReceivedMessage>, QueueError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    fn poll_instants(&self) -> Vec<Instant> {
        self.polls.lock().unwrap().clone()
    }

    fn deleted_receipts(&self) -> Vec<String> {
        self.deleted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl QueueClient for ScriptedQueueClient {
    async fn create_queue(
        &self,
        name: &QueueName,
        _attributes: &QueueAttributes,
    ) -> Result<QueueUrl, QueueError> {
        Ok(QueueUrl::new(format!("http://test/{}", name))?)
    }

    async fn send_message(&self, _queue: &QueueUrl, _body: &str) -> Result<MessageId, QueueError> {
        Ok(MessageId::generate())
    }

    async fn send_message_batch(
        &self,
        _queue: &QueueUrl,
        _entries: &[BatchEntry],
    ) -> Result<SendBatchOutcome, QueueError> {
        Ok(SendBatchOutcome::default())
    }

    async fn receive_messages(
        &self,
        _queue: &QueueUrl,
        _options: &ReceiveOptions,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.polls.lock().unwrap().push(Instant::now());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_message(
        &self,
        _queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        if self.failing_deletes.contains(receipt.as_str()) {
            return Err(QueueError::ReceiptHandleInvalid {
                receipt: receipt.as_str().to_string(),
            });
        }
        self.deleted.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}

/// Handler failing for the listed bodies and recording the rest
#[derive(Default)]
struct RecordingHandler {
    handled: Mutex<Vec<String>>,
    failing_bodies: HashSet<String>,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> anyhow::Result<()> {
        if self.failing_bodies.contains(&message.body) {
            anyhow::bail!("cannot handle {}", message.body);
        }
        self.handled.lock().unwrap().push(message.body.clone());
        Ok(())
    }
}

fn message(n: usize) -> ReceivedMessage {
    ReceivedMessage {
        message_id: MessageId::generate(),
        body: format!("body {}", n),
        receipt_handle: ReceiptHandle::new(format!("receipt-{}", n)),
        receive_count: 1,
    }
}

fn throttled() -> QueueError {
    QueueError::ServiceError {
        service: "sqs".to_string(),
        code: "Throttling".to_string(),
        message: "Rate exceeded".to_string(),
        sender_fault: false,
    }
}

fn test_queue() -> QueueUrl {
    QueueUrl::new("http://test/test-q").unwrap()
}

fn fast_failure_policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy::new(
        max_attempts,
        Duration::from_secs(1),
        Duration::from_secs(30),
        2.0,
    )
    .without_jitter()
}

fn consumer(
    client: Arc<ScriptedQueueClient>,
    handler: Arc<RecordingHandler>,
    config: ConsumerConfig,
) -> MessageConsumer {
    MessageConsumer::new(client, test_queue(), handler, config)
}

// ============================================================================
// Single Poll
// ============================================================================

mod poll_once {
    use super::*;

    /// Verify an empty receive is reported, not raised
    #[tokio::test]
    async fn test_empty_receive_is_not_an_error() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Ok(Vec::new())]));
        let mut consumer = consumer(client, Arc::default(), ConsumerConfig::default());
        let (_sender, mut token) = shutdown_channel();

        let outcome = consumer.poll_once(&mut token).await.unwrap();

        assert_eq!(outcome, PollOutcome::Empty);
        assert_eq!(consumer.stats().empty_polls, 1);
    }

    /// Verify each handled message is deleted, with a pause between messages
    #[tokio::test(start_paused = true)]
    async fn test_handled_messages_are_deleted() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Ok(vec![
            message(0),
            message(1),
            message(2),
        ])]));
        let handler = Arc::new(RecordingHandler::default());
        let mut consumer = consumer(client.clone(), handler.clone(), ConsumerConfig::default());
        let (_sender, mut token) = shutdown_channel();
        let started = Instant::now();

        let outcome = consumer.poll_once(&mut token).await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Processed {
                received: 3,
                deleted: 3,
                handler_failures: 0,
                delete_failures: 0
            }
        );
        assert_eq!(
            client.deleted_receipts(),
            vec!["receipt-0", "receipt-1", "receipt-2"]
        );
        assert_eq!(*handler.handled.lock().unwrap(), vec!["body 0", "body 1", "body 2"]);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Verify a failed handler leaves its message undeleted
    #[tokio::test(start_paused = true)]
    async fn test_handler_failure_skips_delete() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Ok(vec![message(0), message(1)])]));
        let handler = Arc::new(RecordingHandler {
            failing_bodies: ["body 0".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let mut consumer = consumer(client.clone(), handler, ConsumerConfig::default());
        let (_sender, mut token) = shutdown_channel();

        let outcome = consumer.poll_once(&mut token).await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Processed {
                received: 2,
                deleted: 1,
                handler_failures: 1,
                delete_failures: 0
            }
        );
        assert_eq!(client.deleted_receipts(), vec!["receipt-1"]);
        assert_eq!(consumer.stats().handler_failures, 1);
    }

    /// Verify a failed delete is counted and the pass continues
    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_is_counted() {
        let client = Arc::new(ScriptedQueueClient {
            failing_deletes: ["receipt-0".to_string()].into_iter().collect(),
            ..ScriptedQueueClient::new(vec![Ok(vec![message(0), message(1)])])
        });
        let mut consumer = consumer(client.clone(), Arc::default(), ConsumerConfig::default());
        let (_sender, mut token) = shutdown_channel();

        let outcome = consumer.poll_once(&mut token).await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Processed {
                received: 2,
                deleted: 1,
                handler_failures: 0,
                delete_failures: 1
            }
        );
        assert_eq!(consumer.stats().delete_failures, 1);
    }

    /// Verify receive errors are returned and counted
    #[tokio::test]
    async fn test_receive_error_is_returned() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Err(throttled())]));
        let mut consumer = consumer(client, Arc::default(), ConsumerConfig::default());
        let (_sender, mut token) = shutdown_channel();

        let err = consumer.poll_once(&mut token).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(consumer.stats().receive_failures, 1);
        assert_eq!(consumer.stats().polls, 1);
    }

    /// Verify shutdown during the long poll cancels the pass
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_long_poll() {
        let queues = InMemoryQueueService::new();
        let queue = queues
            .create_queue(&QueueName::new("idle").unwrap(), &QueueAttributes::default())
            .await
            .unwrap();
        let mut consumer = MessageConsumer::with_logging_handler(
            Arc::new(queues),
            queue,
            ConsumerConfig::default(),
        );
        let (sender, mut token) = shutdown_channel();

        let handle = tokio::spawn(async move {
            let outcome = consumer.poll_once(&mut token).await;
            (outcome, consumer.stats())
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        sender.shutdown();

        let (outcome, stats) = handle.await.unwrap();
        assert_eq!(outcome.unwrap(), PollOutcome::Cancelled);
        assert_eq!(stats.polls, 0);
    }
}

// ============================================================================
// Polling Loop
// ============================================================================

mod run {
    use super::*;

    /// Verify exactly one idle backoff separates empty polls
    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_triggers_one_idle_backoff() {
        let client = Arc::new(ScriptedQueueClient::new(Vec::new()));
        let config = ConsumerConfig {
            max_polls: Some(3),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let stats = consumer.run(token).await.unwrap();

        assert_eq!(stats.polls, 3);
        assert_eq!(stats.empty_polls, 3);

        let polls = client.poll_instants();
        assert_eq!(polls.len(), 3);
        for pair in polls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(60), "gap {:?}", gap);
            assert!(gap < Duration::from_secs(61), "gap {:?}", gap);
        }
    }

    /// Verify a non-empty poll is followed by an immediate poll
    #[tokio::test(start_paused = true)]
    async fn test_processed_poll_is_followed_immediately() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Ok(vec![message(0)])]));
        let config = ConsumerConfig {
            max_polls: Some(2),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let stats = consumer.run(token).await.unwrap();

        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.messages_deleted, 1);
        let polls = client.poll_instants();
        assert!(polls[1] - polls[0] < Duration::from_secs(1));
    }

    /// Verify repeated failures back off and finally stop the loop
    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_exhaust_retries() {
        let client = Arc::new(ScriptedQueueClient::new(vec![
            Err(throttled()),
            Err(throttled()),
            Err(throttled()),
        ]));
        let config = ConsumerConfig {
            failure_backoff: fast_failure_policy(3),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let err = consumer.run(token).await.unwrap_err();

        match err {
            ConsumerError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, QueueError::ServiceError { .. }));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }

        let polls = client.poll_instants();
        assert_eq!(polls.len(), 3);
        assert!(polls[1] - polls[0] >= Duration::from_secs(1));
        assert!(polls[2] - polls[1] >= Duration::from_secs(2));
        assert_eq!(consumer.stats().receive_failures, 3);
    }

    /// Verify a rejected receive request stops the loop without retrying
    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_is_not_retried() {
        let rejected = QueueError::ServiceError {
            service: "sqs".to_string(),
            code: "InvalidParameterValue".to_string(),
            message: "Value for parameter WaitTimeSeconds is invalid".to_string(),
            sender_fault: true,
        };
        let client = Arc::new(ScriptedQueueClient::new(vec![
            Err(rejected),
            Err(throttled()),
            Err(throttled()),
        ]));
        let config = ConsumerConfig {
            failure_backoff: fast_failure_policy(3),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();
        let started = Instant::now();

        let err = consumer.run(token).await.unwrap_err();

        match err {
            ConsumerError::Permanent { source } => {
                assert_eq!(source.kind(), queue_relay_runtime::ErrorKind::Validation);
            }
            other => panic!("Expected Permanent, got {:?}", other),
        }
        assert_eq!(client.poll_instants().len(), 1);
        assert_eq!(consumer.stats().receive_failures, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    /// Verify a missing queue stops the loop on the first failure
    #[tokio::test(start_paused = true)]
    async fn test_missing_queue_is_not_retried() {
        let client = Arc::new(ScriptedQueueClient::new(vec![Err(
            QueueError::QueueNotFound {
                queue: "test-q".to_string(),
            },
        )]));
        let config = ConsumerConfig {
            failure_backoff: fast_failure_policy(3),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let err = consumer.run(token).await.unwrap_err();

        assert!(matches!(
            err,
            ConsumerError::Permanent {
                source: QueueError::QueueNotFound { .. }
            }
        ));
        assert_eq!(client.poll_instants().len(), 1);
    }

    /// Verify the error's retry hint is a floor for the backoff delay
    #[tokio::test(start_paused = true)]
    async fn test_retry_hint_floors_backoff() {
        let client = Arc::new(ScriptedQueueClient::new(vec![
            Err(QueueError::ConnectionFailed {
                message: "connection refused".to_string(),
            }),
            Ok(vec![message(0)]),
        ]));
        let config = ConsumerConfig {
            failure_backoff: fast_failure_policy(3),
            max_polls: Some(2),
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let stats = consumer.run(token).await.unwrap();

        assert_eq!(stats.messages_deleted, 1);
        let polls = client.poll_instants();
        assert_eq!(polls.len(), 2);
        assert!(polls[1] - polls[0] >= Duration::from_secs(5));
        assert!(polls[1] - polls[0] < Duration::from_secs(6));
    }

    /// Verify a successful poll resets the failure count
    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let client = Arc::new(ScriptedQueueClient::new(vec![
            Err(throttled()),
            Err(throttled()),
            Ok(vec![message(0)]),
            Err(throttled()),
            Err(throttled()),
        ]));
        let config = ConsumerConfig {
            failure_backoff: fast_failure_policy(3),
            max_polls: Some(6),
            ..Default::default()
        };
        let mut consumer = consumer(client, Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let stats = consumer.run(token).await.unwrap();

        assert_eq!(stats.polls, 6);
        assert_eq!(stats.receive_failures, 4);
        assert_eq!(stats.messages_deleted, 1);
    }

    /// Verify shutdown interrupts the idle backoff promptly
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_idle_backoff() {
        let client = Arc::new(ScriptedQueueClient::new(Vec::new()));
        let mut consumer = consumer(client.clone(), Arc::default(), ConsumerConfig::default());
        let (sender, token) = shutdown_channel();
        let started = Instant::now();

        let handle = tokio::spawn(async move { consumer.run(token).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        sender.shutdown();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.polls, 1);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(client.poll_instants().len(), 1);
    }

    /// Verify a token already signalled stops the loop before polling
    #[tokio::test]
    async fn test_run_with_signalled_token_does_not_poll() {
        let client = Arc::new(ScriptedQueueClient::new(Vec::new()));
        let mut consumer = consumer(client.clone(), Arc::default(), ConsumerConfig::default());
        let (sender, token) = shutdown_channel();
        sender.shutdown();

        let stats = consumer.run(token).await.unwrap();

        assert_eq!(stats, ConsumerStats::default());
        assert!(client.poll_instants().is_empty());
    }

    /// Verify invalid receive options are rejected before polling
    #[tokio::test]
    async fn test_run_rejects_invalid_receive_options() {
        let client = Arc::new(ScriptedQueueClient::new(Vec::new()));
        let config = ConsumerConfig {
            receive: ReceiveOptions {
                max_messages: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut consumer = consumer(client.clone(), Arc::default(), config);
        let (_sender, token) = shutdown_channel();

        let err = consumer.run(token).await.unwrap_err();

        assert!(matches!(err, ConsumerError::Configuration(_)));
        assert!(client.poll_instants().is_empty());
    }
}

// ============================================================================
// Logging Handler
// ============================================================================

mod logging_handler {
    use super::*;
    use queue_relay_runtime::{Notification, TopicArn};

    #[tokio::test]
    async fn test_logging_handler_accepts_plain_and_notification_bodies() {
        let handler = LoggingHandler;
        let plain = message(0);

        let topic = TopicArn::new("arn:aws:sns:us-east-1:000000000000:demo").unwrap();
        let envelope = Notification::new(&MessageId::generate(), &topic, Some("subject"), "hello");
        let notification = ReceivedMessage {
            body: serde_json::to_string(&envelope).unwrap(),
            ..message(1)
        };

        assert!(handler.handle(&plain).await.is_ok());
        assert!(handler.handle(&notification).await.is_ok());
    }
}
