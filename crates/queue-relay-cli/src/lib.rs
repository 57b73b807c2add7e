//! # Queue-Relay CLI
//!
//! Command-line interface for creating a queue, producing messages into it,
//! publishing to a topic and running the polling consumer.
//!
//! Every command works against AWS (SQS and SNS) or, with `--in-memory`,
//! against process-local stand-ins where the topic is subscribed to the queue.

use clap::{Parser, Subcommand};
use queue_relay_core::config::ConfigError;
use queue_relay_core::{
    shutdown_channel, ConsumerError, MessageConsumer, MessageProducer, ProducerError, RelayConfig,
    ShutdownSender, ShutdownToken,
};
use queue_relay_runtime::{
    InMemoryQueueService, InMemoryTopicPublisher, ProviderType, QueueClient, QueueError,
    QueueUrl, SnsTopicPublisher, SqsQueueClient, TopicPublisher, ValidationError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Relay CLI - queue producer, topic publisher and polling consumer
#[derive(Debug, Parser)]
#[command(name = "queue-relay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send, publish and consume messages on a managed queue")]
pub struct Cli {
    /// Configuration file path (TOML, YAML or JSON)
    #[arg(short, long, env = "QUEUE_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `queue_relay_core=debug`; overrides RUST_LOG
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Use process-local queues and topics instead of AWS
    #[arg(long)]
    pub in_memory: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Create the queue (no-op if it already exists with the same attributes)
    CreateQueue {
        /// Queue name, overriding the configured one
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Send generated messages one at a time
    Send {
        /// Number of messages to send
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Send generated messages in batches
    SendBatch {
        /// Total number of messages
        #[arg(short, long)]
        total: Option<usize>,

        /// Messages per batch call (1-10)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Publish one message to the topic
    Publish {
        /// Message subject
        #[arg(short, long)]
        subject: Option<String>,

        /// Message body
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Poll the queue until Ctrl+C / SIGTERM
    Consume {
        /// Stop after this many polls
        #[arg(long)]
        max_polls: Option<u64>,
    },

    /// Create the queue, publish one message, then consume
    Run {
        /// Stop consuming after this many polls
        #[arg(long)]
        max_polls: Option<u64>,
    },

    /// Print the resolved configuration as TOML
    Config,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("{failed} of {total} messages were not sent")]
    Incomplete { failed: usize, total: usize },

    #[error("Logging initialization failed: {message}")]
    Logging { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 1,
            CliError::Queue(_) => 2,
            CliError::Consumer(_) => 3,
            CliError::Producer(_) | CliError::InvalidArgument { .. } => 4,
            CliError::Incomplete { .. } => 5,
            CliError::Logging { .. } => 6,
        }
    }
}

fn invalid_argument(arg: &str, error: ValidationError) -> CliError {
    CliError::InvalidArgument {
        arg: arg.to_string(),
        message: error.to_string(),
    }
}

// ============================================================================
// Service Wiring
// ============================================================================

/// In-memory backends, kept so the topic can be subscribed to the queue
#[derive(Clone)]
struct InMemoryBackends {
    queues: InMemoryQueueService,
    topics: InMemoryTopicPublisher,
}

/// Queue and topic clients built once per process from the configuration
pub struct Relay {
    config: RelayConfig,
    queue_client: Arc<dyn QueueClient>,
    publisher: Arc<dyn TopicPublisher>,
    in_memory: Option<InMemoryBackends>,
}

impl Relay {
    /// Build the clients for the configured provider
    pub fn from_config(config: RelayConfig) -> Result<Self, CliError> {
        match config.provider {
            ProviderType::Aws => {
                let queue_client = Arc::new(SqsQueueClient::new(&config.aws)?);
                let publisher = Arc::new(SnsTopicPublisher::new(&config.aws)?);
                Ok(Self {
                    config,
                    queue_client,
                    publisher,
                    in_memory: None,
                })
            }
            ProviderType::InMemory => {
                let queues = InMemoryQueueService::new();
                let topics = InMemoryTopicPublisher::new(queues.clone());
                topics.create_topic(&topic_arn(&config)?)?;
                Ok(Self {
                    config,
                    queue_client: Arc::new(queues.clone()),
                    publisher: Arc::new(topics.clone()),
                    in_memory: Some(InMemoryBackends { queues, topics }),
                })
            }
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Process-local queue service when running in memory
    pub fn in_memory_queues(&self) -> Option<&InMemoryQueueService> {
        self.in_memory.as_ref().map(|b| &b.queues)
    }

    /// Create the queue, or fetch it if it already exists.
    ///
    /// In memory, the queue is also subscribed to the topic.
    pub async fn ensure_queue(&self, name: Option<&str>) -> Result<QueueUrl, CliError> {
        let queue_name = match name {
            Some(name) => queue_relay_runtime::QueueName::new(name)
                .map_err(|e| invalid_argument("name", e))?,
            None => self
                .config
                .queue
                .queue_name()
                .map_err(|e| invalid_argument("queue.name", e))?,
        };

        let queue = self
            .queue_client
            .create_queue(&queue_name, &self.config.queue.attributes())
            .await?;

        if let Some(backends) = &self.in_memory {
            backends.topics.subscribe(&topic_arn(&self.config)?, &queue)?;
        }

        info!(queue = %queue, "Queue ready");
        Ok(queue)
    }

    pub fn producer(&self) -> MessageProducer {
        MessageProducer::new(self.queue_client.clone(), self.publisher.clone())
    }

    pub fn consumer(&self, queue: QueueUrl, max_polls: Option<u64>) -> MessageConsumer {
        let mut config = self.config.consumer.to_consumer_config();
        config.max_polls = max_polls;
        MessageConsumer::with_logging_handler(self.queue_client.clone(), queue, config)
    }
}

fn topic_arn(config: &RelayConfig) -> Result<queue_relay_runtime::TopicArn, CliError> {
    config
        .topic
        .topic_arn()
        .map_err(|e| invalid_argument("topic.arn", e))
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(cli.log_level.as_deref(), cli.json_logs)?;

    let config = load_configuration(&cli)?;
    let relay = Relay::from_config(config)?;

    let (sender, shutdown) = shutdown_channel();
    let signals = spawn_signal_handler(sender);

    let result = execute_command(&cli.command, &relay, shutdown).await;
    signals.abort();
    result
}

/// Initialize logging from `--log-level`, falling back to `RUST_LOG`, then `info`
pub fn initialize_logging(log_level: Option<&str>, json_logs: bool) -> Result<(), CliError> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load configuration and apply command-line overrides
pub fn load_configuration(cli: &Cli) -> Result<RelayConfig, CliError> {
    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if cli.in_memory {
        config.provider = ProviderType::InMemory;
    }

    info!(
        provider = ?config.provider,
        region = %config.aws.region,
        queue = %config.queue.name,
        "Configuration loaded"
    );
    Ok(config)
}

/// Request shutdown on Ctrl+C or SIGTERM
pub fn spawn_signal_handler(sender: ShutdownSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        sender.shutdown();
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), stopping"),
        _ = terminate => info!("Received SIGTERM, stopping"),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute one command against an already wired relay
pub async fn execute_command(
    command: &Commands,
    relay: &Relay,
    shutdown: ShutdownToken,
) -> Result<(), CliError> {
    match command {
        Commands::CreateQueue { name } => execute_create_queue_command(relay, name.as_deref()).await,
        Commands::Send { count } => execute_send_command(relay, *count).await,
        Commands::SendBatch { total, batch_size } => {
            execute_send_batch_command(relay, *total, *batch_size).await
        }
        Commands::Publish { subject, message } => {
            execute_publish_command(relay, subject.as_deref(), message.as_deref()).await
        }
        Commands::Consume { max_polls } => {
            execute_consume_command(relay, *max_polls, shutdown).await
        }
        Commands::Run { max_polls } => execute_run_command(relay, *max_polls, shutdown).await,
        Commands::Config => execute_config_command(relay),
    }
}

async fn execute_create_queue_command(relay: &Relay, name: Option<&str>) -> Result<(), CliError> {
    let queue = relay.ensure_queue(name).await?;
    println!("{}", queue);
    Ok(())
}

async fn execute_send_command(relay: &Relay, count: Option<usize>) -> Result<(), CliError> {
    let count = count.unwrap_or(relay.config.producer.message_count);
    let queue = relay.ensure_queue(None).await?;

    let report = relay.producer().send_n(&queue, count).await;

    match report.failed_count() {
        0 => Ok(()),
        failed => Err(CliError::Incomplete {
            failed,
            total: count,
        }),
    }
}

async fn execute_send_batch_command(
    relay: &Relay,
    total: Option<usize>,
    batch_size: Option<usize>,
) -> Result<(), CliError> {
    let total = total.unwrap_or(relay.config.producer.message_count);
    let batch_size = batch_size.unwrap_or(relay.config.producer.batch_size);
    let queue = relay.ensure_queue(None).await?;

    let report = relay
        .producer()
        .send_batched(&queue, total, batch_size)
        .await?;

    match report.failed_count() {
        0 => Ok(()),
        failed => Err(CliError::Incomplete { failed, total }),
    }
}

async fn execute_publish_command(
    relay: &Relay,
    subject: Option<&str>,
    message: Option<&str>,
) -> Result<(), CliError> {
    // In memory, the subscription only exists once the queue does
    if relay.in_memory.is_some() {
        relay.ensure_queue(None).await?;
    }

    let topic = topic_arn(&relay.config)?;
    let subject = subject.unwrap_or(&relay.config.topic.subject);
    let message = message.unwrap_or(&relay.config.topic.message);

    relay.producer().publish_one(&topic, subject, message).await?;
    Ok(())
}

async fn execute_consume_command(
    relay: &Relay,
    max_polls: Option<u64>,
    shutdown: ShutdownToken,
) -> Result<(), CliError> {
    let queue = relay.ensure_queue(None).await?;
    let mut consumer = relay.consumer(queue, max_polls);

    match consumer.run(shutdown).await {
        Ok(stats) => {
            info!(
                polls = stats.polls,
                received = stats.messages_received,
                deleted = stats.messages_deleted,
                handler_failures = stats.handler_failures,
                delete_failures = stats.delete_failures,
                "Consumer finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Consumer stopped with error");
            Err(e.into())
        }
    }
}

async fn execute_run_command(
    relay: &Relay,
    max_polls: Option<u64>,
    shutdown: ShutdownToken,
) -> Result<(), CliError> {
    let queue = relay.ensure_queue(None).await?;

    let topic = topic_arn(&relay.config)?;
    // A failed publish is reported but does not stop the consumer
    let _ = relay
        .producer()
        .publish_one(&topic, &relay.config.topic.subject, &relay.config.topic.message)
        .await;

    let mut consumer = relay.consumer(queue, max_polls);
    let stats = consumer.run(shutdown).await?;
    info!(
        polls = stats.polls,
        received = stats.messages_received,
        deleted = stats.messages_deleted,
        "Run finished"
    );
    Ok(())
}

fn execute_config_command(relay: &Relay) -> Result<(), CliError> {
    print!("{}", relay.config.to_redacted_toml()?);
    Ok(())
}
