//! Kafka consumer with topic-based routing and commit-on-success.
//!
//! An offset is committed only after its handler returned `Ok`. Handler
//! failures are retried in place with exponential backoff; once the retry
//! budget is spent the offset stays uncommitted and the partition is rewound
//! to it, so the broker delivers the message again. If the rewind itself
//! fails the consumer leaves the group and [`Consumer::run`] returns the
//! error; the partition then resumes from its last committed offset.

use crate::error::{KafkaError, Result};
use rdkafka::consumer::{CommitMode, Consumer as RdConsumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Type alias for message handlers.
///
/// Handlers are async functions that take a message payload and return a Result.
pub type HandlerBox = Box<
    dyn Fn(&[u8]) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync,
>;

/// Configuration for the Kafka consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Comma-separated list of Kafka brokers.
    pub brokers: String,

    /// Consumer group ID.
    pub group_id: String,

    /// Maximum number of in-place retries before the message is handed
    /// back to the broker for redelivery.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub initial_backoff: Duration,

    /// Maximum backoff duration for retries.
    pub max_backoff: Duration,

    /// Where to start when the group has no committed offset.
    pub auto_offset_reset: String,

    /// Session timeout handed to librdkafka.
    pub session_timeout: Duration,
}

impl ConsumerConfig {
    /// Creates a new consumer configuration.
    ///
    /// # Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers
    /// * `group_id` - Consumer group ID
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            auto_offset_reset: "earliest".to_string(),
            session_timeout: Duration::from_secs(6),
        }
    }

    /// Sets the maximum number of retry attempts.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial backoff duration.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Sets the maximum backoff duration.
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Sets `auto.offset.reset` (`earliest` or `latest`).
    pub fn with_auto_offset_reset(mut self, reset: impl Into<String>) -> Self {
        self.auto_offset_reset = reset.into();
        self
    }

    /// Sets the group session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Backoff to wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |backoff| backoff.min(self.max_backoff))
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        client_config
    }
}

/// What happened to a message once its handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Offset committed.
    Acknowledged,
    /// Poison message: logged and committed so the partition can move on.
    Skipped,
    /// Offset left uncommitted and the partition rewound to it.
    Redeliver,
}

impl Disposition {
    /// Maps a final handler outcome to what the consumer does with the offset.
    pub fn of(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => Disposition::Acknowledged,
            Err(e) if e.is_retryable() => Disposition::Redeliver,
            Err(_) => Disposition::Skipped,
        }
    }
}

/// Turns a failed rewind into an error that stops the consumer. Reading on
/// past the failed offset would let a later commit acknowledge it.
fn rewound(seek: KafkaResult<()>, topic: &str, partition: i32, offset: i64) -> Result<()> {
    seek.map_err(|source| KafkaError::Rewind {
        topic: topic.to_string(),
        partition,
        offset,
        source,
    })
}

/// Kafka consumer with topic-based message routing.
///
/// The consumer routes messages to handlers based on their topic using a HashMap.
/// Offsets are committed manually once a handler succeeds; failing handlers
/// are retried with exponential backoff and then redelivered.
pub struct Consumer {
    inner: StreamConsumer,
    handlers: HashMap<&'static str, HandlerBox>,
    config: ConsumerConfig,
    shutdown: Arc<RwLock<bool>>,
}

impl Consumer {
    /// Creates a new Kafka consumer with topic handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created.
    pub fn new(
        config: ConsumerConfig,
        handlers: HashMap<&'static str, HandlerBox>,
    ) -> Result<Self> {
        info!(
            "Creating Kafka consumer with brokers: {}, group: {}",
            config.brokers, config.group_id
        );

        let consumer: StreamConsumer = config.client_config().create()?;

        Ok(Self {
            inner: consumer,
            handlers,
            config,
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Subscribes to all topics that have registered handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if subscription fails.
    pub fn subscribe(&self) -> Result<()> {
        let topics: Vec<&str> = self.handlers.keys().copied().collect();
        if topics.is_empty() {
            return Err(KafkaError::Other("no topic handlers registered".to_string()));
        }
        info!("Subscribing to topics: {:?}", topics);

        self.inner.subscribe(&topics)?;
        Ok(())
    }

    /// Starts consuming messages.
    ///
    /// This method will run until shutdown is requested through a [`ShutdownHandle`].
    ///
    /// # Errors
    ///
    /// Returns an error if consumption fails critically.
    pub async fn run(&self) -> Result<()> {
        info!("Starting consumer loop");

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping consumer");
                break;
            }

            match tokio::time::timeout(Duration::from_secs(1), self.inner.recv()).await {
                Ok(Ok(message)) => {
                    if let Err(e) = self.dispatch(&message).await {
                        // Committed offsets are the only safe resume point now.
                        error!("Stopping consumer: {}", e);
                        self.inner.unsubscribe();
                        return Err(e);
                    }
                }
                Ok(Err(e)) => {
                    error!("Error receiving message: {}", e);
                    sleep(Duration::from_secs(1)).await;
                }
                Err(_) => continue,
            }
        }

        info!("Consumer stopped");
        Ok(())
    }

    async fn dispatch(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let topic = message.topic();
        let partition = message.partition();
        let offset = message.offset();

        debug!(
            "Received message from topic '{}' (partition: {}, offset: {})",
            topic, partition, offset
        );

        let Some(handler) = self.handlers.get(topic) else {
            warn!("No handler registered for topic '{}'", topic);
            self.commit(message);
            return Ok(());
        };

        let Some(payload) = message.payload() else {
            warn!("Received message with no payload from topic '{}'", topic);
            self.commit(message);
            return Ok(());
        };

        let outcome = self.process_with_retry(handler, payload).await;
        match Disposition::of(&outcome) {
            Disposition::Acknowledged => self.commit(message),
            Disposition::Skipped => {
                if let Err(e) = &outcome {
                    error!(
                        "Dropping unprocessable message from topic '{}' (partition: {}, offset: {}): {}",
                        topic, partition, offset, e
                    );
                }
                self.commit(message);
            }
            Disposition::Redeliver => {
                if let Err(e) = &outcome {
                    error!(
                        "Failed to process message from topic '{}' (partition: {}, offset: {}) after retries, leaving it unacknowledged: {}",
                        topic, partition, offset, e
                    );
                }
                let seek = self.inner.seek(
                    topic,
                    partition,
                    Offset::Offset(offset),
                    Duration::from_secs(5),
                );
                return rewound(seek, topic, partition, offset);
            }
        }
        Ok(())
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.inner.commit_message(message, CommitMode::Async) {
            error!("Failed to commit offset: {}", e);
        }
    }

    /// Processes a message with retry logic and exponential backoff.
    async fn process_with_retry(&self, handler: &HandlerBox, payload: &[u8]) -> Result<()> {
        let mut attempt = 0;

        loop {
            match handler(payload).await {
                Ok(()) => {
                    if attempt > 0 {
                        info!("Message processed successfully after {} retries", attempt);
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;

                    if attempt > self.config.max_retries {
                        return Err(e);
                    }

                    let backoff = self.config.backoff_for(attempt);
                    warn!(
                        "Error processing message (attempt {}/{}): {}. Retrying in {:?}",
                        attempt, self.config.max_retries, e, backoff
                    );

                    sleep(backoff).await;
                }
            }
        }
    }

    /// Returns a shutdown handle that can be used to signal shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

/// Handle for requesting consumer shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<RwLock<bool>>,
}

impl ShutdownHandle {
    /// Requests a graceful shutdown of the consumer.
    pub async fn shutdown(&self) {
        info!("Requesting consumer shutdown via handle");
        let mut shutdown = self.shutdown.write().await;
        *shutdown = true;
    }
}
