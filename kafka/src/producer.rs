//! Type-safe Kafka producer.

use crate::error::{KafkaError, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdProducer};
use rdkafka::ClientConfig;
use std::time::Duration;
use termination_messages::KafkaMessage;
use tracing::{debug, error, info};

/// Type-safe Kafka producer.
///
/// The producer provides a generic `send` method that accepts any type implementing
/// `KafkaMessage`. Messages are serialized to JSON and sent to the topic
/// specified by the message type, keyed by `KafkaMessage::key`.
pub struct Producer {
    inner: FutureProducer,
    delivery_timeout: Duration,
}

impl Producer {
    /// Creates a new Kafka producer.
    ///
    /// # Arguments
    ///
    /// * `brokers` - Comma-separated list of Kafka brokers (e.g., "localhost:9092")
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self> {
        info!("Creating Kafka producer with brokers: {}", brokers);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            inner: producer,
            delivery_timeout: Duration::from_secs(5),
        })
    }

    /// Sends a typed message to Kafka.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or if the message cannot be sent.
    pub async fn send<T: KafkaMessage>(&self, message: &T) -> Result<()> {
        let topic = T::TOPIC;

        let payload = serde_json::to_vec(message)
            .map_err(|e| KafkaError::Serialization(e.to_string()))?;
        let key = message.key();

        debug!(
            "Sending message to topic '{}' with key {:?} ({} bytes)",
            topic,
            key,
            payload.len()
        );

        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(&payload);
        if let Some(key) = key.as_deref() {
            record = record.key(key);
        }

        match self.inner.send(record, self.delivery_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    "Message sent successfully to topic '{}' (partition: {}, offset: {})",
                    topic, partition, offset
                );
                Ok(())
            }
            Err((kafka_err, _msg)) => {
                error!("Failed to send message to topic '{}': {}", topic, kafka_err);
                Err(KafkaError::Kafka(kafka_err))
            }
        }
    }

    /// Flushes any pending messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        RdProducer::flush(&self.inner, timeout)?;
        Ok(())
    }
}
