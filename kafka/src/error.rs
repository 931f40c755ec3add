//! Error types for the Kafka runtime.

use thiserror::Error;

/// Result type alias for Kafka operations.
pub type Result<T> = std::result::Result<T, KafkaError>;

/// Errors that can occur during Kafka operations.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Error from the underlying rdkafka library.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Error serializing a message to JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error deserializing a message from JSON.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Error from a message handler.
    #[error("Handler error: {0}")]
    Handler(String),

    /// A failed message could not be rewound for redelivery.
    #[error("Failed to rewind topic '{topic}' partition {partition} to offset {offset}: {source}")]
    Rewind {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl KafkaError {
    /// Whether processing the same message again can succeed.
    ///
    /// A payload that fails to decode will fail the same way on every
    /// redelivery, so it is not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, KafkaError::Deserialization(_))
    }
}
