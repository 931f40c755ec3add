//! Type-safe Kafka producer and consumer runtime.
//!
//! This crate provides typed Kafka operations built on top of `rdkafka` and `tokio`.
//!
//! # Features
//!
//! - Type-safe producer with `send<T: KafkaMessage>(&T)` API
//! - Consumer with topic-based routing using `HashMap<&'static str, HandlerBox>`
//! - `topic_handlers!` macro for handler registration
//! - JSON serialization/deserialization
//! - Commit only on success; failed messages are retried with backoff and
//!   then left unacknowledged for redelivery
//! - Graceful shutdown support
//! - Integrated tracing

mod consumer;
mod error;
mod producer;

pub use consumer::{Consumer, ConsumerConfig, Disposition, HandlerBox, ShutdownHandle};
pub use error::{KafkaError, Result};
pub use producer::Producer;

/// Re-export the message traits for convenience
pub use termination_messages::{KafkaMessage, TerminationIntent};

/// Macro to create a HashMap of topic handlers for the Consumer.
///
/// Each handler receives the decoded message and returns a `Result` whose
/// error implements `Display`. The calling crate must depend on `serde_json`.
///
/// # Example
///
/// ```no_run
/// use termination_kafka::{topic_handlers, KafkaMessage};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct AccountClosed {
///     account_id: i64,
/// }
///
/// impl KafkaMessage for AccountClosed {
///     const TOPIC: &'static str = "account.closed";
/// }
///
/// async fn handle_account_closed(msg: AccountClosed) -> Result<(), std::io::Error> {
///     println!("Account closed: {:?}", msg);
///     Ok(())
/// }
///
/// let handlers = topic_handlers![
///     AccountClosed => handle_account_closed,
/// ];
/// assert!(handlers.contains_key("account.closed"));
/// ```
#[macro_export]
macro_rules! topic_handlers {
    ($($msg_type:ty => $handler:expr),* $(,)?) => {{
        let mut map: ::std::collections::HashMap<
            &'static str,
            $crate::HandlerBox,
        > = ::std::collections::HashMap::new();
        $(
            let handler = ::std::sync::Arc::new($handler);
            map.insert(
                <$msg_type as $crate::KafkaMessage>::TOPIC,
                Box::new(move |payload: &[u8]| {
                    let handler = ::std::sync::Arc::clone(&handler);
                    let payload = payload.to_vec();
                    Box::pin(async move {
                        let msg: $msg_type = ::serde_json::from_slice(&payload)
                            .map_err(|e| $crate::KafkaError::Deserialization(e.to_string()))?;
                        handler(msg).await
                            .map_err(|e| $crate::KafkaError::Handler(e.to_string()))
                    })
                })
            );
        )*
        map
    }};
}
