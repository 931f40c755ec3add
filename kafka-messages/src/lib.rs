//! Typed Kafka messages for account termination intents.
//!
//! This crate provides the core `KafkaMessage` trait that binds a message type
//! to its Kafka topic, the `TerminationIntent` view shared by every inbound
//! termination event, and the two event types the registrar consumes.

use serde::{Deserialize, Serialize};

/// Trait for types that can be sent as Kafka messages.
///
/// Implementors must specify the Kafka topic where messages of this type should be sent.
/// The trait also requires `Serialize` and `Deserialize` for JSON encoding/decoding.
///
/// # Example
///
/// ```
/// use termination_messages::KafkaMessage;
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
/// assert_eq!(AccountClosed::TOPIC, "account.closed");
/// ```
pub trait KafkaMessage: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    /// The Kafka topic where messages of this type should be sent.
    const TOPIC: &'static str;

    /// Partitioning key. Messages for the same key keep their relative order.
    fn key(&self) -> Option<String> {
        None
    }
}

/// What every inbound termination event boils down to.
pub trait TerminationIntent {
    /// The external account the event is about.
    fn account_id(&self) -> i64;

    /// Free-text reason recorded with the termination, if any.
    fn reason(&self) -> Option<&str>;

    /// Whether the event actually requests a termination. Events that
    /// return `false` are acknowledged without touching the store.
    fn is_effective(&self) -> bool;
}

/// Consent change published by the mydata service.
///
/// Only messages with `is_remove` set request a termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentMessage {
    pub data: ConsentData,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentData {
    pub delete_event_type: String,
    pub pay_account_id: i64,
    pub is_remove: bool,
    #[serde(default)]
    pub is_force: bool,
}

impl KafkaMessage for ConsentMessage {
    const TOPIC: &'static str = "mydata.consent.v1";

    fn key(&self) -> Option<String> {
        Some(self.data.pay_account_id.to_string())
    }
}

impl TerminationIntent for ConsentMessage {
    fn account_id(&self) -> i64 {
        self.data.pay_account_id
    }

    fn reason(&self) -> Option<&str> {
        Some(self.data.delete_event_type.as_str())
    }

    fn is_effective(&self) -> bool {
        self.data.is_remove
    }
}

/// Envelope emitted when a pay account is deleted. Every envelope is a
/// termination request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayAccountDeleted {
    pub uuid: String,
    /// Epoch milliseconds.
    pub occurred_at: i64,
    pub pay_account_id: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

impl KafkaMessage for PayAccountDeleted {
    const TOPIC: &'static str = "pay-account.payaccount-deleted.v2";

    fn key(&self) -> Option<String> {
        Some(self.pay_account_id.to_string())
    }
}

impl TerminationIntent for PayAccountDeleted {
    fn account_id(&self) -> i64 {
        self.pay_account_id
    }

    fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    fn is_effective(&self) -> bool {
        true
    }
}
