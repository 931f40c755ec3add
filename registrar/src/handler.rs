//! Glue between decoded Kafka messages and the registrars.

use std::collections::HashMap;
use std::sync::Arc;

use termination_kafka::{topic_handlers, HandlerBox};
use termination_messages::{ConsentMessage, PayAccountDeleted, TerminationIntent};
use tracing::{debug, error, info};

use crate::error::RegistrarError;
use crate::model::AccountId;
use crate::registrar::{Registration, TerminationRegistrar};
use crate::store::TerminationStore;

/// What the handler did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event does not request a termination.
    Ignored,
    Registered(Registration),
}

/// Registers the termination an event asks for.
///
/// Returning `Ok` means the event may be acknowledged; an `Err` means it
/// must stay unacknowledged so it is delivered again.
pub async fn handle_intent<M, S>(
    registrar: &TerminationRegistrar<S>,
    message: &M,
) -> Result<Outcome, RegistrarError>
where
    M: TerminationIntent,
    S: TerminationStore,
{
    let account_id = AccountId(message.account_id());

    if !message.is_effective() {
        debug!(
            "Skip {} message for account_id={} because it is not a termination request",
            registrar.channel(),
            account_id
        );
        return Ok(Outcome::Ignored);
    }

    info!(
        "Processing {} termination for account_id={}, reason={:?}",
        registrar.channel(),
        account_id,
        message.reason()
    );

    match registrar.register(account_id, message.reason()).await {
        Ok(registration) => Ok(Outcome::Registered(registration)),
        Err(e) => {
            error!(
                "Failed to process {} message for account_id={}: {}",
                registrar.channel(),
                account_id,
                e
            );
            Err(e)
        }
    }
}

/// Topic handlers for the consumer: consent messages feed `mydata`,
/// pay-account deletions feed `pay`.
pub fn termination_handlers<S>(
    mydata: Arc<TerminationRegistrar<S>>,
    pay: Arc<TerminationRegistrar<S>>,
) -> HashMap<&'static str, HandlerBox>
where
    S: TerminationStore + 'static,
{
    topic_handlers![
        ConsentMessage => move |msg: ConsentMessage| {
            let registrar = Arc::clone(&mydata);
            async move { handle_intent(&registrar, &msg).await.map(|_| ()) }
        },
        PayAccountDeleted => move |msg: PayAccountDeleted| {
            let registrar = Arc::clone(&pay);
            async move { handle_intent(&registrar, &msg).await.map(|_| ()) }
        },
    ]
}
