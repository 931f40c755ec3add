//! Account termination registrar.
//!
//! Consumes termination intents from Kafka and keeps, per account, exactly
//! one PENDING termination record. Duplicate and concurrent deliveries of the
//! same event are absorbed by the store's uniqueness rule: whoever loses the
//! insert race gets [`Registration::LostRace`] and the event is still
//! acknowledged. Any other store failure leaves the event unacknowledged so
//! the broker delivers it again.
//!
//! # Example
//!
//! ```
//! use termination_registrar::store::MemoryTerminationStore;
//! use termination_registrar::{AccountId, Registration, TerminationRegistrar};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), termination_registrar::RegistrarError> {
//! let registrar = TerminationRegistrar::new(MemoryTerminationStore::new(), "mydata");
//!
//! let first = registrar.register(AccountId(42), Some("PFM_CANCEL")).await?;
//! let again = registrar.register(AccountId(42), Some("PFM_CANCEL")).await?;
//!
//! assert!(matches!(first, Registration::Created(_)));
//! assert!(matches!(again, Registration::AlreadyPending(_)));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod registrar;
pub mod store;

pub use error::{RegistrarError, StoreError, StoreResult};
pub use handler::{handle_intent, termination_handlers, Outcome};
pub use model::{AccountId, NewTerminationRecord, RecordId, TerminationRecord, TerminationStatus};
pub use registrar::{Registration, TerminationRegistrar};
