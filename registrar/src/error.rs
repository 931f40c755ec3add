//! Error types for the registrar and its record stores.

use thiserror::Error;

use crate::model::AccountId;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a [`TerminationStore`](crate::store::TerminationStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another PENDING record already exists for the account.
    #[error("a PENDING termination already exists for account {account_id}")]
    UniqueViolation { account_id: AccountId },

    /// Any other database failure (connectivity, timeouts, unrelated constraints).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row could not be mapped back to a record.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// Table names are interpolated into SQL and must be plain identifiers.
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
}

impl StoreError {
    /// True when the error is the PENDING-per-account uniqueness rule.
    pub fn is_pending_conflict(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

/// Errors surfaced by [`TerminationRegistrar::register`](crate::TerminationRegistrar::register).
///
/// Losing an insert race is not an error; it is reported as
/// [`Registration::LostRace`](crate::Registration::LostRace).
#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}
