//! Record store abstraction.
//!
//! A store hands out transactions; every registration runs inside exactly
//! one of them. The store itself enforces that an account has at most one
//! PENDING record and reports a breach as [`StoreError::UniqueViolation`],
//! either from `insert`/`update` or, for stores that defer the check, from
//! `commit`.

mod memory;
mod postgres;

pub use memory::{MemoryTerminationStore, MemoryTransaction};
pub use postgres::{PgTerminationStore, PgTransaction};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::model::{AccountId, NewTerminationRecord, TerminationRecord};

#[async_trait]
pub trait TerminationStore: Send + Sync {
    type Tx: StoreTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// The PENDING record for `account_id`, if one exists.
    async fn find_pending(&mut self, account_id: AccountId)
        -> StoreResult<Option<TerminationRecord>>;

    /// Every record for `account_id`, oldest first.
    async fn find_by_account(&mut self, account_id: AccountId)
        -> StoreResult<Vec<TerminationRecord>>;

    /// Persists a new record and returns it with its assigned id and timestamps.
    async fn insert(&mut self, record: NewTerminationRecord) -> StoreResult<TerminationRecord>;

    /// Writes `status` and `reason` of an existing record and bumps `updated_at`.
    async fn update(&mut self, record: &TerminationRecord) -> StoreResult<TerminationRecord>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

/// Leaves room for index-name suffixes under PostgreSQL's 63-byte identifier limit.
pub(crate) const MAX_TABLE_NAME_LEN: usize = 40;

/// Validates a table name before it is spliced into SQL.
pub(crate) fn check_table_name(table: &str) -> StoreResult<()> {
    let mut chars = table.chars();
    let valid_start = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if valid_start
        && table.len() <= MAX_TABLE_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{check_table_name, MAX_TABLE_NAME_LEN};

    #[test]
    fn table_names_must_be_identifiers() {
        assert!(check_table_name("mydata_terminate_user").is_ok());
        assert!(check_table_name("_t1").is_ok());
        assert!(check_table_name("").is_err());
        assert!(check_table_name("1table").is_err());
        assert!(check_table_name("users; drop table users").is_err());
        assert!(check_table_name(&"x".repeat(MAX_TABLE_NAME_LEN + 1)).is_err());
    }
}
