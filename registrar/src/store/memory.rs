//! In-process record store.
//!
//! Writes are staged per transaction and applied on commit. The PENDING rule
//! is checked when a write is staged and again when it is committed, so two
//! transactions that both saw "no PENDING row" cannot both commit one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{StoreTransaction, TerminationStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{AccountId, NewTerminationRecord, RecordId, TerminationRecord};

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<RecordId, TerminationRecord>,
}

/// Committed rows with this transaction's staged writes laid over them.
fn visible<'a>(
    rows: &'a BTreeMap<RecordId, TerminationRecord>,
    staged: &'a BTreeMap<RecordId, TerminationRecord>,
) -> impl Iterator<Item = &'a TerminationRecord> {
    rows.values()
        .filter(move |row| !staged.contains_key(&row.id))
        .chain(staged.values())
}

fn pending_conflict<'a>(
    mut rows: impl Iterator<Item = &'a TerminationRecord>,
    candidate: &TerminationRecord,
) -> bool {
    candidate.is_pending()
        && rows.any(|row| {
            row.id != candidate.id && row.account_id == candidate.account_id && row.is_pending()
        })
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTerminationStore {
    table: Arc<Mutex<Table>>,
}

impl MemoryTerminationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed records for `account_id`, oldest first.
    pub async fn records(&self, account_id: AccountId) -> Vec<TerminationRecord> {
        let table = self.table.lock().await;
        table
            .rows
            .values()
            .filter(|row| row.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Number of committed records across all accounts.
    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TerminationStore for MemoryTerminationStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            table: Arc::clone(&self.table),
            staged: BTreeMap::new(),
        })
    }
}

pub struct MemoryTransaction {
    table: Arc<Mutex<Table>>,
    staged: BTreeMap<RecordId, TerminationRecord>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_pending(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Option<TerminationRecord>> {
        let table = self.table.lock().await;
        let found = visible(&table.rows, &self.staged)
            .find(|row| row.account_id == account_id && row.is_pending())
            .cloned();
        Ok(found)
    }

    async fn find_by_account(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Vec<TerminationRecord>> {
        let table = self.table.lock().await;
        let mut records: Vec<_> = visible(&table.rows, &self.staged)
            .filter(|row| row.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|row| row.id);
        Ok(records)
    }

    async fn insert(&mut self, record: NewTerminationRecord) -> StoreResult<TerminationRecord> {
        let mut table = self.table.lock().await;
        // Ids are consumed even if the transaction never commits.
        table.next_id += 1;
        let now = Utc::now();
        let created = TerminationRecord {
            id: RecordId(table.next_id),
            account_id: record.account_id,
            status: record.status,
            reason: record.reason,
            created_at: now,
            updated_at: now,
        };

        if pending_conflict(visible(&table.rows, &self.staged), &created) {
            return Err(StoreError::UniqueViolation {
                account_id: created.account_id,
            });
        }

        self.staged.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(&mut self, record: &TerminationRecord) -> StoreResult<TerminationRecord> {
        let table = self.table.lock().await;
        let current = visible(&table.rows, &self.staged)
            .find(|row| row.id == record.id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRow(format!("no record with id {}", record.id)))?;

        let updated = TerminationRecord {
            status: record.status,
            reason: record.reason.clone(),
            updated_at: Utc::now(),
            ..current
        };

        if pending_conflict(visible(&table.rows, &self.staged), &updated) {
            return Err(StoreError::UniqueViolation {
                account_id: updated.account_id,
            });
        }

        self.staged.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn commit(self) -> StoreResult<()> {
        let mut table = self.table.lock().await;
        for candidate in self.staged.values() {
            if pending_conflict(visible(&table.rows, &self.staged), candidate) {
                return Err(StoreError::UniqueViolation {
                    account_id: candidate.account_id,
                });
            }
        }
        table.rows.extend(self.staged);
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
