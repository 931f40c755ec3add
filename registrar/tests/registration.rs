//! Registrar behaviour against stores that misbehave in controlled ways.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Barrier;
use termination_registrar::store::{
    MemoryTerminationStore, MemoryTransaction, StoreTransaction, TerminationStore,
};
use termination_registrar::{
    handle_intent, AccountId, NewTerminationRecord, RegistrarError, Registration, StoreError,
    StoreResult, TerminationRecord, TerminationRegistrar,
};
use termination_messages::PayAccountDeleted;

/// Never sees PENDING rows, so every registration goes straight to insert.
/// This reproduces a caller that checked before a concurrent insert committed.
#[derive(Clone, Default)]
struct StaleReadStore(MemoryTerminationStore);

struct StaleReadTx(MemoryTransaction);

#[async_trait]
impl TerminationStore for StaleReadStore {
    type Tx = StaleReadTx;

    async fn begin(&self) -> StoreResult<StaleReadTx> {
        Ok(StaleReadTx(self.0.begin().await?))
    }
}

#[async_trait]
impl StoreTransaction for StaleReadTx {
    async fn find_pending(&mut self, _: AccountId) -> StoreResult<Option<TerminationRecord>> {
        Ok(None)
    }

    async fn find_by_account(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Vec<TerminationRecord>> {
        self.0.find_by_account(account_id).await
    }

    async fn insert(&mut self, record: NewTerminationRecord) -> StoreResult<TerminationRecord> {
        self.0.insert(record).await
    }

    async fn update(&mut self, record: &TerminationRecord) -> StoreResult<TerminationRecord> {
        self.0.update(record).await
    }

    async fn commit(self) -> StoreResult<()> {
        self.0.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.0.rollback().await
    }
}

/// Holds every transaction after its insert until all of them have
/// inserted, so none commits before the others have staged their row.
#[derive(Clone)]
struct InsertBarrierStore {
    inner: MemoryTerminationStore,
    barrier: Arc<Barrier>,
}

impl InsertBarrierStore {
    fn new(parties: usize) -> Self {
        Self {
            inner: MemoryTerminationStore::new(),
            barrier: Arc::new(Barrier::new(parties)),
        }
    }
}

struct InsertBarrierTx {
    inner: MemoryTransaction,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl TerminationStore for InsertBarrierStore {
    type Tx = InsertBarrierTx;

    async fn begin(&self) -> StoreResult<InsertBarrierTx> {
        Ok(InsertBarrierTx {
            inner: self.inner.begin().await?,
            barrier: Arc::clone(&self.barrier),
        })
    }
}

#[async_trait]
impl StoreTransaction for InsertBarrierTx {
    async fn find_pending(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Option<TerminationRecord>> {
        self.inner.find_pending(account_id).await
    }

    async fn find_by_account(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Vec<TerminationRecord>> {
        self.inner.find_by_account(account_id).await
    }

    async fn insert(&mut self, record: NewTerminationRecord) -> StoreResult<TerminationRecord> {
        let inserted = self.inner.insert(record).await?;
        self.barrier.wait().await;
        Ok(inserted)
    }

    async fn update(&mut self, record: &TerminationRecord) -> StoreResult<TerminationRecord> {
        self.inner.update(record).await
    }

    async fn commit(self) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

/// A database that cannot be reached.
struct UnreachableStore;

struct NoTx;

#[async_trait]
impl TerminationStore for UnreachableStore {
    type Tx = NoTx;

    async fn begin(&self) -> StoreResult<NoTx> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[async_trait]
impl StoreTransaction for NoTx {
    async fn find_pending(&mut self, _: AccountId) -> StoreResult<Option<TerminationRecord>> {
        unreachable!()
    }

    async fn find_by_account(&mut self, _: AccountId) -> StoreResult<Vec<TerminationRecord>> {
        unreachable!()
    }

    async fn insert(&mut self, _: NewTerminationRecord) -> StoreResult<TerminationRecord> {
        unreachable!()
    }

    async fn update(&mut self, _: &TerminationRecord) -> StoreResult<TerminationRecord> {
        unreachable!()
    }

    async fn commit(self) -> StoreResult<()> {
        unreachable!()
    }

    async fn rollback(self) -> StoreResult<()> {
        unreachable!()
    }
}

#[tokio::test]
async fn losing_the_insert_race_is_not_an_error() {
    let store = StaleReadStore::default();
    let registrar = TerminationRegistrar::new(store.clone(), "pay");

    let first = registrar.register(AccountId(1), Some("r1")).await.unwrap();
    let second = registrar.register(AccountId(1), Some("r1")).await.unwrap();

    assert!(matches!(first, Registration::Created(_)));
    assert_eq!(second, Registration::LostRace);

    let records = store.0.records(AccountId(1)).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_pending());
}

#[tokio::test]
async fn lost_race_does_not_retry_or_update_reason() {
    let store = StaleReadStore::default();
    let registrar = TerminationRegistrar::new(store.clone(), "pay");

    registrar.register(AccountId(2), Some("first")).await.unwrap();
    let outcome = registrar.register(AccountId(2), Some("second")).await.unwrap();

    assert_eq!(outcome, Registration::LostRace);
    let records = store.0.records(AccountId(2)).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason.as_deref(), Some("first"));
}

#[tokio::test]
async fn conflict_reported_at_commit_is_a_lost_race() {
    let store = InsertBarrierStore::new(2);
    let registrar = TerminationRegistrar::new(store.clone(), "mydata");

    let (a, b) = tokio::join!(
        registrar.register(AccountId(4), Some("PFM_CANCEL")),
        registrar.register(AccountId(4), Some("PFM_CANCEL"))
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let created = outcomes
        .iter()
        .filter(|o| matches!(o, Registration::Created(_)))
        .count();
    let lost = outcomes
        .iter()
        .filter(|o| **o == Registration::LostRace)
        .count();
    assert_eq!((created, lost), (1, 1));

    let records = store.inner.records(AccountId(4)).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_pending());
    assert_eq!(records[0].reason.as_deref(), Some("PFM_CANCEL"));
}

#[tokio::test]
async fn storage_failures_propagate() {
    let registrar = TerminationRegistrar::new(UnreachableStore, "pay");

    let err = registrar.register(AccountId(3), None).await.unwrap_err();
    assert!(matches!(
        err,
        RegistrarError::Storage(StoreError::Database(sqlx::Error::PoolTimedOut))
    ));
}

#[tokio::test]
async fn failed_event_is_reported_to_the_consumer() {
    let registrar = TerminationRegistrar::new(UnreachableStore, "pay");
    let event = PayAccountDeleted {
        uuid: "u-1".to_string(),
        occurred_at: 0,
        pay_account_id: 3,
        reason: None,
    };

    assert!(handle_intent(&registrar, &event).await.is_err());
}
