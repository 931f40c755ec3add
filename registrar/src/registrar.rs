//! Idempotent registration of termination requests.

use tracing::{debug, info, warn};

use crate::error::{RegistrarError, StoreError};
use crate::model::{AccountId, NewTerminationRecord, TerminationRecord};
use crate::store::{StoreTransaction, TerminationStore};

/// Outcome of a successful [`TerminationRegistrar::register`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// No PENDING record existed; this call created one.
    Created(TerminationRecord),
    /// A PENDING record existed and its reason was replaced.
    ReasonUpdated(TerminationRecord),
    /// A PENDING record existed and nothing needed to change.
    AlreadyPending(TerminationRecord),
    /// A concurrent caller inserted the PENDING record first.
    LostRace,
}

impl Registration {
    /// Whether this call wrote to the store.
    pub fn is_write(&self) -> bool {
        matches!(self, Registration::Created(_) | Registration::ReasonUpdated(_))
    }
}

/// Keeps at most one PENDING termination record per account.
///
/// The registrar holds no locks and no per-account state. Two callers may
/// both find no PENDING record and both try to insert; the store's
/// uniqueness rule lets exactly one of them through and the other gets
/// [`Registration::LostRace`].
#[derive(Debug, Clone)]
pub struct TerminationRegistrar<S> {
    store: S,
    channel: &'static str,
}

impl<S: TerminationStore> TerminationRegistrar<S> {
    /// `channel` names the event source in logs (e.g. `"mydata"`).
    pub fn new(store: S, channel: &'static str) -> Self {
        Self { store, channel }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Ensures a PENDING record exists for `account_id`.
    ///
    /// An existing PENDING record gets `reason` written to it when `reason`
    /// is `Some` and differs from the stored value; a `None` reason never
    /// clears a stored one. Every call runs in its own transaction and
    /// performs at most one write.
    ///
    /// # Errors
    ///
    /// Any store failure other than losing the insert race. The caller must
    /// not acknowledge the triggering event.
    pub async fn register(
        &self,
        account_id: AccountId,
        reason: Option<&str>,
    ) -> Result<Registration, RegistrarError> {
        let mut tx = self.store.begin().await?;

        if let Some(existing) = tx.find_pending(account_id).await? {
            return match reason {
                Some(reason) if existing.reason.as_deref() != Some(reason) => {
                    let changed = TerminationRecord {
                        reason: Some(reason.to_string()),
                        ..existing
                    };
                    let updated = tx.update(&changed).await?;
                    tx.commit().await?;
                    debug!(
                        "Updated existing {} PENDING record for account_id={} with new reason",
                        self.channel, account_id
                    );
                    Ok(Registration::ReasonUpdated(updated))
                }
                _ => {
                    tx.rollback().await?;
                    debug!(
                        "Skip creating duplicate {} PENDING record for account_id={}",
                        self.channel, account_id
                    );
                    Ok(Registration::AlreadyPending(existing))
                }
            };
        }

        let inserted = match tx.insert(NewTerminationRecord::pending(account_id, reason)).await {
            Ok(record) => record,
            Err(e) if e.is_pending_conflict() => {
                tx.rollback().await?;
                return Ok(self.lost_race(account_id, &e));
            }
            Err(e) => return Err(e.into()),
        };

        match tx.commit().await {
            Ok(()) => {
                info!(
                    "Registered {} termination target. account_id={}, reason={:?}",
                    self.channel, account_id, reason
                );
                Ok(Registration::Created(inserted))
            }
            Err(e) if e.is_pending_conflict() => Ok(self.lost_race(account_id, &e)),
            Err(e) => Err(e.into()),
        }
    }

    fn lost_race(&self, account_id: AccountId, cause: &StoreError) -> Registration {
        warn!(
            "Detected concurrent {} insert for account_id={}, keeping existing record: {}",
            self.channel, account_id, cause
        );
        Registration::LostRace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerminationStatus;
    use crate::store::MemoryTerminationStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn registrar() -> TerminationRegistrar<MemoryTerminationStore> {
        TerminationRegistrar::new(MemoryTerminationStore::new(), "test")
    }

    async fn pending(
        registrar: &TerminationRegistrar<MemoryTerminationStore>,
        account_id: i64,
    ) -> Vec<TerminationRecord> {
        registrar
            .store()
            .records(AccountId(account_id))
            .await
            .into_iter()
            .filter(TerminationRecord::is_pending)
            .collect()
    }

    async fn complete(registrar: &TerminationRegistrar<MemoryTerminationStore>, account_id: i64) {
        let mut tx = registrar.store().begin().await.unwrap();
        let mut record = tx.find_pending(AccountId(account_id)).await.unwrap().unwrap();
        record.status = TerminationStatus::Completed;
        tx.update(&record).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn creates_pending_record() {
        let registrar = registrar();

        let outcome = registrar.register(AccountId(1), Some("PFM_CANCEL")).await.unwrap();
        assert!(matches!(outcome, Registration::Created(_)));

        let records = pending(&registrar, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("PFM_CANCEL"));
    }

    #[tokio::test]
    async fn repeated_registration_is_idempotent() {
        let registrar = registrar();

        for _ in 0..5 {
            registrar.register(AccountId(1), Some("r1")).await.unwrap();
        }

        let records = registrar.store().records(AccountId(1)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("r1"));
        assert!(records[0].is_pending());
    }

    #[tokio::test]
    async fn same_reason_is_a_no_op() {
        let registrar = registrar();
        registrar.register(AccountId(1), Some("r1")).await.unwrap();

        let outcome = registrar.register(AccountId(1), Some("r1")).await.unwrap();
        assert!(matches!(outcome, Registration::AlreadyPending(_)));
        assert!(!outcome.is_write());
    }

    #[tokio::test]
    async fn new_reason_updates_existing_row() {
        let registrar = registrar();
        let first = match registrar.register(AccountId(2), Some("INITIAL")).await.unwrap() {
            Registration::Created(record) => record,
            other => panic!("expected Created, got {:?}", other),
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = registrar.register(AccountId(2), Some("UPDATED")).await.unwrap();

        let updated = match outcome {
            Registration::ReasonUpdated(record) => record,
            other => panic!("expected ReasonUpdated, got {:?}", other),
        };
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.created_at, first.created_at);
        assert!(updated.updated_at > first.updated_at);

        let records = registrar.store().records(AccountId(2)).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("UPDATED"));
    }

    #[tokio::test]
    async fn absent_reason_keeps_stored_reason() {
        let registrar = registrar();
        registrar.register(AccountId(3), Some("r1")).await.unwrap();

        let outcome = registrar.register(AccountId(3), None).await.unwrap();
        assert!(matches!(outcome, Registration::AlreadyPending(_)));

        let records = pending(&registrar, 3).await;
        assert_eq!(records[0].reason.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn reason_fills_in_missing_reason() {
        let registrar = registrar();
        registrar.register(AccountId(4), None).await.unwrap();
        registrar.register(AccountId(4), Some("NEW_REASON")).await.unwrap();

        let records = pending(&registrar, 4).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason.as_deref(), Some("NEW_REASON"));
    }

    #[tokio::test]
    async fn completed_record_allows_new_pending() {
        let registrar = registrar();
        registrar.register(AccountId(5), Some("FIRST")).await.unwrap();
        complete(&registrar, 5).await;

        let outcome = registrar.register(AccountId(5), Some("SECOND")).await.unwrap();
        assert!(matches!(outcome, Registration::Created(_)));

        let records = registrar.store().records(AccountId(5)).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, TerminationStatus::Completed);
        assert_eq!(records[0].reason.as_deref(), Some("FIRST"));
        assert_eq!(records[1].status, TerminationStatus::Pending);
        assert_eq!(records[1].reason.as_deref(), Some("SECOND"));
    }

    #[tokio::test]
    async fn accounts_are_independent() {
        let registrar = registrar();
        registrar.register(AccountId(10), Some("x")).await.unwrap();
        registrar.register(AccountId(11), Some("x")).await.unwrap();

        assert_eq!(pending(&registrar, 10).await.len(), 1);
        assert_eq!(pending(&registrar, 11).await.len(), 1);
        assert_eq!(registrar.store().len().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_leave_one_pending_record() {
        let registrar = Arc::new(registrar());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registrar = Arc::clone(&registrar);
                tokio::spawn(async move { registrar.register(AccountId(20), Some("r1")).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                Registration::Created(_) => created += 1,
                Registration::AlreadyPending(_) | Registration::LostRace => {}
                Registration::ReasonUpdated(_) => panic!("reason never changes"),
            }
        }

        assert_eq!(created, 1);
        let records = registrar.store().records(AccountId(20)).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].is_pending());
    }
}
