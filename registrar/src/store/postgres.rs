//! PostgreSQL record store.
//!
//! The one-PENDING-per-account rule is a partial unique index:
//!
//! ```sql
//! CREATE UNIQUE INDEX <table>_pending_account_key ON <table> (account_id) WHERE status = 'PENDING'
//! ```
//!
//! A violation of that index (and only that index) is reported as
//! [`StoreError::UniqueViolation`]; every other database error, including
//! other constraint violations, stays a [`StoreError::Database`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

use super::{check_table_name, StoreTransaction, TerminationStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{AccountId, NewTerminationRecord, RecordId, TerminationRecord};

const COLUMNS: &str = "id, account_id, status, reason, created_at, updated_at";

#[derive(Debug)]
struct Schema {
    table: String,
    pending_index: String,
}

impl Schema {
    fn new(table: &str) -> StoreResult<Self> {
        check_table_name(table)?;
        Ok(Self {
            table: table.to_string(),
            pending_index: format!("{table}_pending_account_key"),
        })
    }

    fn ddl(&self) -> [String; 3] {
        let table = &self.table;
        [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    account_id BIGINT NOT NULL,
                    status VARCHAR(20) NOT NULL,
                    reason TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {table} (account_id) WHERE status = 'PENDING'",
                self.pending_index
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_account_idx ON {table} (account_id)"),
        ]
    }

    fn map_write_error(&self, err: sqlx::Error, account_id: AccountId) -> StoreError {
        match &err {
            sqlx::Error::Database(db)
                if db.is_unique_violation()
                    && db.constraint() == Some(self.pending_index.as_str()) =>
            {
                StoreError::UniqueViolation { account_id }
            }
            _ => StoreError::Database(err),
        }
    }
}

fn record_from_row(row: &PgRow) -> StoreResult<TerminationRecord> {
    let status: String = row.try_get("status")?;
    Ok(TerminationRecord {
        id: RecordId(row.try_get("id")?),
        account_id: AccountId(row.try_get("account_id")?),
        status: status.parse()?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Termination records kept in one PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PgTerminationStore {
    pool: PgPool,
    schema: Arc<Schema>,
}

impl PgTerminationStore {
    /// Creates a store over `table`. Does not touch the database.
    pub fn new(pool: PgPool, table: &str) -> StoreResult<Self> {
        Ok(Self {
            pool,
            schema: Arc::new(Schema::new(table)?),
        })
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    /// Creates the table and its indexes if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Ensuring schema for table '{}'", self.schema.table);
        for statement in self.schema.ddl() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TerminationStore for PgTerminationStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> StoreResult<PgTransaction> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
            schema: Arc::clone(&self.schema),
        })
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    schema: Arc<Schema>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn find_pending(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Option<TerminationRecord>> {
        // Row lock keeps concurrent reason updates from overwriting each other.
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE account_id = $1 AND status = 'PENDING' FOR UPDATE",
            self.schema.table
        );
        let row = sqlx::query(&sql)
            .bind(account_id.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_by_account(
        &mut self,
        account_id: AccountId,
    ) -> StoreResult<Vec<TerminationRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE account_id = $1 ORDER BY id",
            self.schema.table
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.0)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&mut self, record: NewTerminationRecord) -> StoreResult<TerminationRecord> {
        let sql = format!(
            "INSERT INTO {} (account_id, status, reason, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             RETURNING {COLUMNS}",
            self.schema.table
        );
        let row = sqlx::query(&sql)
            .bind(record.account_id.0)
            .bind(record.status.as_str())
            .bind(record.reason.as_deref())
            .bind(Utc::now())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| self.schema.map_write_error(e, record.account_id))?;
        let created = record_from_row(&row)?;
        debug!("Inserted record {} into '{}'", created.id, self.schema.table);
        Ok(created)
    }

    async fn update(&mut self, record: &TerminationRecord) -> StoreResult<TerminationRecord> {
        let sql = format!(
            "UPDATE {} SET status = $2, reason = $3, updated_at = $4
             WHERE id = $1
             RETURNING {COLUMNS}",
            self.schema.table
        );
        let row = sqlx::query(&sql)
            .bind(record.id.0)
            .bind(record.status.as_str())
            .bind(record.reason.as_deref())
            .bind(Utc::now())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| self.schema.map_write_error(e, record.account_id))?
            .ok_or_else(|| StoreError::InvalidRow(format!("no record with id {}", record.id)))?;
        record_from_row(&row)
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
