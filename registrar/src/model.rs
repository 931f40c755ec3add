//! Termination records and their identifiers.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Identifier of the external account being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId(id)
    }
}

/// Surrogate key assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationStatus {
    /// Accepted, waiting for the completion process.
    Pending,
    /// Termination finished.
    Completed,
}

impl TerminationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationStatus::Pending => "PENDING",
            TerminationStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TerminationStatus::Pending),
            "COMPLETED" => Ok(TerminationStatus::Completed),
            other => Err(StoreError::InvalidRow(format!(
                "unknown termination status '{other}'"
            ))),
        }
    }
}

/// A persisted termination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationRecord {
    pub id: RecordId,
    pub account_id: AccountId,
    pub status: TerminationStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TerminationRecord {
    pub fn is_pending(&self) -> bool {
        self.status == TerminationStatus::Pending
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTerminationRecord {
    pub account_id: AccountId,
    pub status: TerminationStatus,
    pub reason: Option<String>,
}

impl NewTerminationRecord {
    pub fn pending(account_id: AccountId, reason: Option<&str>) -> Self {
        Self {
            account_id,
            status: TerminationStatus::Pending,
            reason: reason.map(str::to_owned),
        }
    }
}
