//! Pending-change queue entries

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{BookFields, BookId};
use crate::error::{Error, Result};

/// Opaque identifier of a queue entry (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation waiting to be mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Book was added locally
    Create,
    /// Book fields changed locally
    Update,
    /// Book was tombstoned locally
    Delete,
}

impl ChangeOperation {
    /// Name stored in the queue table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidOperation(other.to_string())),
        }
    }
}

/// A local mutation not yet confirmed by the remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Unique entry identifier
    pub id: EntryId,
    /// Enqueue order
    pub seq: i64,
    /// Book the change applies to
    pub book_id: BookId,
    /// What happened
    pub operation: ChangeOperation,
    /// Field snapshot taken at enqueue time
    pub payload: BookFields,
    /// When the entry was enqueued (Unix ms)
    pub enqueued_at: i64,
    /// Failed push attempts so far
    pub retry_count: u32,
    /// Most recent push failure
    pub last_error: Option<String>,
}

impl PendingChange {
    /// Whether any push of this entry has failed before
    pub const fn has_failed(&self) -> bool {
        self.retry_count > 0
    }
}
