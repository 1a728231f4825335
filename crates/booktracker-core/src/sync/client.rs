//! Remote client boundary: one attempt per call, typed failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Book, BookFields, BookId};

/// Failure of a single remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote asked us to slow down
    #[error("Rate limited by remote{}", format_retry_after(.retry_after))]
    RateLimited {
        /// Server-provided wait before the next request
        retry_after: Option<Duration>,
    },

    /// Timeouts, connection failures, 5xx and similar
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// The request can never succeed as sent
    #[error("Remote rejected request: {0}")]
    Permanent(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|wait| format!(" (retry after {}s)", wait.as_secs_f64()))
        .unwrap_or_default()
}

impl RemoteError {
    /// Whether another attempt may succeed
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Failure surfaced by [`super::RetryingClient`] after the retry machine settles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Every attempt failed with a retryable error
    #[error("Sync failed after {attempts} attempts: {last}")]
    SyncFailed {
        /// Attempts made, including the first
        attempts: u32,
        /// Error of the final attempt
        #[source]
        last: RemoteError,
    },

    /// Non-retryable rejection, surfaced on the first occurrence
    #[error("Remote rejected request: {0}")]
    Permanent(String),
}

impl ClientError {
    /// Whether the failure means the remote could not be reached at all
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::SyncFailed { .. })
    }
}

/// Server confirmation of a push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    /// Remote record identifier
    pub remote_id: String,
    /// Server modification time after the write (Unix ms)
    pub modified_at: i64,
}

/// A remote record mapped into local shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBook {
    /// Remote record identifier
    pub remote_id: String,
    /// Local id stamped on the record when it was created from this store
    pub local_id: Option<BookId>,
    /// Mapped payload
    pub fields: BookFields,
    /// Server modification time (Unix ms)
    pub modified_at: i64,
    /// Record was archived (deleted) remotely
    pub archived: bool,
}

/// One page of a pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemotePage {
    /// Records in modification order
    pub records: Vec<RemoteBook>,
    /// Cursor for the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

/// Adapter over the remote database of record
#[allow(async_fn_in_trait)]
pub trait RemoteClient {
    /// Mirror a book: create when it has no remote id, update otherwise,
    /// archive when it is a tombstone.
    ///
    /// Creation is idempotent: a record already carrying the book's local id
    /// is updated instead of duplicated.
    async fn push(&self, book: &Book) -> Result<RemoteRef, RemoteError>;

    /// Records modified at or after `since` (Unix ms), oldest first
    async fn pull_page(&self, since: i64, cursor: Option<&str>)
        -> Result<RemotePage, RemoteError>;

    /// A single record, `None` when the remote does not know it
    async fn fetch(&self, remote_id: &str) -> Result<Option<RemoteBook>, RemoteError>;
}
