//! Error types for booktracker-core

use thiserror::Error;

use crate::sync::ClientError;

/// Result type alias using booktracker-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in booktracker-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Book or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Pending-change operation outside create/update/delete
    #[error("Invalid operation: {0} (expected create, update or delete)")]
    InvalidOperation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote client failure that escaped per-record accounting
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Another sync run holds the run marker for this store
    #[error("A sync run is already in progress (started at {since} ms)")]
    SyncInProgress {
        /// When the active run acquired the marker (Unix ms)
        since: i64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
