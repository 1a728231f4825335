use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] booktracker_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No title provided")]
    EmptyTitle,
    #[error("Book ID cannot be empty")]
    EmptyBookId,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
    #[error(
        "Sync is not configured. Run `booktracker config init --database-id <ID>` and `booktracker auth login --token <TOKEN>`, or set NOTION_DATABASE_ID and NOTION_API_KEY."
    )]
    SyncNotConfigured,
}
