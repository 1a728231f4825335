//! Database layer for booktracker

mod book_repository;
mod connection;
mod migrations;
mod queue;
mod run_lock;
mod sync_state;

pub use book_repository::{BookRepository, SqliteBookRepository};
pub use connection::Database;
pub use queue::{PendingCursor, PendingQueue, SqlitePendingQueue, DEFAULT_PAGE_SIZE};
pub use run_lock::RunLock;
pub use sync_state::{LastRun, SyncStateStore};
