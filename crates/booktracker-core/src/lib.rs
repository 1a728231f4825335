//! booktracker-core - Core library for booktracker
//!
//! Book models, the local SQLite cache with its pending-change queue, and the
//! sync engine that mirrors the cache to a Notion database.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use db::Database;
pub use error::{Error, Result};
pub use models::{Book, BookFields, BookId, ReadingStatus};
pub use services::Library;
