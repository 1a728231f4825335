//! Data models for booktracker

mod book;
mod pending_change;
mod sync_point;

pub use book::{normalize_isbn, normalize_tags, Book, BookFields, BookId, ReadingStatus};
pub use pending_change::{ChangeOperation, EntryId, PendingChange};
pub use sync_point::SyncPoint;
