//! Local write path: every book mutation enqueues its pending change in the
//! same transaction.

use crate::db::{BookRepository, Database, PendingQueue, SqliteBookRepository, SqlitePendingQueue};
use crate::error::{Error, Result};
use crate::models::{Book, BookFields, BookId, ChangeOperation};
use crate::util::unix_millis_now;

/// Book operations used by the CLI
pub struct Library<'a> {
    db: &'a Database,
}

impl<'a> Library<'a> {
    /// Create a library over an open database
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Add a new book and queue its creation
    pub fn add_book(&self, fields: BookFields) -> Result<Book> {
        let mut book = Book::new(fields.normalized()?);
        book.local_modified_at = unix_millis_now();

        let tx = self.db.connection().unchecked_transaction()?;
        let stored = SqliteBookRepository::new(&tx).upsert(&book)?;
        SqlitePendingQueue::new(&tx).enqueue(&stored.id, ChangeOperation::Create, &stored.fields)?;
        tx.commit()?;

        tracing::info!(book = %stored.id, "Added {}", stored.label());
        Ok(stored)
    }

    /// Replace a book's fields and queue the update
    pub fn update_book(&self, id: &BookId, fields: BookFields) -> Result<Book> {
        let fields = fields.normalized()?;

        let tx = self.db.connection().unchecked_transaction()?;
        let repo = SqliteBookRepository::new(&tx);
        let mut book = repo
            .get(id)?
            .filter(|book| !book.is_deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        book.fields = fields;
        book.local_modified_at = next_local_timestamp(book.local_modified_at);
        let stored = repo.upsert(&book)?;
        SqlitePendingQueue::new(&tx).enqueue(&stored.id, ChangeOperation::Update, &stored.fields)?;
        tx.commit()?;

        tracing::info!(book = %stored.id, "Updated {}", stored.label());
        Ok(stored)
    }

    /// Tombstone a book and queue the deletion
    pub fn remove_book(&self, id: &BookId) -> Result<Book> {
        let tx = self.db.connection().unchecked_transaction()?;
        let repo = SqliteBookRepository::new(&tx);
        let mut book = repo
            .get(id)?
            .filter(|book| !book.is_deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        book.is_deleted = true;
        book.local_modified_at = next_local_timestamp(book.local_modified_at);
        let stored = repo.upsert(&book)?;
        SqlitePendingQueue::new(&tx).enqueue(&stored.id, ChangeOperation::Delete, &stored.fields)?;
        tx.commit()?;

        tracing::info!(book = %stored.id, "Removed {}", stored.label());
        Ok(stored)
    }

    /// Get a live book by ID
    pub fn get_book(&self, id: &BookId) -> Result<Option<Book>> {
        Ok(SqliteBookRepository::new(self.db.connection())
            .get(id)?
            .filter(|book| !book.is_deleted))
    }

    /// List live books ordered by title
    pub fn list_books(&self) -> Result<Vec<Book>> {
        SqliteBookRepository::new(self.db.connection()).list(false)
    }

    /// Resolve a full id or a unique id prefix to a book
    pub fn resolve_id(&self, raw: &str) -> Result<BookId> {
        if let Ok(id) = raw.trim().parse::<BookId>() {
            return Ok(id);
        }

        let matches = SqliteBookRepository::new(self.db.connection()).find_by_id_prefix(raw)?;
        match matches.as_slice() {
            [] => Err(Error::NotFound(raw.to_string())),
            [book] => Ok(book.id),
            _ => Err(Error::InvalidInput(format!(
                "Book id prefix '{raw}' is ambiguous ({} matches)",
                matches.len()
            ))),
        }
    }
}

/// A local timestamp strictly newer than `previous`
fn next_local_timestamp(previous: i64) -> i64 {
    unix_millis_now().max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadingStatus;
    use pretty_assertions::assert_eq;

    fn fields(title: &str) -> BookFields {
        BookFields::new(title, "N. K. Jemisin").unwrap()
    }

    #[test]
    fn test_add_enqueues_create() {
        let db = Database::open_in_memory().unwrap();
        let library = Library::new(&db);

        let book = library.add_book(fields("The Fifth Season")).unwrap();

        let queue = SqlitePendingQueue::new(db.connection());
        let pending = queue.pending_for(&book.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, ChangeOperation::Create);
        assert_eq!(pending[0].payload, book.fields);
    }

    #[test]
    fn test_update_bumps_local_timestamp_and_enqueues() {
        let db = Database::open_in_memory().unwrap();
        let library = Library::new(&db);
        let book = library.add_book(fields("The Obelisk Gate")).unwrap();

        let mut changed = book.fields.clone();
        changed.status = ReadingStatus::Reading;
        let updated = library.update_book(&book.id, changed).unwrap();

        assert!(updated.local_modified_at > book.local_modified_at);
        assert_eq!(updated.fields.status, ReadingStatus::Reading);

        let ops: Vec<_> = SqlitePendingQueue::new(db.connection())
            .pending_for(&book.id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.operation)
            .collect();
        assert_eq!(ops, vec![ChangeOperation::Create, ChangeOperation::Update]);
    }

    #[test]
    fn test_invalid_update_leaves_no_trace() {
        let db = Database::open_in_memory().unwrap();
        let library = Library::new(&db);
        let book = library.add_book(fields("The Stone Sky")).unwrap();

        let mut invalid = book.fields.clone();
        invalid.rating = Some(9);
        assert!(library.update_book(&book.id, invalid).is_err());

        assert_eq!(SqlitePendingQueue::new(db.connection()).count().unwrap(), 1);
        assert_eq!(library.get_book(&book.id).unwrap(), Some(book));
    }

    #[test]
    fn test_remove_tombstones_and_enqueues_delete() {
        let db = Database::open_in_memory().unwrap();
        let library = Library::new(&db);
        let book = library.add_book(fields("The City We Became")).unwrap();

        let removed = library.remove_book(&book.id).unwrap();
        assert!(removed.is_deleted);
        assert!(library.get_book(&book.id).unwrap().is_none());
        assert!(library.list_books().unwrap().is_empty());
        assert!(matches!(
            library.remove_book(&book.id),
            Err(Error::NotFound(_))
        ));

        let last = SqlitePendingQueue::new(db.connection())
            .pending_for(&book.id)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(last.operation, ChangeOperation::Delete);
    }

    #[test]
    fn test_resolve_id_by_prefix() {
        let db = Database::open_in_memory().unwrap();
        let library = Library::new(&db);
        let book = library.add_book(fields("The Killing Moon")).unwrap();

        let full = book.id.as_str();
        assert_eq!(library.resolve_id(&full).unwrap(), book.id);
        assert_eq!(library.resolve_id(&full[..13]).unwrap(), book.id);
        assert!(matches!(
            library.resolve_id("ffffffff"),
            Err(Error::NotFound(_))
        ));
    }
}
