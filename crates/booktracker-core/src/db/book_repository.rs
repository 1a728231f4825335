//! Book store implementation

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{Book, BookFields, BookId, SyncPoint};

const BOOK_COLUMNS: &str = "id, remote_id, title, author, status, rating, isbn, isbn13, \
     page_count, progress, date_started, date_finished, tags, \
     local_modified_at, remote_modified_at, is_deleted";

/// Trait for book storage operations
pub trait BookRepository {
    /// Get a book by ID, tombstones included
    fn get(&self, id: &BookId) -> Result<Option<Book>>;

    /// Insert or replace a book.
    ///
    /// Both timestamps only ever move forward, and a stored remote reference
    /// is never cleared. Returns the row as stored.
    fn upsert(&self, book: &Book) -> Result<Book>;

    /// Tombstone a book and bump its local modification time
    fn delete(&self, id: &BookId) -> Result<Book>;

    /// Last sync point of a book, `(0, 0)` when it never synced
    fn get_last_sync_point(&self, id: &BookId) -> Result<SyncPoint>;

    /// Persist the sync point of a book
    fn set_last_sync_point(&self, id: &BookId, local_ts: i64, remote_ts: i64) -> Result<()>;

    /// Find the book mirrored by a remote record
    fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Book>>;

    /// Find a live, never-pushed book carrying the given ISBN-10 or ISBN-13
    fn find_by_isbn(&self, isbn: &str) -> Result<Option<Book>>;

    /// List books ordered by title
    fn list(&self, include_deleted: bool) -> Result<Vec<Book>>;

    /// Books whose id starts with the given prefix
    fn find_by_id_prefix(&self, prefix: &str) -> Result<Vec<Book>>;
}

/// `SQLite` implementation of `BookRepository`
pub struct SqliteBookRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBookRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a book from a database row
    fn parse_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        let id: String = row.get(0)?;
        let status: String = row.get(4)?;
        let tags: String = row.get(12)?;

        Ok(Book {
            id: id.parse().map_err(|e| conversion_error(0, e))?,
            remote_id: row.get(1)?,
            fields: BookFields {
                title: row.get(2)?,
                author: row.get(3)?,
                status: status.parse().map_err(|e| conversion_error(4, e))?,
                rating: row.get(5)?,
                isbn: row.get(6)?,
                isbn13: row.get(7)?,
                page_count: row.get(8)?,
                progress: row.get(9)?,
                date_started: parse_date(row, 10)?,
                date_finished: parse_date(row, 11)?,
                tags: serde_json::from_str(&tags).map_err(|e| conversion_error(12, e))?,
            },
            local_modified_at: row.get(13)?,
            remote_modified_at: row.get(14)?,
            is_deleted: row.get::<_, i32>(15)? != 0,
        })
    }

    fn query_one(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Book>> {
        Ok(self
            .conn
            .query_row(sql, params, Self::parse_book)
            .optional()?)
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

impl BookRepository for SqliteBookRepository<'_> {
    fn get(&self, id: &BookId) -> Result<Option<Book>> {
        self.query_one(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?"),
            params![id.as_str()],
        )
    }

    fn upsert(&self, book: &Book) -> Result<Book> {
        let fields = &book.fields;
        self.conn.execute(
            "INSERT INTO books (
                id, remote_id, title, author, status, rating, isbn, isbn13,
                page_count, progress, date_started, date_finished, tags,
                local_modified_at, remote_modified_at, is_deleted
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                remote_id = COALESCE(excluded.remote_id, books.remote_id),
                title = excluded.title,
                author = excluded.author,
                status = excluded.status,
                rating = excluded.rating,
                isbn = excluded.isbn,
                isbn13 = excluded.isbn13,
                page_count = excluded.page_count,
                progress = excluded.progress,
                date_started = excluded.date_started,
                date_finished = excluded.date_finished,
                tags = excluded.tags,
                local_modified_at = MAX(books.local_modified_at, excluded.local_modified_at),
                remote_modified_at = MAX(books.remote_modified_at, excluded.remote_modified_at),
                is_deleted = excluded.is_deleted",
            params![
                book.id.as_str(),
                book.remote_id,
                fields.title,
                fields.author,
                fields.status.as_str(),
                fields.rating,
                fields.isbn,
                fields.isbn13,
                fields.page_count,
                fields.progress,
                format_date(fields.date_started),
                format_date(fields.date_finished),
                serde_json::to_string(&fields.tags)?,
                book.local_modified_at,
                book.remote_modified_at,
                i32::from(book.is_deleted),
            ],
        )?;

        self.get(&book.id)?
            .ok_or_else(|| Error::NotFound(book.id.to_string()))
    }

    fn delete(&self, id: &BookId) -> Result<Book> {
        let now = crate::util::unix_millis_now();

        let rows = self.conn.execute(
            "UPDATE books
             SET is_deleted = 1, local_modified_at = MAX(local_modified_at, ?)
             WHERE id = ? AND is_deleted = 0",
            params![now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn get_last_sync_point(&self, id: &BookId) -> Result<SyncPoint> {
        let point = self
            .conn
            .query_row(
                "SELECT local_ts, remote_ts FROM sync_points WHERE book_id = ?",
                params![id.as_str()],
                |row| Ok(SyncPoint::new(row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(point.unwrap_or_default())
    }

    fn set_last_sync_point(&self, id: &BookId, local_ts: i64, remote_ts: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_points (book_id, local_ts, remote_ts) VALUES (?, ?, ?)
             ON CONFLICT(book_id) DO UPDATE SET
                local_ts = excluded.local_ts,
                remote_ts = excluded.remote_ts",
            params![id.as_str(), local_ts, remote_ts],
        )?;
        Ok(())
    }

    fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<Book>> {
        self.query_one(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE remote_id = ?"),
            params![remote_id],
        )
    }

    fn find_by_isbn(&self, isbn: &str) -> Result<Option<Book>> {
        self.query_one(
            &format!(
                "SELECT {BOOK_COLUMNS} FROM books
                 WHERE remote_id IS NULL AND is_deleted = 0 AND (isbn = ?1 OR isbn13 = ?1)
                 ORDER BY local_modified_at DESC
                 LIMIT 1"
            ),
            params![isbn],
        )
    }

    fn list(&self, include_deleted: bool) -> Result<Vec<Book>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BOOK_COLUMNS} FROM books
             WHERE ?1 OR is_deleted = 0
             ORDER BY title COLLATE NOCASE, id"
        ))?;

        let books = stmt
            .query_map(params![include_deleted], Self::parse_book)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(books)
    }

    fn find_by_id_prefix(&self, prefix: &str) -> Result<Vec<Book>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(Error::InvalidInput("Book id prefix cannot be empty".to_string()));
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE substr(id, 1, ?1) = ?2 ORDER BY id"
        ))?;

        let books = stmt
            .query_map(
                params![i64::try_from(prefix.len()).unwrap_or(i64::MAX), prefix],
                Self::parse_book,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(books)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ReadingStatus;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn sample_book(title: &str) -> Book {
        let mut book = Book::new(BookFields::new(title, "Ursula K. Le Guin").unwrap());
        book.local_modified_at = 1_000;
        book
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let mut book = sample_book("The Dispossessed");
        book.fields.status = ReadingStatus::Completed;
        book.fields.rating = Some(5);
        book.fields.isbn13 = Some("9780061054884".to_string());
        book.fields.tags = vec!["classics".to_string(), "scifi".to_string()];
        book.fields.date_finished = NaiveDate::from_ymd_opt(2024, 3, 9);

        let stored = repo.upsert(&book).unwrap();
        assert_eq!(stored, book);
        assert_eq!(repo.get(&book.id).unwrap(), Some(book));
    }

    #[test]
    fn test_get_nonexistent() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        assert!(repo.get(&BookId::new()).unwrap().is_none());
    }

    #[test]
    fn test_upsert_timestamps_never_move_backwards() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let mut book = sample_book("Lathe of Heaven");
        book.remote_modified_at = 500;
        repo.upsert(&book).unwrap();

        book.local_modified_at = 10;
        book.remote_modified_at = 20;
        book.fields.progress = Some("p. 40".to_string());
        let stored = repo.upsert(&book).unwrap();

        assert_eq!(stored.local_modified_at, 1_000);
        assert_eq!(stored.remote_modified_at, 500);
        assert_eq!(stored.fields.progress.as_deref(), Some("p. 40"));
    }

    #[test]
    fn test_upsert_keeps_remote_id() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let mut book = sample_book("Always Coming Home");
        book.remote_id = Some("page-1".to_string());
        repo.upsert(&book).unwrap();

        book.remote_id = None;
        let stored = repo.upsert(&book).unwrap();
        assert_eq!(stored.remote_id.as_deref(), Some("page-1"));
    }

    #[test]
    fn test_delete_tombstones() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let book = sample_book("Tehanu");
        repo.upsert(&book).unwrap();

        let deleted = repo.delete(&book.id).unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.local_modified_at >= book.local_modified_at);

        assert!(repo.list(false).unwrap().is_empty());
        assert_eq!(repo.list(true).unwrap().len(), 1);
        assert!(matches!(repo.delete(&book.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sync_point_defaults_to_zero() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());
        let id = BookId::new();

        assert_eq!(repo.get_last_sync_point(&id).unwrap(), SyncPoint::default());

        repo.set_last_sync_point(&id, 10, 20).unwrap();
        repo.set_last_sync_point(&id, 30, 40).unwrap();
        assert_eq!(repo.get_last_sync_point(&id).unwrap(), SyncPoint::new(30, 40));
    }

    #[test]
    fn test_find_by_remote_id() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let mut book = sample_book("Rocannon's World");
        book.remote_id = Some("page-9".to_string());
        repo.upsert(&book).unwrap();

        assert_eq!(
            repo.find_by_remote_id("page-9").unwrap().map(|b| b.id),
            Some(book.id)
        );
        assert!(repo.find_by_remote_id("page-10").unwrap().is_none());
    }

    #[test]
    fn test_find_by_isbn_matches_only_unpushed_books() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let mut unpushed = sample_book("A Wizard of Earthsea");
        unpushed.fields.isbn = Some("0547773749".to_string());
        repo.upsert(&unpushed).unwrap();

        let mut pushed = sample_book("The Left Hand of Darkness");
        pushed.fields.isbn13 = Some("9780441478125".to_string());
        pushed.remote_id = Some("page-2".to_string());
        repo.upsert(&pushed).unwrap();

        assert_eq!(
            repo.find_by_isbn("0547773749").unwrap().map(|b| b.id),
            Some(unpushed.id)
        );
        assert!(repo.find_by_isbn("9780441478125").unwrap().is_none());
    }

    #[test]
    fn test_find_by_id_prefix() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        let book = sample_book("The Word for World is Forest");
        repo.upsert(&book).unwrap();

        let prefix = &book.id.as_str()[..8];
        let found = repo.find_by_id_prefix(prefix).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, book.id);
        assert!(repo.find_by_id_prefix("  ").is_err());
    }

    #[test]
    fn test_list_sorted_by_title() {
        let db = setup();
        let repo = SqliteBookRepository::new(db.connection());

        repo.upsert(&sample_book("b side")).unwrap();
        repo.upsert(&sample_book("A side")).unwrap();

        let titles: Vec<_> = repo
            .list(false)
            .unwrap()
            .into_iter()
            .map(|b| b.fields.title)
            .collect();
        assert_eq!(titles, vec!["A side", "b side"]);
    }
}
