//! Pending-change queue
//!
//! Append-only log of local mutations that the remote has not confirmed yet.
//! Entries leave the queue only through [`PendingQueue::mark_applied`].

use std::collections::VecDeque;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{BookFields, BookId, ChangeOperation, EntryId, PendingChange};

/// Rows fetched per page by [`PendingCursor`]
pub const DEFAULT_PAGE_SIZE: usize = 64;

const ENTRY_COLUMNS: &str =
    "seq, id, book_id, operation, payload, enqueued_at, retry_count, last_error";

/// Trait for pending-change queue operations
pub trait PendingQueue {
    /// Append a change; returns the new entry's id
    fn enqueue(
        &self,
        book_id: &BookId,
        operation: ChangeOperation,
        payload: &BookFields,
    ) -> Result<EntryId>;

    /// Lazily iterate pending entries, oldest first
    fn list_pending(&self) -> PendingCursor<'_>;

    /// Remove an entry once the remote confirmed it. Missing entries are ignored.
    fn mark_applied(&self, entry_id: &EntryId) -> Result<()>;

    /// Count a failed push against an entry and remember the error
    fn record_failure(&self, entry_id: &EntryId, error: &str) -> Result<()>;

    /// Pending entries of one book, oldest first
    fn pending_for(&self, book_id: &BookId) -> Result<Vec<PendingChange>>;

    /// Number of pending entries
    fn count(&self) -> Result<usize>;

    /// Get an entry by ID
    fn get(&self, entry_id: &EntryId) -> Result<Option<PendingChange>>;
}

/// `SQLite` implementation of `PendingQueue`
pub struct SqlitePendingQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePendingQueue<'a> {
    /// Create a new queue with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

/// Columns of a queue row before the operation and payload are decoded
struct RawEntry {
    seq: i64,
    id: String,
    book_id: String,
    operation: String,
    payload: String,
    enqueued_at: i64,
    retry_count: u32,
    last_error: Option<String>,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            book_id: row.get(2)?,
            operation: row.get(3)?,
            payload: row.get(4)?,
            enqueued_at: row.get(5)?,
            retry_count: row.get(6)?,
            last_error: row.get(7)?,
        })
    }
}

impl TryFrom<RawEntry> for PendingChange {
    type Error = Error;

    fn try_from(raw: RawEntry) -> Result<Self> {
        Ok(Self {
            id: raw
                .id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid entry id: {}", raw.id)))?,
            seq: raw.seq,
            book_id: raw
                .book_id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid book id: {}", raw.book_id)))?,
            operation: raw.operation.parse()?,
            payload: serde_json::from_str(&raw.payload)?,
            enqueued_at: raw.enqueued_at,
            retry_count: raw.retry_count,
            last_error: raw.last_error,
        })
    }
}

impl PendingQueue for SqlitePendingQueue<'_> {
    fn enqueue(
        &self,
        book_id: &BookId,
        operation: ChangeOperation,
        payload: &BookFields,
    ) -> Result<EntryId> {
        let id = EntryId::new();
        self.conn.execute(
            "INSERT INTO pending_changes (id, book_id, operation, payload, enqueued_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                id.as_str(),
                book_id.as_str(),
                operation.as_str(),
                serde_json::to_string(payload)?,
                crate::util::unix_millis_now(),
            ],
        )?;

        tracing::debug!(%book_id, %operation, entry = %id, "Enqueued pending change");
        Ok(id)
    }

    fn list_pending(&self) -> PendingCursor<'_> {
        PendingCursor::new(self.conn, DEFAULT_PAGE_SIZE)
    }

    fn mark_applied(&self, entry_id: &EntryId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_changes WHERE id = ?",
            params![entry_id.as_str()],
        )?;
        Ok(())
    }

    fn record_failure(&self, entry_id: &EntryId, error: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE pending_changes
             SET retry_count = retry_count + 1, last_error = ?
             WHERE id = ?",
            params![crate::util::truncate_chars(error, 2000), entry_id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(entry_id.to_string()));
        }
        Ok(())
    }

    fn pending_for(&self, book_id: &BookId) -> Result<Vec<PendingChange>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM pending_changes WHERE book_id = ? ORDER BY seq"
        ))?;

        let raw = stmt
            .query_map(params![book_id.as_str()], RawEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter().map(PendingChange::try_from).collect()
    }

    fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn get(&self, entry_id: &EntryId) -> Result<Option<PendingChange>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM pending_changes WHERE id = ?"),
                params![entry_id.as_str()],
                RawEntry::from_row,
            )
            .optional()?
            .map(PendingChange::try_from)
            .transpose()
    }
}

/// Lazy, paged iterator over pending entries in enqueue order.
///
/// Each page is read after the last sequence number already yielded, so
/// entries removed while iterating are simply not seen and entries appended
/// meanwhile show up at the end. A row that fails to decode is yielded as an
/// error without ending the iteration.
pub struct PendingCursor<'a> {
    conn: &'a Connection,
    page_size: usize,
    after_seq: i64,
    buffer: VecDeque<Result<PendingChange>>,
    exhausted: bool,
}

impl<'a> PendingCursor<'a> {
    /// Start a cursor at the oldest entry
    pub const fn new(conn: &'a Connection, page_size: usize) -> Self {
        Self {
            conn,
            page_size,
            after_seq: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Restart from the oldest entry
    pub fn rewind(&mut self) {
        self.after_seq = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch_page(&mut self) -> Result<()> {
        let limit = i64::try_from(self.page_size.max(1)).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM pending_changes WHERE seq > ? ORDER BY seq LIMIT ?"
        ))?;

        let raw = stmt
            .query_map(params![self.after_seq, limit], RawEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if raw.len() < self.page_size.max(1) {
            self.exhausted = true;
        }
        if let Some(last) = raw.last() {
            self.after_seq = last.seq;
        }

        self.buffer
            .extend(raw.into_iter().map(PendingChange::try_from));
        Ok(())
    }
}

impl Iterator for PendingCursor<'_> {
    type Item = Result<PendingChange>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front()
    }
}
