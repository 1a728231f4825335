//! Run-scoped marker guaranteeing one sync run per store

use std::cell::Cell;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Held for the duration of a sync run; releases the marker on drop
pub struct RunLock<'a> {
    conn: &'a Connection,
    holder: String,
    acquired_at: Cell<i64>,
}

impl<'a> RunLock<'a> {
    /// Acquire the marker or fail fast with [`Error::SyncInProgress`].
    ///
    /// A marker older than `stale_after` is treated as left behind by a
    /// crashed run and reclaimed.
    pub fn acquire(conn: &'a Connection, stale_after: Duration) -> Result<Self> {
        let holder = uuid::Uuid::now_v7().to_string();

        match Self::try_insert(conn, &holder) {
            Ok(acquired_at) => return Ok(Self::held(conn, holder, acquired_at)),
            Err(Error::SyncInProgress { since }) => {
                let age = unix_millis_now().saturating_sub(since);
                let stale_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
                if age <= stale_ms {
                    return Err(Error::SyncInProgress { since });
                }

                tracing::warn!(
                    since,
                    age_secs = age / 1000,
                    "Reclaiming stale sync run marker"
                );
                conn.execute(
                    "DELETE FROM sync_run_lock WHERE id = 1 AND acquired_at = ?",
                    params![since],
                )?;
            }
            Err(e) => return Err(e),
        }

        let acquired_at = Self::try_insert(conn, &holder)?;
        Ok(Self::held(conn, holder, acquired_at))
    }

    fn held(conn: &'a Connection, holder: String, acquired_at: i64) -> Self {
        tracing::debug!(%holder, "Acquired sync run marker");
        Self {
            conn,
            holder,
            acquired_at: Cell::new(acquired_at),
        }
    }

    fn try_insert(conn: &Connection, holder: &str) -> Result<i64> {
        let now = unix_millis_now();
        match conn.execute(
            "INSERT INTO sync_run_lock (id, holder, acquired_at) VALUES (1, ?, ?)",
            params![holder, now],
        ) {
            Ok(_) => Ok(now),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                let since: Option<i64> = conn
                    .query_row(
                        "SELECT acquired_at FROM sync_run_lock WHERE id = 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                Err(Error::SyncInProgress {
                    since: since.unwrap_or(now),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// When this run acquired or last refreshed the marker (Unix ms)
    pub fn acquired_at(&self) -> i64 {
        self.acquired_at.get()
    }

    /// Move the marker's timestamp to now so a long run is never mistaken
    /// for a crashed one.
    ///
    /// Fails with [`Error::SyncInProgress`] when the marker was reclaimed by
    /// another run in the meantime.
    pub fn refresh(&self) -> Result<()> {
        let now = unix_millis_now();
        let updated = self.conn.execute(
            "UPDATE sync_run_lock SET acquired_at = ? WHERE id = 1 AND holder = ?",
            params![now, self.holder],
        )?;
        if updated == 0 {
            let since: Option<i64> = self
                .conn
                .query_row(
                    "SELECT acquired_at FROM sync_run_lock WHERE id = 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            tracing::warn!(holder = %self.holder, "Sync run marker was taken over");
            return Err(Error::SyncInProgress {
                since: since.unwrap_or(now),
            });
        }
        self.acquired_at.set(now);
        Ok(())
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute(
            "DELETE FROM sync_run_lock WHERE id = 1 AND holder = ?",
            params![self.holder],
        ) {
            tracing::warn!("Failed to release sync run marker: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::tempdir;

    const STALE: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn test_second_acquire_fails_fast() {
        let db = Database::open_in_memory().unwrap();

        let lock = RunLock::acquire(db.connection(), STALE).unwrap();
        let err = RunLock::acquire(db.connection(), STALE).err().unwrap();
        assert!(
            matches!(err, Error::SyncInProgress { since } if since == lock.acquired_at())
        );
    }

    #[test]
    fn test_drop_releases_marker() {
        let db = Database::open_in_memory().unwrap();

        {
            let _lock = RunLock::acquire(db.connection(), STALE).unwrap();
        }
        assert!(RunLock::acquire(db.connection(), STALE).is_ok());
    }

    #[test]
    fn test_marker_is_shared_across_connections() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("books.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        let _lock = RunLock::acquire(first.connection(), STALE).unwrap();
        assert!(matches!(
            RunLock::acquire(second.connection(), STALE),
            Err(Error::SyncInProgress { .. })
        ));
    }

    #[test]
    fn test_stale_marker_is_reclaimed() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute(
                "INSERT INTO sync_run_lock (id, holder, acquired_at) VALUES (1, 'crashed', ?)",
                params![unix_millis_now() - 31 * 60 * 1000],
            )
            .unwrap();

        let lock = RunLock::acquire(db.connection(), STALE).unwrap();
        assert!(lock.acquired_at() > 0);
    }

    fn backdate(db: &Database, age: Duration) {
        let at = unix_millis_now() - i64::try_from(age.as_millis()).unwrap();
        db.connection()
            .execute("UPDATE sync_run_lock SET acquired_at = ? WHERE id = 1", params![at])
            .unwrap();
    }

    #[test]
    fn test_refreshed_marker_is_not_reclaimed() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("books.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        let lock = RunLock::acquire(first.connection(), STALE).unwrap();
        // A run that has been going for longer than the stale window
        backdate(&first, STALE + Duration::from_secs(60));
        lock.refresh().unwrap();

        assert!(unix_millis_now() - lock.acquired_at() < 60_000);
        assert!(matches!(
            RunLock::acquire(second.connection(), STALE),
            Err(Error::SyncInProgress { since }) if since == lock.acquired_at()
        ));
    }

    #[test]
    fn test_refresh_fails_after_takeover() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("books.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        let stalled = RunLock::acquire(first.connection(), STALE).unwrap();
        backdate(&first, STALE + Duration::from_secs(60));
        let current = RunLock::acquire(second.connection(), STALE).unwrap();

        assert!(matches!(
            stalled.refresh(),
            Err(Error::SyncInProgress { since }) if since == current.acquired_at()
        ));
        drop(stalled);
        // The stalled run's guard leaves the new marker alone
        assert!(matches!(
            RunLock::acquire(first.connection(), STALE),
            Err(Error::SyncInProgress { .. })
        ));
    }
}
