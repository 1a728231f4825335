//! Store-level sync bookkeeping: pull high-water mark and last run record

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const PULL_HIGH_WATER_MARK: &str = "pull_high_water_mark";
const LAST_RUN: &str = "last_run";

/// Outcome of the most recent completed sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRun {
    /// When the run finished (Unix ms)
    pub finished_at: i64,
    /// Final phase name
    pub phase: String,
    /// Entries pushed
    pub pushed: usize,
    /// Remote records applied
    pub pulled: usize,
    /// Conflicts left for manual resolution
    pub unresolved: usize,
}

/// Key/value access to the `sync_state` table
pub struct SyncStateStore<'a> {
    conn: &'a Connection,
}

impl<'a> SyncStateStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Newest remote modification time applied by a completed pull (Unix ms)
    pub fn pull_high_water_mark(&self) -> Result<i64> {
        Ok(self
            .get_value(PULL_HIGH_WATER_MARK)?
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    /// Advance the pull high-water mark; older values are ignored
    pub fn advance_pull_high_water_mark(&self, mark: i64) -> Result<i64> {
        let current = self.pull_high_water_mark()?;
        let next = current.max(mark);
        if next != current {
            self.set_value(PULL_HIGH_WATER_MARK, &next.to_string())?;
        }
        Ok(next)
    }

    /// Record the outcome of a finished run
    pub fn record_last_run(&self, run: &LastRun) -> Result<()> {
        self.set_value(LAST_RUN, &serde_json::to_string(run)?)
    }

    /// Outcome of the most recent finished run, if any
    pub fn last_run(&self) -> Result<Option<LastRun>> {
        self.get_value(LAST_RUN)?
            .map(|value| serde_json::from_str(&value).map_err(Into::into))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_high_water_mark_only_advances() {
        let db = Database::open_in_memory().unwrap();
        let state = SyncStateStore::new(db.connection());

        assert_eq!(state.pull_high_water_mark().unwrap(), 0);
        assert_eq!(state.advance_pull_high_water_mark(500).unwrap(), 500);
        assert_eq!(state.advance_pull_high_water_mark(200).unwrap(), 500);
        assert_eq!(state.pull_high_water_mark().unwrap(), 500);
    }

    #[test]
    fn test_last_run_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let state = SyncStateStore::new(db.connection());
        assert!(state.last_run().unwrap().is_none());

        let run = LastRun {
            finished_at: 42,
            phase: "done".to_string(),
            pushed: 3,
            pulled: 1,
            unresolved: 0,
        };
        state.record_last_run(&run).unwrap();
        assert_eq!(state.last_run().unwrap(), Some(run));
    }
}
