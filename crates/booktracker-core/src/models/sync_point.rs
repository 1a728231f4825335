//! Last-sync-point model

use serde::{Deserialize, Serialize};

/// Timestamps observed on both sides at the end of the last successful sync
/// of one book. A book that has never synced sits at `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncPoint {
    /// `local_modified_at` at the last sync (Unix ms)
    pub local_ts: i64,
    /// `remote_modified_at` at the last sync (Unix ms)
    pub remote_ts: i64,
}

impl SyncPoint {
    /// Create a sync point from both timestamps
    #[must_use]
    pub const fn new(local_ts: i64, remote_ts: i64) -> Self {
        Self {
            local_ts,
            remote_ts,
        }
    }

    /// Whether the book has ever completed a sync
    pub const fn is_initial(&self) -> bool {
        self.local_ts == 0 && self.remote_ts == 0
    }
}
