//! Conflict detection

use serde::{Deserialize, Serialize};

use crate::models::{Book, SyncPoint};

/// Which side changed a book since its last sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Neither side changed
    Clean,
    /// Only the local copy changed
    LocalAhead,
    /// Only the remote copy changed
    RemoteAhead,
    /// Both sides changed
    Conflict,
}

/// Classify a book against the timestamps recorded at its last sync.
///
/// A side counts as changed only when its timestamp is strictly newer than
/// the recorded one.
pub const fn classify(book: &Book, last_sync_local_ts: i64, last_sync_remote_ts: i64) -> Classification {
    let local_changed = book.local_modified_at > last_sync_local_ts;
    let remote_changed = book.remote_modified_at > last_sync_remote_ts;

    match (local_changed, remote_changed) {
        (true, true) => Classification::Conflict,
        (true, false) => Classification::LocalAhead,
        (false, true) => Classification::RemoteAhead,
        (false, false) => Classification::Clean,
    }
}

/// [`classify`] against a stored sync point
pub const fn classify_at(book: &Book, point: SyncPoint) -> Classification {
    classify(book, point.local_ts, point.remote_ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookFields;

    const T: i64 = 1_700_000_000_000;

    fn book_at(local: i64, remote: i64) -> Book {
        let mut book = Book::new(BookFields::new("Gideon the Ninth", "Tamsyn Muir").unwrap());
        book.local_modified_at = local;
        book.remote_modified_at = remote;
        book
    }

    #[test]
    fn truth_table() {
        let cases = [
            (T, T, Classification::Clean),
            (T + 1, T, Classification::LocalAhead),
            (T, T + 1, Classification::RemoteAhead),
            (T + 1, T + 1, Classification::Conflict),
        ];
        for (local, remote, expected) in cases {
            assert_eq!(classify(&book_at(local, remote), T, T), expected);
        }
    }

    #[test]
    fn equal_timestamps_are_clean() {
        assert_eq!(classify(&book_at(T, T), T, T), Classification::Clean);
    }

    #[test]
    fn older_timestamps_are_not_changes() {
        assert_eq!(classify(&book_at(T - 5, T - 5), T, T), Classification::Clean);
    }

    #[test]
    fn both_sides_changed_is_conflict_regardless_of_order() {
        // Local edit at T+5, remote edit at T+3: the later edit does not win
        let book = book_at(T + 5, T + 3);
        assert_eq!(classify(&book, T, T), Classification::Conflict);
    }

    #[test]
    fn never_synced_book_is_local_ahead() {
        let book = book_at(T, 0);
        assert_eq!(
            classify_at(&book, SyncPoint::default()),
            Classification::LocalAhead
        );
    }
}
