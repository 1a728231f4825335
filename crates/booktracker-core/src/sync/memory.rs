//! In-process remote with scripted failures.
//!
//! Behaves like the Notion adapter from the engine's point of view: server
//! assigned ids and timestamps, idempotent creation by local id, archiving,
//! paged pulls in modification order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::client::{RemoteBook, RemoteClient, RemoteError, RemotePage, RemoteRef};
use crate::models::{Book, BookFields, BookId};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<String, RemoteBook>,
    clock: i64,
    next_id: u64,
    push_failures: VecDeque<RemoteError>,
    pull_failures: VecDeque<RemoteError>,
    fetch_failures: VecDeque<RemoteError>,
    push_calls: usize,
    pull_calls: usize,
    fetch_calls: usize,
    created: usize,
}

impl RemoteState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("page-{:04}", self.next_id)
    }
}

/// Remote database of record kept in memory
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    page_size: usize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Empty remote whose clock starts at the current time
    pub fn new() -> Self {
        Self::with_clock(crate::util::unix_millis_now())
    }

    /// Empty remote whose next server timestamp is `start + 1`
    pub fn with_clock(start: i64) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                clock: start,
                ..RemoteState::default()
            }),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Records per pulled page
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next pushes with these errors, in order
    pub fn fail_next_pushes(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().push_failures.extend(errors);
    }

    /// Fail the next page pulls with these errors, in order
    pub fn fail_next_pulls(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().pull_failures.extend(errors);
    }

    /// Fail the next fetches with these errors, in order
    pub fn fail_next_fetches(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.state().fetch_failures.extend(errors);
    }

    /// Create a record as if another client wrote it at `modified_at`
    pub fn insert_remote(&self, fields: BookFields, modified_at: i64) -> String {
        let mut state = self.state();
        let remote_id = state.allocate_id();
        state.clock = state.clock.max(modified_at);
        state.records.insert(
            remote_id.clone(),
            RemoteBook {
                remote_id: remote_id.clone(),
                local_id: None,
                fields,
                modified_at,
                archived: false,
            },
        );
        remote_id
    }

    /// Edit a record as if another client wrote it at `modified_at`
    pub fn edit_remote(&self, remote_id: &str, fields: BookFields, modified_at: i64) -> bool {
        let mut state = self.state();
        state.clock = state.clock.max(modified_at);
        state.records.get_mut(remote_id).is_some_and(|record| {
            record.fields = fields;
            record.modified_at = modified_at;
            true
        })
    }

    /// Archive a record as if another client deleted it at `modified_at`
    pub fn archive_remote(&self, remote_id: &str, modified_at: i64) -> bool {
        let mut state = self.state();
        state.clock = state.clock.max(modified_at);
        state.records.get_mut(remote_id).is_some_and(|record| {
            record.archived = true;
            record.modified_at = modified_at;
            true
        })
    }

    /// Record by remote id
    pub fn get(&self, remote_id: &str) -> Option<RemoteBook> {
        self.state().records.get(remote_id).cloned()
    }

    /// Record created from the given local book
    pub fn find_by_local_id(&self, local_id: &BookId) -> Option<RemoteBook> {
        self.state()
            .records
            .values()
            .find(|record| record.local_id.as_ref() == Some(local_id))
            .cloned()
    }

    /// All records in modification order
    pub fn records(&self) -> Vec<RemoteBook> {
        let mut records: Vec<_> = self.state().records.values().cloned().collect();
        records.sort_by(|a, b| (a.modified_at, &a.remote_id).cmp(&(b.modified_at, &b.remote_id)));
        records
    }

    /// Current server clock (Unix ms)
    pub fn clock(&self) -> i64 {
        self.state().clock
    }

    /// Push calls received, failed ones included
    pub fn push_calls(&self) -> usize {
        self.state().push_calls
    }

    /// Page pulls received, failed ones included
    pub fn pull_calls(&self) -> usize {
        self.state().pull_calls
    }

    /// Fetch calls received, failed ones included
    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    /// Records created by pushes
    pub fn created(&self) -> usize {
        self.state().created
    }
}

impl RemoteClient for MemoryRemote {
    async fn push(&self, book: &Book) -> Result<RemoteRef, RemoteError> {
        let mut state = self.state();
        state.push_calls += 1;
        if let Some(error) = state.push_failures.pop_front() {
            return Err(error);
        }

        let remote_id = match &book.remote_id {
            Some(remote_id) if state.records.contains_key(remote_id) => remote_id.clone(),
            Some(remote_id) => {
                return Err(RemoteError::Permanent(format!(
                    "Could not find page with ID: {remote_id}"
                )))
            }
            None => {
                let existing = state
                    .records
                    .values()
                    .find(|record| record.local_id == Some(book.id))
                    .map(|record| record.remote_id.clone());
                if let Some(remote_id) = existing {
                    remote_id
                } else {
                    state.created += 1;
                    state.allocate_id()
                }
            }
        };

        let modified_at = state.tick();
        state.records.insert(
            remote_id.clone(),
            RemoteBook {
                remote_id: remote_id.clone(),
                local_id: Some(book.id),
                fields: book.fields.clone(),
                modified_at,
                archived: book.is_deleted,
            },
        );

        Ok(RemoteRef {
            remote_id,
            modified_at,
        })
    }

    async fn pull_page(
        &self,
        since: i64,
        cursor: Option<&str>,
    ) -> Result<RemotePage, RemoteError> {
        let page_size = self.page_size;
        let mut state = self.state();
        state.pull_calls += 1;
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }

        let offset = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RemoteError::Permanent(format!("Invalid start_cursor: {cursor}")))?,
            None => 0,
        };

        let mut matching: Vec<_> = state
            .records
            .values()
            .filter(|record| record.modified_at >= since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.modified_at, &a.remote_id).cmp(&(b.modified_at, &b.remote_id)));

        let end = (offset + page_size).min(matching.len());
        let records = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());

        Ok(RemotePage {
            records,
            next_cursor,
        })
    }

    async fn fetch(&self, remote_id: &str) -> Result<Option<RemoteBook>, RemoteError> {
        let mut state = self.state();
        state.fetch_calls += 1;
        if let Some(error) = state.fetch_failures.pop_front() {
            return Err(error);
        }
        Ok(state.records.get(remote_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn book(title: &str) -> Book {
        Book::new(BookFields::new(title, "Becky Chambers").unwrap())
    }

    #[tokio::test]
    async fn push_creates_then_updates() {
        let remote = MemoryRemote::with_clock(1_000);
        let mut local = book("A Psalm for the Wild-Built");

        let created = remote.push(&local).await.unwrap();
        assert_eq!(created.modified_at, 1_001);
        assert_eq!(remote.created(), 1);

        local.remote_id = Some(created.remote_id.clone());
        local.fields.progress = Some("50%".to_string());
        let updated = remote.push(&local).await.unwrap();

        assert_eq!(updated.remote_id, created.remote_id);
        assert!(updated.modified_at > created.modified_at);
        assert_eq!(
            remote.get(&created.remote_id).unwrap().fields.progress.as_deref(),
            Some("50%")
        );
    }

    #[tokio::test]
    async fn repeated_create_is_idempotent() {
        let remote = MemoryRemote::new();
        let local = book("A Prayer for the Crown-Shy");

        let first = remote.push(&local).await.unwrap();
        let second = remote.push(&local).await.unwrap();

        assert_eq!(first.remote_id, second.remote_id);
        assert_eq!(remote.records().len(), 1);
        assert_eq!(remote.created(), 1);
    }

    #[tokio::test]
    async fn tombstone_push_archives() {
        let remote = MemoryRemote::new();
        let mut local = book("Record of a Spaceborn Few");
        local.remote_id = Some(remote.push(&local).await.unwrap().remote_id);
        local.is_deleted = true;

        let confirmed = remote.push(&local).await.unwrap();
        assert!(remote.get(&confirmed.remote_id).unwrap().archived);
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_permanent() {
        let remote = MemoryRemote::new();
        let mut local = book("The Galaxy, and the Ground Within");
        local.remote_id = Some("page-missing".to_string());

        assert!(matches!(
            remote.push(&local).await,
            Err(RemoteError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn pull_filters_and_pages() {
        let remote = MemoryRemote::with_clock(0).with_page_size(1);
        remote.insert_remote(BookFields::new("Old", "A").unwrap(), 5);
        remote.insert_remote(BookFields::new("New", "B").unwrap(), 20);
        remote.insert_remote(BookFields::new("Newer", "C").unwrap(), 30);

        let first = remote.pull_page(20, None).await.unwrap();
        assert_eq!(first.records[0].fields.title, "New");
        let second = remote
            .pull_page(20, first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.records[0].fields.title, "Newer");
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next_fetches(vec![RemoteError::Transient("timeout".to_string())]);

        assert!(remote.fetch("page-0001").await.is_err());
        assert_eq!(remote.fetch("page-0001").await.unwrap(), None);
        assert_eq!(remote.fetch_calls(), 2);
    }
}
