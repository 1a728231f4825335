//! Sync orchestrator: one sequential pass per run.
//!
//! A run pulls speculatively, classifies every book touched on either side,
//! pushes queued local changes, applies remote changes, and records new sync
//! points. Conflicts are never overwritten unless the caller picked a policy.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::classify::{classify_at, Classification};
use super::client::{RemoteBook, RemoteClient, RemoteRef};
use super::retry::{RetryingClient, Sleeper, TokioSleeper};
use super::summary::{AutoResolvePolicy, SyncMode, SyncPhase, SyncSummary, Winner};
use crate::db::{
    BookRepository, Database, LastRun, PendingQueue, RunLock, SqliteBookRepository,
    SqlitePendingQueue, SyncStateStore,
};
use crate::error::{Error, Result};
use crate::models::{Book, BookId, ChangeOperation, PendingChange, SyncPoint};
use crate::util::unix_millis_now;

/// Shared flag checked between records; set it to stop a run early
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tunables of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Consecutive exhausted pushes, with no success, after which the remote
    /// is considered unavailable
    pub unavailable_after: u32,
    /// Age after which a run marker is considered abandoned
    pub stale_lock_after: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            unavailable_after: 3,
            stale_lock_after: Duration::from_secs(30 * 60),
        }
    }
}

/// How a remote record was tied to a local book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    RemoteId,
    /// Record stamped with the book's local id
    LocalId,
    Isbn,
}

/// A pulled record and the local book it maps to, if any
#[derive(Debug)]
struct Observed {
    remote: RemoteBook,
    local: Option<(BookId, MatchKind)>,
    /// The record carries the stored copy or a queued snapshot of the book,
    /// i.e. it is our own write whose confirmation never arrived
    echo: bool,
}

/// A book evaluated against its sync point
#[derive(Debug)]
struct Candidate {
    stored: Book,
    observed_remote_ts: i64,
    classification: Classification,
}

/// Everything decided by the conflict check
#[derive(Debug, Default)]
struct Plan {
    records: Vec<Observed>,
    candidates: BTreeMap<BookId, Candidate>,
    local_wins: HashSet<BookId>,
    remote_wins: HashSet<BookId>,
    unresolved: BTreeSet<BookId>,
}

impl Plan {
    fn classification(&self, id: &BookId) -> Option<Classification> {
        self.candidates.get(id).map(|c| c.classification)
    }

    fn holds_back_push(&self, id: &BookId) -> bool {
        self.unresolved.contains(id) || self.remote_wins.contains(id)
    }
}

/// How a phase ended
enum Flow {
    Continue,
    Stop(SyncPhase),
}

/// Drives sync runs between a local store and a remote client
pub struct SyncOrchestrator<'a, C, S = TokioSleeper> {
    db: &'a Database,
    client: &'a RetryingClient<C, S>,
    options: SyncOptions,
    cancel: CancelFlag,
}

impl<'a, C: RemoteClient, S: Sleeper> SyncOrchestrator<'a, C, S> {
    /// Create an orchestrator with default options
    pub fn new(db: &'a Database, client: &'a RetryingClient<C, S>) -> Self {
        Self {
            db,
            client,
            options: SyncOptions::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Override the default options
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Share a cancellation flag with the caller
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that cancels runs of this orchestrator
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn books(&self) -> SqliteBookRepository<'a> {
        SqliteBookRepository::new(self.db.connection())
    }

    fn queue(&self) -> SqlitePendingQueue<'a> {
        SqlitePendingQueue::new(self.db.connection())
    }

    /// Run one sync pass.
    ///
    /// Returns `Err` only when the run could not start or the store failed;
    /// remote unavailability ends the run in [`SyncPhase::Failed`].
    pub async fn run(&self, mode: SyncMode, policy: AutoResolvePolicy) -> Result<SyncSummary> {
        let lock = if mode.writes() {
            Some(RunLock::acquire(
                self.db.connection(),
                self.options.stale_lock_after,
            )?)
        } else {
            None
        };

        let mut summary = SyncSummary::new(mode);
        let mut touched = BTreeSet::new();

        summary.enter(SyncPhase::CheckingConflicts);
        let plan = match self.check_conflicts(mode, policy, &mut summary).await? {
            Ok(plan) => plan,
            Err(phase) => return self.finish(summary, &Plan::default(), &touched, phase),
        };

        if !mode.writes() {
            summary.unresolved = plan.unresolved.iter().copied().collect();
            summary.pending = self.queue().count()?;
            summary.enter(SyncPhase::Done);
            return Ok(summary);
        }

        self.link_observed(&plan)?;

        if mode.pushes() {
            summary.enter(SyncPhase::Pushing);
            if let Flow::Stop(phase) = self
                .push_phase(&plan, lock.as_ref(), &mut summary, &mut touched)
                .await? {
                return self.finish(summary, &plan, &touched, phase);
            }
        }

        if mode.pulls() {
            summary.enter(SyncPhase::Pulling);
            if let Flow::Stop(phase) = self
                .pull_phase(&plan, lock.as_ref(), &mut summary, &mut touched)
                .await? {
                return self.finish(summary, &plan, &touched, phase);
            }
        }

        summary.enter(SyncPhase::Reconciling);
        self.finish(summary, &plan, &touched, SyncPhase::Done)
    }

    /// Speculative pull, matching and classification.
    ///
    /// The inner `Err` carries the terminal phase when the run must stop.
    async fn check_conflicts(
        &self,
        mode: SyncMode,
        policy: AutoResolvePolicy,
        summary: &mut SyncSummary,
    ) -> Result<std::result::Result<Plan, SyncPhase>> {
        let since = if mode == SyncMode::ForcePull {
            0
        } else {
            SyncStateStore::new(self.db.connection()).pull_high_water_mark()?
        };
        tracing::debug!(since, "Pulling remote changes");

        let mut records: Vec<RemoteBook> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut pull = self.client.pull_since(since);
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Err(SyncPhase::Cancelled));
            }
            match pull.next().await {
                None => break,
                Some(Ok(record)) => match positions.get(&record.remote_id) {
                    Some(&pos) if records[pos].modified_at <= record.modified_at => {
                        records[pos] = record;
                    }
                    Some(_) => {}
                    None => {
                        positions.insert(record.remote_id.clone(), records.len());
                        records.push(record);
                    }
                },
                Some(Err(error)) => {
                    summary.failure = Some(format!("Remote unavailable: {error}"));
                    return Ok(Err(SyncPhase::Failed));
                }
            }
        }

        let mut plan = Plan {
            records: self.match_records(records)?,
            ..Plan::default()
        };

        let mut book_ids: BTreeSet<BookId> = BTreeSet::new();
        for entry in self.queue().list_pending() {
            match entry {
                Ok(entry) => {
                    book_ids.insert(entry.book_id);
                }
                Err(error) => summary.issue(None, None, format!("Unreadable queue entry: {error}")),
            }
        }

        let mut observed_ts: HashMap<BookId, i64> = HashMap::new();
        for observed in &plan.records {
            if let Some((id, _)) = observed.local {
                book_ids.insert(id);
                if !observed.echo {
                    observed_ts.insert(id, observed.remote.modified_at);
                }
            }
        }

        let books = self.books();
        for id in book_ids {
            let Some(stored) = books.get(&id)? else {
                continue;
            };
            let point = books.get_last_sync_point(&id)?;
            let observed_remote_ts = stored
                .remote_modified_at
                .max(observed_ts.get(&id).copied().unwrap_or(0));
            let observed = Book {
                remote_modified_at: observed_remote_ts,
                ..stored.clone()
            };
            let classification = classify_at(&observed, point);
            tracing::debug!(book = %id, ?classification, "Classified");

            if classification == Classification::Conflict {
                summary.conflicts_found += 1;
                self.decide_conflict(mode, policy, &stored, &mut plan, summary);
            }

            plan.candidates.insert(
                id,
                Candidate {
                    stored,
                    observed_remote_ts,
                    classification,
                },
            );
        }

        Ok(Ok(plan))
    }

    fn match_records(&self, records: Vec<RemoteBook>) -> Result<Vec<Observed>> {
        let books = self.books();
        let mut claimed: HashSet<BookId> = HashSet::new();
        let mut matched = Vec::with_capacity(records.len());

        for remote in records {
            let mut local = books
                .find_by_remote_id(&remote.remote_id)?
                .map(|book| (book, MatchKind::RemoteId));

            if local.is_none() {
                if let Some(local_id) = remote.local_id {
                    local = books
                        .get(&local_id)?
                        .filter(|book| book.remote_id.is_none() && !claimed.contains(&book.id))
                        .map(|book| (book, MatchKind::LocalId));
                }
            }

            if local.is_none() {
                for key in remote.fields.natural_keys() {
                    if let Some(book) = books.find_by_isbn(key)? {
                        if !claimed.contains(&book.id) {
                            local = Some((book, MatchKind::Isbn));
                            break;
                        }
                    }
                }
            }

            let Some((book, kind)) = local else {
                matched.push(Observed {
                    remote,
                    local: None,
                    echo: false,
                });
                continue;
            };

            let echo = self.is_echo(&book, &remote)?;
            if kind != MatchKind::RemoteId {
                tracing::info!(
                    book = %book.id,
                    remote = %remote.remote_id,
                    ?kind,
                    echo,
                    "Linked remote record"
                );
            }
            claimed.insert(book.id);
            matched.push(Observed {
                remote,
                local: Some((book.id, kind)),
                echo,
            });
        }

        Ok(matched)
    }

    /// Whether a remote record holds the stored copy of a book or the
    /// snapshot of one of its queued changes
    fn is_echo(&self, book: &Book, remote: &RemoteBook) -> Result<bool> {
        if remote.fields == book.fields && remote.archived == book.is_deleted {
            return Ok(true);
        }
        Ok(self.queue().pending_for(&book.id)?.iter().any(|entry| {
            entry.payload == remote.fields
                && (entry.operation == ChangeOperation::Delete) == remote.archived
        }))
    }

    fn decide_conflict(
        &self,
        mode: SyncMode,
        policy: AutoResolvePolicy,
        book: &Book,
        plan: &mut Plan,
        summary: &mut SyncSummary,
    ) {
        let winner = match policy.winner() {
            Some(Winner::Local) if mode.pushes() => Winner::Local,
            Some(Winner::Remote) if mode.pulls() => Winner::Remote,
            _ => {
                tracing::warn!(book = %book.id, "Conflict on {}; left for manual resolution", book.label());
                plan.unresolved.insert(book.id);
                return;
            }
        };

        tracing::info!(
            book = %book.id,
            %winner,
            "Automatic conflict resolution for {}: {winner} copy wins",
            book.label()
        );
        summary.conflicts_auto_resolved += 1;
        match winner {
            Winner::Local => plan.local_wins.insert(book.id),
            Winner::Remote => plan.remote_wins.insert(book.id),
        };
    }

    /// Persist links found by matching and remote observations of books left
    /// in conflict, so later runs still see the remote side as changed.
    fn link_observed(&self, plan: &Plan) -> Result<()> {
        for observed in &plan.records {
            let Some((id, _)) = observed.local else {
                continue;
            };
            let Some(candidate) = plan.candidates.get(&id) else {
                continue;
            };

            let link = candidate.stored.remote_id.is_none();
            let keep_conflict = plan.unresolved.contains(&id)
                && candidate.observed_remote_ts > candidate.stored.remote_modified_at;
            if !link && !keep_conflict {
                continue;
            }

            let tx = self.db.connection().unchecked_transaction()?;
            let books = SqliteBookRepository::new(&tx);
            if let Some(mut book) = books.get(&id)? {
                if link {
                    book.remote_id = Some(observed.remote.remote_id.clone());
                }
                if keep_conflict {
                    book.remote_modified_at = candidate.observed_remote_ts;
                }
                books.upsert(&book)?;
            }
            tx.commit()?;
        }

        // Local winners without queued changes still need their state pushed
        let queue = self.queue();
        for id in &plan.local_wins {
            if queue.pending_for(id)?.is_empty() {
                if let Some(candidate) = plan.candidates.get(id) {
                    let operation = if candidate.stored.is_deleted {
                        ChangeOperation::Delete
                    } else {
                        ChangeOperation::Update
                    };
                    queue.enqueue(id, operation, &candidate.stored.fields)?;
                }
            }
        }

        Ok(())
    }

    async fn push_phase(
        &self,
        plan: &Plan,
        lock: Option<&RunLock<'_>>,
        summary: &mut SyncSummary,
        touched: &mut BTreeSet<BookId>,
    ) -> Result<Flow> {
        let queue = self.queue();
        let books = self.books();
        let mut failed_books: HashSet<BookId> = HashSet::new();
        let mut successes = 0_u32;
        let mut consecutive_exhausted = 0_u32;

        for entry in queue.list_pending() {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Stop(SyncPhase::Cancelled));
            }
            keep_alive(lock)?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    summary.issue(None, None, format!("Unreadable queue entry: {error}"));
                    continue;
                }
            };

            if plan.holds_back_push(&entry.book_id) {
                continue;
            }
            if failed_books.contains(&entry.book_id) {
                tracing::debug!(entry = %entry.id, "Skipping entry behind a failed push of the same book");
                continue;
            }

            let Some(stored) = books.get(&entry.book_id)? else {
                let message = "Book no longer exists locally".to_string();
                queue.record_failure(&entry.id, &message)?;
                failed_books.insert(entry.book_id);
                summary.issue(Some(entry.book_id), Some(entry.id), message);
                continue;
            };

            let snapshot = Book {
                fields: entry.payload.clone(),
                is_deleted: entry.operation == ChangeOperation::Delete,
                ..stored
            };

            match self.client.push(&snapshot).await {
                Ok(confirmed) => {
                    self.apply_push(&entry, &confirmed)?;
                    summary.pushed += 1;
                    successes += 1;
                    consecutive_exhausted = 0;
                    touched.insert(entry.book_id);
                }
                Err(error) => {
                    queue.record_failure(&entry.id, &error.to_string())?;
                    failed_books.insert(entry.book_id);
                    summary.issue(
                        Some(entry.book_id),
                        Some(entry.id),
                        format!("Push of {} failed: {error}", entry.operation),
                    );

                    if error.is_exhausted() {
                        consecutive_exhausted += 1;
                    } else {
                        consecutive_exhausted = 0;
                    }
                    if successes == 0 && consecutive_exhausted >= self.options.unavailable_after {
                        summary.failure = Some(format!(
                            "Remote unavailable: {consecutive_exhausted} pushes failed in a row"
                        ));
                        return Ok(Flow::Stop(SyncPhase::Failed));
                    }
                }
            }
        }

        Ok(Flow::Continue)
    }

    /// Record a confirmed push and drop its queue entry atomically
    fn apply_push(&self, entry: &PendingChange, confirmed: &RemoteRef) -> Result<()> {
        let tx = self.db.connection().unchecked_transaction()?;
        let books = SqliteBookRepository::new(&tx);
        if let Some(mut book) = books.get(&entry.book_id)? {
            book.remote_id = Some(confirmed.remote_id.clone());
            book.remote_modified_at = confirmed.modified_at;
            books.upsert(&book)?;
        }
        SqlitePendingQueue::new(&tx).mark_applied(&entry.id)?;
        tx.commit()?;

        tracing::debug!(
            book = %entry.book_id,
            remote = %confirmed.remote_id,
            modified_at = confirmed.modified_at,
            "Pushed {}",
            entry.operation
        );
        Ok(())
    }

    async fn pull_phase(
        &self,
        plan: &Plan,
        lock: Option<&RunLock<'_>>,
        summary: &mut SyncSummary,
        touched: &mut BTreeSet<BookId>,
    ) -> Result<Flow> {
        let mut applied: HashSet<BookId> = HashSet::new();

        for observed in &plan.records {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Stop(SyncPhase::Cancelled));
            }
            keep_alive(lock)?;

            let remote = &observed.remote;
            let (target, resolves) = match observed.local {
                None if remote.archived => continue,
                None => (None, false),
                Some((id, _)) => match plan.classification(&id) {
                    Some(Classification::RemoteAhead) => (Some(id), false),
                    Some(Classification::Conflict) if plan.remote_wins.contains(&id) => {
                        (Some(id), true)
                    }
                    _ => continue,
                },
            };

            let book = self.apply_remote(target.as_ref(), remote, resolves)?;
            summary.pulled += 1;
            applied.insert(book.id);
            touched.insert(book.id);
        }

        // Remote winners whose newer remote copy was observed by an earlier run
        for id in &plan.remote_wins {
            if applied.contains(id) {
                continue;
            }
            keep_alive(lock)?;
            let Some(remote_id) = plan
                .candidates
                .get(id)
                .and_then(|c| c.stored.remote_id.clone())
            else {
                summary.issue(Some(*id), None, "Conflict has no remote record to apply".to_string());
                continue;
            };

            match self.client.fetch(&remote_id).await {
                Ok(Some(remote)) => {
                    self.apply_remote(Some(id), &remote, true)?;
                    summary.pulled += 1;
                    touched.insert(*id);
                }
                Ok(None) => summary.issue(
                    Some(*id),
                    None,
                    format!("Remote record {remote_id} no longer exists"),
                ),
                Err(error) => summary.issue(
                    Some(*id),
                    None,
                    format!("Fetch of remote record {remote_id} failed: {error}"),
                ),
            }
        }

        if let Some(newest) = plan.records.iter().map(|o| o.remote.modified_at).max() {
            let mark = SyncStateStore::new(self.db.connection()).advance_pull_high_water_mark(newest)?;
            tracing::debug!(mark, "Advanced pull high-water mark");
        }

        Ok(Flow::Continue)
    }

    /// Write a remote record over a local book (or create it) in one
    /// transaction. A resolving write also settles the book's queue entries.
    fn apply_remote(&self, target: Option<&BookId>, remote: &RemoteBook, resolves: bool) -> Result<Book> {
        let tx = self.db.connection().unchecked_transaction()?;
        let books = SqliteBookRepository::new(&tx);

        let existing = match target {
            Some(id) => books.get(id)?,
            None => None,
        };
        let book = if let Some(mut book) = existing {
            book.fields = remote.fields.clone();
            book.is_deleted = remote.archived;
            book.remote_id = Some(remote.remote_id.clone());
            book.remote_modified_at = remote.modified_at;
            book
        } else {
            let id = match remote.local_id {
                Some(local_id) if books.get(&local_id)?.is_none() => local_id,
                _ => BookId::new(),
            };
            Book {
                id,
                remote_id: Some(remote.remote_id.clone()),
                fields: remote.fields.clone(),
                local_modified_at: unix_millis_now(),
                remote_modified_at: remote.modified_at,
                is_deleted: remote.archived,
            }
        };

        let stored = books.upsert(&book)?;
        if resolves {
            let queue = SqlitePendingQueue::new(&tx);
            for entry in queue.pending_for(&stored.id)? {
                queue.mark_applied(&entry.id)?;
            }
        }
        tx.commit()?;

        tracing::debug!(book = %stored.id, remote = %remote.remote_id, "Applied remote record");
        Ok(stored)
    }

    /// Persist sync points of touched books.
    ///
    /// A book with entries still queued keeps its local sync timestamp so it
    /// stays ahead locally.
    fn reconcile(&self, touched: &BTreeSet<BookId>) -> Result<()> {
        let books = self.books();
        let queue = self.queue();
        for id in touched {
            let Some(book) = books.get(id)? else {
                continue;
            };
            let local_ts = if queue.pending_for(id)?.is_empty() {
                book.local_modified_at
            } else {
                books.get_last_sync_point(id)?.local_ts
            };
            books.set_last_sync_point(id, local_ts, book.remote_modified_at)?;
        }
        Ok(())
    }

    fn finish(
        &self,
        mut summary: SyncSummary,
        plan: &Plan,
        touched: &BTreeSet<BookId>,
        phase: SyncPhase,
    ) -> Result<SyncSummary> {
        if summary.mode.writes() {
            self.reconcile(touched)?;
        }

        summary.unresolved = plan.unresolved.iter().copied().collect();
        summary.pending = self.queue().count()?;
        summary.enter(phase);

        if summary.mode.writes() {
            SyncStateStore::new(self.db.connection()).record_last_run(&LastRun {
                finished_at: unix_millis_now(),
                phase: phase.to_string(),
                pushed: summary.pushed,
                pulled: summary.pulled,
                unresolved: summary.unresolved.len(),
            })?;
        }

        match phase {
            SyncPhase::Failed => tracing::warn!(
                failure = summary.failure.as_deref().unwrap_or_default(),
                "Sync run failed"
            ),
            _ => tracing::info!(
                pushed = summary.pushed,
                pulled = summary.pulled,
                conflicts = summary.conflicts_found,
                pending = summary.pending,
                "Sync run finished: {phase}"
            ),
        }
        Ok(summary)
    }

    /// Settle a conflict manually.
    ///
    /// `Local` pushes the current local state, `Remote` fetches and applies
    /// the remote record. Either way the book's queue is cleared and its sync
    /// point re-established.
    pub async fn resolve(&self, book_id: &BookId, winner: Winner) -> Result<Book> {
        let _lock = RunLock::acquire(self.db.connection(), self.options.stale_lock_after)?;

        let book = self
            .books()
            .get(book_id)?
            .ok_or_else(|| Error::NotFound(book_id.to_string()))?;

        let resolved = match winner {
            Winner::Local => {
                let confirmed = self.client.push(&book).await?;

                let tx = self.db.connection().unchecked_transaction()?;
                let books = SqliteBookRepository::new(&tx);
                let mut current = books.get(book_id)?.unwrap_or(book);
                current.remote_id = Some(confirmed.remote_id);
                current.remote_modified_at = confirmed.modified_at;
                let stored = books.upsert(&current)?;
                let queue = SqlitePendingQueue::new(&tx);
                for entry in queue.pending_for(book_id)? {
                    queue.mark_applied(&entry.id)?;
                }
                tx.commit()?;
                stored
            }
            Winner::Remote => {
                let remote_id = book.remote_id.clone().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Book {book_id} is not linked to a remote record; resolve with the local copy"
                    ))
                })?;
                let remote = self
                    .client
                    .fetch(&remote_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("remote record {remote_id}")))?;
                self.apply_remote(Some(book_id), &remote, true)?
            }
        };

        let point = SyncPoint::new(resolved.local_modified_at, resolved.remote_modified_at);
        self.books()
            .set_last_sync_point(book_id, point.local_ts, point.remote_ts)?;

        tracing::info!(book = %book_id, %winner, "Resolved conflict for {}", resolved.label());
        Ok(resolved)
    }
}

/// Refresh the run marker between records
fn keep_alive(lock: Option<&RunLock<'_>>) -> Result<()> {
    match lock {
        Some(lock) => lock.refresh(),
        None => Ok(()),
    }
}
