//! Retry state machine wrapped around any [`RemoteClient`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::client::{ClientError, RemoteBook, RemoteClient, RemoteError, RemotePage, RemoteRef};
use crate::models::Book;

/// Backoff policy for remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Wait after the first failure
    pub initial_delay: Duration,
    /// Growth factor between consecutive waits
    pub backoff_multiplier: f64,
    /// Upper bound for a single wait
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the given attempt budget and default delays
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Wait after the given failed attempt (1-indexed)
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Wait before retrying after `error`; a server hint never shortens the backoff
    pub fn delay_for(&self, attempt: u32, error: &RemoteError) -> Duration {
        let backoff = self.delay_after_attempt(attempt);
        match error {
            RemoteError::RateLimited {
                retry_after: Some(wait),
            } => backoff.max(*wait),
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Abstraction over waiting, so tests can observe backoff without sleeping
#[allow(async_fn_in_trait)]
pub trait Sleeper {
    /// Wait for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    /// Create a sleeper with an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far
    pub fn delays(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all requested delays
    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

#[cfg(test)]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// State of one retried call
#[derive(Debug)]
pub enum RetryState<T> {
    /// About to make the given attempt (1-indexed)
    Attempting(u32),
    /// Backing off after a failed attempt
    Waiting {
        /// Attempt that just failed
        attempt: u32,
        /// Wait before the next attempt
        delay: Duration,
    },
    /// Call settled with a value
    Succeeded(T),
    /// Call settled with an error
    Failed(ClientError),
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Call succeeded
    Succeeded,
    /// Remote rate limited the call
    RateLimited,
    /// Retryable failure
    Transient,
    /// Non-retryable failure
    Permanent,
}

impl From<&RemoteError> for AttemptOutcome {
    fn from(error: &RemoteError) -> Self {
        match error {
            RemoteError::RateLimited { .. } => Self::RateLimited,
            RemoteError::Transient(_) => Self::Transient,
            RemoteError::Permanent(_) => Self::Permanent,
        }
    }
}

/// One attempt as seen by the retry machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Remote operation name (`push`, `pull_page`, `fetch`)
    pub operation: String,
    /// Attempt number, 1-indexed
    pub attempt: u32,
    /// How it ended
    pub outcome: AttemptOutcome,
    /// Wait scheduled after it, if any
    pub delay: Option<Duration>,
}

/// Append-only record of attempts made through a [`RetryingClient`]
#[derive(Debug, Default)]
pub struct RetryTrace {
    attempts: Mutex<Vec<AttemptRecord>>,
}

impl RetryTrace {
    fn record(&self, record: AttemptRecord) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// All attempts so far
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attempts that were not the first try of their call
    pub fn retries(&self) -> usize {
        self.attempts().iter().filter(|a| a.attempt > 1).count()
    }
}

/// Wraps a remote client with rate-limit aware exponential backoff
pub struct RetryingClient<C, S = TokioSleeper> {
    inner: C,
    sleeper: S,
    policy: RetryPolicy,
    trace: RetryTrace,
}

impl<C: RemoteClient> RetryingClient<C, TokioSleeper> {
    /// Wrap a client, waiting on the tokio timer
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self::with_sleeper(inner, policy, TokioSleeper)
    }
}

impl<C: RemoteClient, S: Sleeper> RetryingClient<C, S> {
    /// Wrap a client with a custom sleeper
    pub fn with_sleeper(inner: C, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            inner,
            sleeper,
            policy,
            trace: RetryTrace::default(),
        }
    }

    /// The wrapped client
    pub const fn inner(&self) -> &C {
        &self.inner
    }

    /// The sleeper used for backoff
    pub const fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Retry policy in use
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempts made so far
    pub const fn trace(&self) -> &RetryTrace {
        &self.trace
    }

    /// Push a book, retrying retryable failures
    pub async fn push(&self, book: &Book) -> Result<RemoteRef, ClientError> {
        let inner = &self.inner;
        self.execute("push", move || inner.push(book)).await
    }

    /// Fetch one record, retrying retryable failures
    pub async fn fetch(&self, remote_id: &str) -> Result<Option<RemoteBook>, ClientError> {
        let inner = &self.inner;
        self.execute("fetch", move || inner.fetch(remote_id)).await
    }

    /// Fetch one page, retrying retryable failures
    pub async fn pull_page(
        &self,
        since: i64,
        cursor: Option<&str>,
    ) -> Result<RemotePage, ClientError> {
        let inner = &self.inner;
        self.execute("pull_page", move || inner.pull_page(since, cursor))
            .await
    }

    /// Lazily pull every record modified at or after `since`
    pub const fn pull_since(&self, since: i64) -> RemotePull<'_, C, S> {
        RemotePull {
            client: self,
            since,
            cursor: None,
            buffer: VecDeque::new(),
            finished: false,
        }
    }

    async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut state = RetryState::Attempting(1);

        loop {
            state = match state {
                RetryState::Attempting(attempt) => match call().await {
                    Ok(value) => {
                        self.trace.record(AttemptRecord {
                            operation: operation.to_string(),
                            attempt,
                            outcome: AttemptOutcome::Succeeded,
                            delay: None,
                        });
                        RetryState::Succeeded(value)
                    }
                    Err(error) => {
                        let retry = error.is_retryable() && attempt < max_attempts;
                        let delay = retry.then(|| self.policy.delay_for(attempt, &error));
                        self.trace.record(AttemptRecord {
                            operation: operation.to_string(),
                            attempt,
                            outcome: AttemptOutcome::from(&error),
                            delay,
                        });

                        match (error, delay) {
                            (RemoteError::Permanent(message), _) => {
                                RetryState::Failed(ClientError::Permanent(message))
                            }
                            (error, Some(delay)) => {
                                tracing::warn!(
                                    operation,
                                    attempt,
                                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                    "Remote call failed, retrying: {error}"
                                );
                                RetryState::Waiting { attempt, delay }
                            }
                            (last, None) => RetryState::Failed(ClientError::SyncFailed {
                                attempts: attempt,
                                last,
                            }),
                        }
                    }
                },
                RetryState::Waiting { attempt, delay } => {
                    self.sleeper.sleep(delay).await;
                    RetryState::Attempting(attempt + 1)
                }
                RetryState::Succeeded(value) => return Ok(value),
                RetryState::Failed(error) => {
                    tracing::debug!(operation, "Remote call settled with error: {error}");
                    return Err(error);
                }
            };
        }
    }
}

/// Lazy, finite sequence of remote records; pages are fetched on demand
pub struct RemotePull<'a, C, S> {
    client: &'a RetryingClient<C, S>,
    since: i64,
    cursor: Option<String>,
    buffer: VecDeque<RemoteBook>,
    finished: bool,
}

impl<C: RemoteClient, S: Sleeper> RemotePull<'_, C, S> {
    /// Next record, fetching another page when the current one is drained.
    ///
    /// After an error the sequence ends.
    pub async fn next(&mut self) -> Option<Result<RemoteBook, ClientError>> {
        while self.buffer.is_empty() {
            if self.finished {
                return None;
            }

            match self
                .client
                .pull_page(self.since, self.cursor.as_deref())
                .await
            {
                Ok(page) => {
                    self.buffer.extend(page.records);
                    self.cursor = page.next_cursor;
                    self.finished = self.cursor.is_none();
                }
                Err(error) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(error));
                }
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}
