//! Bidirectional sync between the local store and the remote database.
//!
//! [`SyncOrchestrator`] drives runs over any [`RemoteClient`] wrapped in a
//! [`RetryingClient`]. [`NotionClient`] talks to Notion; an in-memory
//! remote stands in for it in tests.

mod classify;
mod client;
#[cfg(test)]
mod memory;
pub mod notion;
mod orchestrator;
mod retry;
mod summary;

pub use classify::{classify, classify_at, Classification};
pub use client::{ClientError, RemoteBook, RemoteClient, RemoteError, RemotePage, RemoteRef};
#[cfg(test)]
pub use memory::MemoryRemote;
pub use notion::{NotionClient, NotionConfig};
pub use orchestrator::{CancelFlag, SyncOptions, SyncOrchestrator};
#[cfg(test)]
pub use retry::RecordingSleeper;
pub use retry::{
    AttemptOutcome, AttemptRecord, RemotePull, RetryPolicy, RetryState, RetryTrace,
    RetryingClient, Sleeper, TokioSleeper,
};
pub use summary::{
    AutoResolvePolicy, SyncIssue, SyncMode, SyncOutcome, SyncPhase, SyncSummary, Winner,
};
