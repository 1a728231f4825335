//! Run modes, phases, and the report of a sync run

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{BookId, EntryId};

/// Phases of a sync run, in the order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Not started
    Idle,
    /// Speculative pull and classification
    CheckingConflicts,
    /// Pushing queued local changes
    Pushing,
    /// Applying remote changes
    Pulling,
    /// Persisting sync points
    Reconciling,
    /// Finished
    Done,
    /// Aborted by a run-level error
    Failed,
    /// Interrupted by the user
    Cancelled,
}

impl SyncPhase {
    /// Stable lowercase name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingConflicts => "checking_conflicts",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
            Self::Reconciling => "reconciling",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the run has stopped in this phase
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Push then pull
    #[default]
    Full,
    /// Push queued changes only
    PushOnly,
    /// Apply remote changes only
    PullOnly,
    /// Pull every remote record from the beginning, no push
    ForcePull,
    /// Classify and report; never writes
    StatusOnly,
}

impl SyncMode {
    /// Stable kebab-case name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::PushOnly => "push-only",
            Self::PullOnly => "pull-only",
            Self::ForcePull => "force-pull",
            Self::StatusOnly => "status-only",
        }
    }

    /// Whether the push phase runs
    pub const fn pushes(self) -> bool {
        matches!(self, Self::Full | Self::PushOnly)
    }

    /// Whether the pull phase runs
    pub const fn pulls(self) -> bool {
        matches!(self, Self::Full | Self::PullOnly | Self::ForcePull)
    }

    /// Whether the run may write to the store
    pub const fn writes(self) -> bool {
        !matches!(self, Self::StatusOnly)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "full" => Ok(Self::Full),
            "push-only" | "push" => Ok(Self::PushOnly),
            "pull-only" | "pull" => Ok(Self::PullOnly),
            "force-pull" => Ok(Self::ForcePull),
            "status-only" | "status" => Ok(Self::StatusOnly),
            _ => Err(Error::InvalidInput(format!("Unknown sync mode: {s}"))),
        }
    }
}

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    /// Keep the local copy and push it
    Local,
    /// Take the remote copy
    Remote,
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

impl FromStr for Winner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "notion" => Ok(Self::Remote),
            _ => Err(Error::InvalidInput(format!("Unknown conflict winner: {s}"))),
        }
    }
}

/// Automatic conflict resolution for a run. The remote is the database of
/// record, so it wins by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoResolvePolicy {
    /// Leave conflicts for manual resolution
    None,
    /// Local copy wins
    Local,
    /// Remote copy wins
    #[default]
    Remote,
}

impl AutoResolvePolicy {
    /// Winner applied by this policy
    pub const fn winner(self) -> Option<Winner> {
        match self {
            Self::None => None,
            Self::Local => Some(Winner::Local),
            Self::Remote => Some(Winner::Remote),
        }
    }
}

impl FromStr for AutoResolvePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "manual" => Ok(Self::None),
            other => other.parse::<Winner>().map(|winner| match winner {
                Winner::Local => Self::Local,
                Winner::Remote => Self::Remote,
            }),
        }
    }
}

/// A per-record problem reported by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    /// Book concerned, when known
    pub book_id: Option<BookId>,
    /// Queue entry concerned, when any
    pub entry_id: Option<EntryId>,
    /// Human-readable description
    pub message: String,
}

/// Overall result of a run, mapped to CLI exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Everything that was attempted succeeded and nothing is left in conflict
    Clean,
    /// Conflicts, per-record errors, or an interrupted run
    Partial,
    /// Run-level failure
    Failed,
}

impl SyncOutcome {
    /// Process exit code for this outcome
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Partial => 2,
            Self::Failed => 1,
        }
    }
}

/// Report of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Mode the run executed in
    pub mode: SyncMode,
    /// Final phase
    pub phase: SyncPhase,
    /// Every phase entered, in order
    pub phases: Vec<SyncPhase>,
    /// Queue entries confirmed by the remote
    pub pushed: usize,
    /// Remote records written locally
    pub pulled: usize,
    /// Books classified as conflicting
    pub conflicts_found: usize,
    /// Conflicts settled by the run's policy
    pub conflicts_auto_resolved: usize,
    /// Per-record problems
    pub errors: Vec<SyncIssue>,
    /// Conflicting books left for manual resolution
    pub unresolved: Vec<BookId>,
    /// Queue entries still pending after the run
    pub pending: usize,
    /// Run-level failure message
    pub failure: Option<String>,
}

impl SyncSummary {
    /// Empty summary of a run about to start
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            phase: SyncPhase::Idle,
            phases: vec![SyncPhase::Idle],
            pushed: 0,
            pulled: 0,
            conflicts_found: 0,
            conflicts_auto_resolved: 0,
            errors: Vec::new(),
            unresolved: Vec::new(),
            pending: 0,
            failure: None,
        }
    }

    /// Move to the next phase and log the transition
    pub fn enter(&mut self, phase: SyncPhase) {
        tracing::info!(mode = %self.mode, from = %self.phase, to = %phase, "Sync phase");
        self.phase = phase;
        self.phases.push(phase);
    }

    /// Record a per-record problem
    pub fn issue(&mut self, book_id: Option<BookId>, entry_id: Option<EntryId>, message: String) {
        tracing::warn!(
            book = ?book_id.map(|id| id.to_string()),
            entry = ?entry_id.map(|id| id.to_string()),
            "{message}"
        );
        self.errors.push(SyncIssue {
            book_id,
            entry_id,
            message,
        });
    }

    /// Clean, partial, or failed
    pub fn outcome(&self) -> SyncOutcome {
        match self.phase {
            SyncPhase::Failed => SyncOutcome::Failed,
            SyncPhase::Cancelled => SyncOutcome::Partial,
            _ if !self.errors.is_empty() || !self.unresolved.is_empty() => SyncOutcome::Partial,
            _ => SyncOutcome::Clean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_capabilities() {
        assert!(SyncMode::Full.pushes() && SyncMode::Full.pulls());
        assert!(!SyncMode::PushOnly.pulls());
        assert!(!SyncMode::PullOnly.pushes());
        assert!(!SyncMode::ForcePull.pushes() && SyncMode::ForcePull.pulls());
        assert!(!SyncMode::StatusOnly.writes());
    }

    #[test]
    fn mode_parses_cli_names() {
        assert_eq!("push-only".parse::<SyncMode>().unwrap(), SyncMode::PushOnly);
        assert_eq!("force_pull".parse::<SyncMode>().unwrap(), SyncMode::ForcePull);
        assert!("sideways".parse::<SyncMode>().is_err());
    }

    #[test]
    fn remote_wins_by_default() {
        assert_eq!(AutoResolvePolicy::default(), AutoResolvePolicy::Remote);
        assert_eq!(AutoResolvePolicy::default().winner(), Some(Winner::Remote));
        assert_eq!(
            "none".parse::<AutoResolvePolicy>().unwrap(),
            AutoResolvePolicy::None
        );
    }

    #[test]
    fn outcome_reflects_conflicts_and_errors() {
        let mut summary = SyncSummary::new(SyncMode::Full);
        summary.enter(SyncPhase::Done);
        assert_eq!(summary.outcome(), SyncOutcome::Clean);

        summary.unresolved.push(BookId::new());
        assert_eq!(summary.outcome(), SyncOutcome::Partial);
        assert_eq!(summary.outcome().exit_code(), 2);

        summary.enter(SyncPhase::Failed);
        assert_eq!(summary.outcome().exit_code(), 1);
    }
}
