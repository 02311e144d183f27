//! Daemon state machine and status types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::audit::{RunCounts, RunRecord};
use crate::config::ConfigSummary;

/// Lifecycle state of the ingestion daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum DaemonState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
}

impl DaemonState {
    /// State reached by applying `command`, or `None` when it has no effect.
    pub fn apply(self, command: Command) -> Option<DaemonState> {
        use DaemonState::*;

        match (self, command) {
            (Stopped, Command::Start) => Some(Running),
            (Running | Paused, Command::Stop) => Some(Stopped),
            (Running, Command::Pause) => Some(Paused),
            (Paused, Command::Resume) => Some(Running),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Running => "running",
            DaemonState::Paused => "paused",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum Transition {
    Applied { from: DaemonState, to: DaemonState },
    /// No-op; the daemon stays in `state`
    Ignored { state: DaemonState },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// State after the operation.
    pub fn state(&self) -> DaemonState {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Ignored { state } => *state,
        }
    }
}

/// Cumulative counters since the process started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DaemonStats {
    /// Last time the daemon was started
    pub started_at: Option<DateTime<Utc>>,
    pub cycles_completed: u64,
    pub items_fetched: u64,
    pub items_added: u64,
    pub items_skipped: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

impl DaemonStats {
    pub(crate) fn add_counts(&mut self, counts: RunCounts) {
        self.items_fetched += counts.fetched;
        self.items_added += counts.added;
        self.items_skipped += counts.skipped;
    }

    pub(crate) fn add_error(&mut self, error: impl Into<String>) {
        self.errors += 1;
        self.last_error = Some(error.into());
    }
}

/// Point-in-time view of the daemon for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub stats: DaemonStats,
    /// Newest first
    pub recent_runs: Vec<RunRecord>,
    pub config: ConfigSummary,
    /// Signatures held by the dedup index
    pub known_questions: usize,
    /// Run records that could not be written to the store
    pub lost_run_records: u64,
}
