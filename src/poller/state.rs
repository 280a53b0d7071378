//! Worker state machine and shared status record.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one polling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Launched but the task has not started its loop yet.
    Idle,
    /// Poll loop is running.
    Running,
    /// Shutdown signal observed, loop is winding down.
    Stopping,
    /// Loop exited cleanly.
    Stopped,
    /// Loop ended on an unrecoverable error or forced termination.
    Failed,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            // From Idle
            (Idle, Running) | (Idle, Failed) |
            // From Running
            (Running, Stopping) | (Running, Failed) |
            // From Stopping
            (Stopping, Stopped) | (Stopping, Failed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Check if the worker is still alive (loop running or winding down).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
struct StatusInner {
    state: WorkerState,
    reason: Option<String>,
    last_activity: Option<DateTime<Utc>>,
}

/// Live status record for one worker.
///
/// Written by the owning worker, read by the supervisor. The mutex keeps
/// every read an atomic snapshot: the supervisor never observes a state
/// without its matching reason.
#[derive(Debug)]
pub struct WorkerStatus {
    account_id: String,
    inner: Mutex<StatusInner>,
}

impl WorkerStatus {
    pub(crate) fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            inner: Mutex::new(StatusInner {
                state: WorkerState::Idle,
                reason: None,
                last_activity: None,
            }),
        }
    }

    /// Account this worker polls.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Point-in-time copy of the full status.
    pub fn snapshot(&self) -> WorkerSnapshot {
        let inner = self.lock();
        WorkerSnapshot {
            account_id: self.account_id.clone(),
            state: inner.state,
            reason: inner.reason.clone(),
            last_activity: inner.last_activity,
        }
    }

    /// Apply a state transition. Invalid transitions are ignored — the
    /// state machine is the source of truth, late writers lose.
    pub(crate) fn transition(&self, target: WorkerState, reason: Option<String>) {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(target) {
            tracing::debug!(
                account = %self.account_id,
                from = %inner.state,
                to = %target,
                "Ignoring invalid worker state transition"
            );
            return;
        }
        inner.state = target;
        inner.reason = reason;
    }

    /// Force the worker into `Failed` unless it already reached a terminal
    /// state. Returns whether the write happened. Used by the supervisor
    /// when a worker overruns the shutdown grace period.
    pub(crate) fn force_fail(&self, reason: &str) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = WorkerState::Failed;
        inner.reason = Some(reason.to_string());
        true
    }

    /// Record a completed poll cycle.
    pub(crate) fn touch(&self) {
        self.lock().last_activity = Some(Utc::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        self.inner.lock().expect("worker status mutex poisoned")
    }
}

/// Point-in-time view of one worker, safe to hold across awaits.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    /// Account this worker polls.
    pub account_id: String,
    /// State at snapshot time.
    pub state: WorkerState,
    /// Failure reason, when `state` is `failed`.
    pub reason: Option<String>,
    /// When the worker last completed a poll cycle.
    pub last_activity: Option<DateTime<Utc>>,
}
