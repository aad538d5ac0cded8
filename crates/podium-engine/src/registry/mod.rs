//! The task registry: strongly consistent task state with CAS
//! transitions.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: State transitions compare the expected status
//!   before applying, preventing races between workers, cancellation,
//!   and lease reclaims
//! - **Unique in-flight fingerprint**: `create` enforces at most one
//!   non-terminal task per fingerprint, which is the backstop that makes
//!   dispatcher coalescing linearizable
//! - **Rate-limited progress**: progress writes below the configured
//!   minimum interval are dropped to bound write amplification

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use podium_core::TaskId;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::task::{Task, TaskFailure, TaskKind, TaskResult, TaskStatus};

pub use memory::InMemoryTaskRegistry;

/// Result of a compare-and-swap transition.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The transition was applied; carries the new revision.
    Applied {
        /// Revision after the transition.
        revision: u64,
    },
    /// The task does not exist.
    NotFound,
    /// The current status did not match the expected status.
    StatusMismatch {
        /// The status that was actually found.
        actual: TaskStatus,
    },
}

impl CasOutcome {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Optional fields written together with a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    /// Progress to record.
    pub progress: Option<u8>,
    /// Result to attach (SUCCESS transitions).
    pub result: Option<TaskResult>,
    /// Failure to attach (FAILURE transitions).
    pub error: Option<TaskFailure>,
    /// Completion deadline to set (STARTED transitions).
    pub deadline: Option<DateTime<Utc>>,
}

impl TransitionPatch {
    /// An empty patch.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A patch carrying a result.
    #[must_use]
    pub fn with_result(result: TaskResult) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    /// A patch carrying a failure.
    #[must_use]
    pub fn with_error(error: TaskFailure) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// A patch carrying a deadline.
    #[must_use]
    pub fn with_deadline(deadline: DateTime<Utc>) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }
}

/// Filter for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
    /// Restrict to one kind.
    pub kind: Option<TaskKind>,
    /// Restrict to one fingerprint.
    pub fingerprint: Option<Fingerprint>,
    /// Page size (0 means unbounded).
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusCounts {
    /// Tasks in PENDING.
    pub pending: u64,
    /// Tasks in STARTED.
    pub started: u64,
    /// Tasks in SUCCESS.
    pub success: u64,
    /// Tasks in FAILURE.
    pub failure: u64,
    /// Tasks in CANCELLED.
    pub cancelled: u64,
}

impl StatusCounts {
    /// Total tasks.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.started + self.success + self.failure + self.cancelled
    }

    /// Non-terminal tasks.
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.pending + self.started
    }
}

/// Strongly consistent store of tasks.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from the
/// dispatcher, workers, and the API layer.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Registers a new task.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateFingerprintInFlight` if another
    /// non-terminal task exists for the same fingerprint.
    async fn create(&self, task: Task) -> Result<TaskId>;

    /// Gets a task by ID. Returns `None` if unknown.
    async fn get(&self, task_id: TaskId) -> Result<Option<Task>>;

    /// Atomically transitions a task if its current status matches
    /// `expected`, applying the patch fields appropriate to the target.
    async fn transition(
        &self,
        task_id: TaskId,
        expected: TaskStatus,
        target: TaskStatus,
        patch: TransitionPatch,
    ) -> Result<CasOutcome>;

    /// Records progress on a STARTED task.
    ///
    /// Returns `true` if the write was accepted, `false` if it was
    /// dropped by rate limiting or the task is not STARTED.
    async fn record_progress(&self, task_id: TaskId, progress: u8) -> Result<bool>;

    /// Forces a non-terminal task back to PENDING after a lease expiry
    /// (revision bump, attempt bump).
    ///
    /// Returns `true` if the task was reset, `false` if it was already
    /// terminal or unknown.
    async fn reclaim(&self, task_id: TaskId) -> Result<bool>;

    /// Lists tasks matching a filter, newest first.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Returns the non-terminal task for a fingerprint, if one exists.
    async fn find_in_flight(&self, fingerprint: &Fingerprint) -> Result<Option<Task>>;

    /// Counts tasks per status.
    async fn status_counts(&self) -> Result<StatusCounts>;

    /// Durations of recently completed tasks (for the median stat).
    async fn recent_durations(&self, limit: usize) -> Result<Vec<Duration>>;

    /// Terminal tasks completed before `cutoff`, capped by `limit`.
    async fn terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>>;

    /// Deletes the given tasks; returns how many existed.
    async fn delete(&self, task_ids: &[TaskId]) -> Result<usize>;
}
