//! Task lifecycle: the state machine clients poll against.
//!
//! This module provides:
//! - `TaskStatus`: the five-state lifecycle with sticky terminal states
//! - `Task`: one execution attempt for one (plan, fingerprint) pair
//! - `TaskFailure` / `FailureKind`: the stable error vocabulary
//!
//! Invariants:
//! - timestamps are monotone (`created_at <= started_at <= completed_at`)
//! - terminal states are sticky; no transition leaves them
//! - `revision` strictly increases on any mutation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use podium_core::TaskId;

use crate::cache::AggregateRow;
use crate::cleanup::{CleanupReport, CleanupSpec};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::plan::PlanSnapshot;

/// Task lifecycle state.
///
/// ```text
///         ┌───────────┐
///         │  PENDING  │  initial
///         └─────┬─────┘
///               │ worker claim
///         ┌─────▼─────┐
///         │  STARTED  │  (progress updates allowed)
///         └┬────┬────┬┘
///   success│    │fail│cancel
///         ┌▼───┐┌▼──┐┌▼────────┐
///         │SUCC││FAIL││CANCELLED│  terminal
///         └────┘└───┘└─────────┘
/// ```
///
/// Cancellation is also valid from PENDING (the task never started).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created and enqueued, not yet claimed.
    Pending,
    /// Claimed by a worker, actively executing.
    Started,
    /// Completed successfully; aggregates are visible in the cache.
    Success,
    /// Failed terminally; `error` carries the kind and message.
    Failure,
    /// Cancelled by a client or by self-cancellation on deadline.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    /// Returns true if the transition from self to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Started | Self::Cancelled | Self::Failure),
            Self::Started => matches!(target, Self::Success | Self::Failure | Self::Cancelled),
            Self::Success | Self::Failure | Self::Cancelled => false,
        }
    }

    /// Returns all valid target states from the current state.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Pending => vec![Self::Started, Self::Cancelled, Self::Failure],
            Self::Started => vec![Self::Success, Self::Failure, Self::Cancelled],
            Self::Success | Self::Failure | Self::Cancelled => vec![],
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Started => write!(f, "STARTED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Stable, machine-readable failure vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Plan failed schema or enum checks.
    ValidationError,
    /// Another task is in flight for the same fingerprint (internal
    /// only; converted into a coalesced attach, never surfaced).
    DuplicateFingerprintInFlight,
    /// The credential envelope expired or the process restarted.
    CredentialsMissing,
    /// The persistent store stayed unreachable through all retries.
    StorageUnavailable,
    /// The job queue could not enqueue or claim.
    QueueUnavailable,
    /// A transient evaluator error (retried within the task).
    EvaluatorRetryable,
    /// A permanent evaluator error.
    EvaluatorFatal,
    /// The task exceeded its maximum duration.
    Timeout,
    /// Recorded terminal cancellation (not an error).
    Cancelled,
    /// A state transition violated the state machine.
    Conflict,
}

impl FailureKind {
    /// Returns the exact wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::DuplicateFingerprintInFlight => "duplicate_fingerprint_in_flight",
            Self::CredentialsMissing => "credentials_missing",
            Self::StorageUnavailable => "storage_unavailable",
            Self::QueueUnavailable => "queue_unavailable",
            Self::EvaluatorRetryable => "evaluator_retryable",
            Self::EvaluatorFatal => "evaluator_fatal",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Conflict => "conflict",
        }
    }
}

/// Terminal failure information recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure kind.
    pub kind: FailureKind,
    /// Redacted, client-safe message.
    pub message: String,
}

impl TaskFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What kind of work a task tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// A model evaluation.
    Evaluation,
    /// A maintenance cleanup.
    Maintenance,
}

/// The work payload carried by a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// A model evaluation with its redacted plan.
    Evaluation {
        /// The credential-free plan snapshot.
        snapshot: PlanSnapshot,
    },
    /// A maintenance cleanup request.
    Maintenance {
        /// The cleanup parameters.
        spec: CleanupSpec,
    },
}

impl TaskPayload {
    /// Returns the task kind for this payload.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Evaluation { .. } => TaskKind::Evaluation,
            Self::Maintenance { .. } => TaskKind::Maintenance,
        }
    }
}

/// The structured result recorded on a successful task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    /// Aggregate leaderboard rows produced by an evaluation.
    Evaluation {
        /// One row per (model, language, subject, task) slice.
        rows: Vec<AggregateRow>,
    },
    /// The report of a maintenance cleanup.
    Maintenance {
        /// Per-resource counts.
        report: CleanupReport,
    },
}

/// One execution attempt for one (plan, fingerprint) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, opaque task identifier.
    pub task_id: TaskId,
    /// Cache identity of the underlying work.
    pub fingerprint: Fingerprint,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Completion estimate, 0..=100.
    pub progress: u8,
    /// The work payload (redacted plan or cleanup spec).
    pub payload: TaskPayload,
    /// Structured result, present once SUCCESS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Failure record, present once FAILURE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Strictly increasing on every mutation.
    pub revision: u64,
    /// Delivery attempt (1-indexed; bumped on lease reclaim).
    pub attempt: u32,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Hard completion deadline, set when the task starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Timestamp of the last accepted progress write (rate limiting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_progress_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a new PENDING task.
    #[must_use]
    pub fn new(fingerprint: Fingerprint, payload: TaskPayload) -> Self {
        Self {
            task_id: TaskId::generate(),
            fingerprint,
            status: TaskStatus::Pending,
            progress: 0,
            payload,
            result: None,
            error: None,
            revision: 1,
            attempt: 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            deadline: None,
            last_progress_at: None,
        }
    }

    /// Creates a task that is already terminal SUCCESS, used when a
    /// cache hit synthesizes a completed task.
    #[must_use]
    pub fn new_cached_success(
        fingerprint: Fingerprint,
        payload: TaskPayload,
        result: TaskResult,
    ) -> Self {
        let now = Utc::now();
        let mut task = Self::new(fingerprint, payload);
        task.status = TaskStatus::Success;
        task.progress = 100;
        task.result = Some(result);
        task.started_at = Some(now);
        task.completed_at = Some(now);
        task.revision = 2;
        task
    }

    /// Returns true if the task is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Returns the plan snapshot, if this is an evaluation task.
    #[must_use]
    pub fn snapshot(&self) -> Option<&PlanSnapshot> {
        match &self.payload {
            TaskPayload::Evaluation { snapshot } => Some(snapshot),
            TaskPayload::Maintenance { .. } => None,
        }
    }

    /// Returns true if `now` is past the task deadline.
    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    /// Transitions to `target`, updating timestamps and bumping the
    /// revision.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the move is not an
    /// edge of the state machine.
    #[tracing::instrument(
        skip(self),
        fields(task_id = %self.task_id, from = %self.status, to = %target)
    )]
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!(
                    "valid transitions from {}: {:?}",
                    self.status,
                    self.status.valid_transitions()
                ),
            });
        }

        let now = Utc::now();
        match target {
            TaskStatus::Started => {
                self.started_at = Some(now);
            }
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Cancelled => {
                self.completed_at = Some(now);
                if target == TaskStatus::Success {
                    self.progress = 100;
                }
            }
            TaskStatus::Pending => {}
        }

        self.status = target;
        self.revision += 1;
        Ok(())
    }

    /// Records progress during STARTED, bumping the revision.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the task is not
    /// STARTED.
    pub fn record_progress(&mut self, progress: u8, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::Started {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: self.status.to_string(),
                reason: "progress updates are only allowed in STARTED".to_string(),
            });
        }
        self.progress = progress.min(100);
        self.last_progress_at = Some(now);
        self.revision += 1;
        Ok(())
    }

    /// Forces a non-terminal task back to PENDING after a lease expiry,
    /// bumping the attempt and revision.
    ///
    /// This is the one move outside the forward state machine; it exists
    /// so a task orphaned by worker death becomes claimable again.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the task is terminal.
    pub fn force_pending(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
                reason: "terminal states are sticky".to_string(),
            });
        }
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.deadline = None;
        self.progress = 0;
        self.last_progress_at = None;
        self.attempt += 1;
        self.revision += 1;
        Ok(())
    }

    /// Task duration, when the task has started and completed.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{EvalDirectives, EvalProfile, PlanMeta, ProblemType, TargetType};

    fn test_payload() -> TaskPayload {
        TaskPayload::Evaluation {
            snapshot: PlanSnapshot {
                schema_version: 2,
                meta: PlanMeta::default(),
                profile: EvalProfile {
                    problem_type: ProblemType::Mcqa,
                    target_type: TargetType::General,
                    task_type: crate::plan::TaskCategory::Knowledge,
                    external_tool_usage: false,
                    language: "Korean".into(),
                    subject_type: vec!["Tech./Coding".into()],
                    sample_size: 10,
                    seed: None,
                },
                models: vec![],
                directives: EvalDirectives::default(),
            },
        }
    }

    fn test_fingerprint() -> Fingerprint {
        "a".repeat(64).parse().unwrap()
    }

    #[test]
    fn status_state_machine() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Started));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Failure));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Success));

        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Success));
        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Failure));
        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Started.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn terminal_states_are_sticky() {
        for terminal in [TaskStatus::Success, TaskStatus::Failure, TaskStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(terminal.valid_transitions().is_empty());
        }
    }

    #[test]
    fn happy_path_updates_timestamps_and_revision() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.revision, 1);

        task.transition_to(TaskStatus::Started).unwrap();
        assert!(task.started_at.is_some());
        assert_eq!(task.revision, 2);

        task.transition_to(TaskStatus::Success).unwrap();
        assert!(task.completed_at.is_some());
        assert_eq!(task.progress, 100);
        assert_eq!(task.revision, 3);
        assert!(task.completed_at.unwrap() >= task.started_at.unwrap());
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        let err = task.transition_to(TaskStatus::Success).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.revision, 1);
    }

    #[test]
    fn transition_out_of_terminal_rejected() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        task.transition_to(TaskStatus::Cancelled).unwrap();
        assert!(task.transition_to(TaskStatus::Started).is_err());
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn progress_requires_started() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        assert!(task.record_progress(50, Utc::now()).is_err());

        task.transition_to(TaskStatus::Started).unwrap();
        task.record_progress(50, Utc::now()).unwrap();
        assert_eq!(task.progress, 50);

        task.record_progress(250, Utc::now()).unwrap();
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn force_pending_resets_execution_state() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        task.transition_to(TaskStatus::Started).unwrap();
        task.record_progress(40, Utc::now()).unwrap();
        let revision = task.revision;

        task.force_pending().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.attempt, 2);
        assert!(task.started_at.is_none());
        assert!(task.revision > revision);
    }

    #[test]
    fn force_pending_rejected_on_terminal() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        task.transition_to(TaskStatus::Started).unwrap();
        task.transition_to(TaskStatus::Success).unwrap();
        assert!(task.force_pending().is_err());
    }

    #[test]
    fn cached_success_task_is_terminal() {
        let task = Task::new_cached_success(
            test_fingerprint(),
            test_payload(),
            TaskResult::Evaluation { rows: vec![] },
        );
        assert!(task.is_terminal());
        assert_eq!(task.progress, 100);
        assert!(task.result.is_some());
    }

    #[test]
    fn status_wire_form_is_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    #[test]
    fn failure_kind_wire_form() {
        assert_eq!(FailureKind::StorageUnavailable.as_str(), "storage_unavailable");
        assert_eq!(
            serde_json::to_string(&FailureKind::EvaluatorFatal).unwrap(),
            "\"evaluator_fatal\""
        );
    }

    #[test]
    fn deadline_check() {
        let mut task = Task::new(test_fingerprint(), test_payload());
        assert!(!task.is_past_deadline(Utc::now()));
        task.deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(task.is_past_deadline(Utc::now()));
    }
}
