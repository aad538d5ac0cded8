//! In-memory task registry.
//!
//! Thread-safe implementation of [`TaskRegistry`] backed by a `RwLock`.
//! Suitable for tests, development, and single-process deployments;
//! state is lost when the process exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use podium_core::TaskId;

use super::{CasOutcome, StatusCounts, TaskFilter, TaskRegistry, TransitionPatch};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::task::{Task, TaskStatus};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("task registry lock poisoned")
}

/// In-memory task registry.
#[derive(Debug)]
pub struct InMemoryTaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
    progress_min_interval: Duration,
}

impl InMemoryTaskRegistry {
    /// Creates a registry with the default progress rate limit (500 ms).
    #[must_use]
    pub fn new() -> Self {
        Self::with_progress_interval(Duration::from_millis(500))
    }

    /// Creates a registry with a custom progress rate limit.
    #[must_use]
    pub fn with_progress_interval(progress_min_interval: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            progress_min_interval,
        }
    }
}

impl Default for InMemoryTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn create(&self, task: Task) -> Result<TaskId> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;

        // Unique index on (fingerprint, non-terminal): terminal tasks do
        // not block new work for the same fingerprint. Cache-hit tasks
        // are created terminal, so they pass straight through.
        if !task.is_terminal() {
            let in_flight = tasks
                .values()
                .any(|t| t.fingerprint == task.fingerprint && !t.is_terminal());
            if in_flight {
                return Err(Error::DuplicateFingerprintInFlight {
                    fingerprint: task.fingerprint.clone(),
                });
            }
        }

        let task_id = task.task_id;
        tasks.insert(task_id, task);
        Ok(task_id)
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        Ok(tasks.get(&task_id).cloned())
    }

    async fn transition(
        &self,
        task_id: TaskId,
        expected: TaskStatus,
        target: TaskStatus,
        patch: TransitionPatch,
    ) -> Result<CasOutcome> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;

        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(CasOutcome::NotFound);
        };

        if task.status != expected {
            return Ok(CasOutcome::StatusMismatch {
                actual: task.status,
            });
        }

        task.transition_to(target)?;

        if let Some(progress) = patch.progress {
            task.progress = progress.min(100);
        }
        if let Some(deadline) = patch.deadline {
            task.deadline = Some(deadline);
        }
        match target {
            TaskStatus::Success => {
                task.result = patch.result;
                task.error = None;
            }
            TaskStatus::Failure => {
                task.error = patch.error;
                task.result = None;
            }
            _ => {}
        }

        Ok(CasOutcome::Applied {
            revision: task.revision,
        })
    }

    async fn record_progress(&self, task_id: TaskId, progress: u8) -> Result<bool> {
        let now = Utc::now();
        let min_interval = chrono::Duration::from_std(self.progress_min_interval)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(500));

        let mut tasks = self.tasks.write().map_err(poison_err)?;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Started {
            return Ok(false);
        }
        if let Some(last) = task.last_progress_at {
            if now.signed_duration_since(last) < min_interval {
                return Ok(false);
            }
        }
        task.record_progress(progress, now)?;
        Ok(true)
    }

    async fn reclaim(&self, task_id: TaskId) -> Result<bool> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.is_terminal() {
            return Ok(false);
        }
        if task.status == TaskStatus::Pending {
            // Nothing to reset; the delivery retry alone re-runs it.
            return Ok(true);
        }
        task.force_pending()?;
        tracing::warn!(task_id = %task_id, attempt = task.attempt, "task reclaimed after lease expiry");
        Ok(true)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.kind.is_none_or(|k| t.kind() == k))
            .filter(|t| {
                filter
                    .fingerprint
                    .as_ref()
                    .is_none_or(|f| &t.fingerprint == f)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page: Vec<Task> = matched
            .into_iter()
            .skip(filter.offset)
            .take(if filter.limit == 0 {
                usize::MAX
            } else {
                filter.limit
            })
            .collect();
        Ok(page)
    }

    async fn find_in_flight(&self, fingerprint: &Fingerprint) -> Result<Option<Task>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        Ok(tasks
            .values()
            .find(|t| &t.fingerprint == fingerprint && !t.is_terminal())
            .cloned())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        let mut counts = StatusCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Started => counts.started += 1,
                TaskStatus::Success => counts.success += 1,
                TaskStatus::Failure => counts.failure += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    async fn recent_durations(&self, limit: usize) -> Result<Vec<Duration>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        let mut completed: Vec<&Task> = tasks
            .values()
            .filter(|t| t.is_terminal() && t.duration().is_some())
            .collect();
        completed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));

        Ok(completed
            .into_iter()
            .take(limit)
            .filter_map(|t| t.duration())
            .filter_map(|d| d.to_std().ok())
            .collect())
    }

    async fn terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        let tasks = self.tasks.read().map_err(poison_err)?;
        Ok(tasks
            .values()
            .filter(|t| t.is_terminal() && t.completed_at.is_some_and(|c| c < cutoff))
            .map(|t| t.task_id)
            .take(limit)
            .collect())
    }

    async fn delete(&self, task_ids: &[TaskId]) -> Result<usize> {
        let mut tasks = self.tasks.write().map_err(poison_err)?;
        let mut removed = 0;
        for task_id in task_ids {
            if tasks.remove(task_id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{EvalDirectives, EvalProfile, PlanMeta, PlanSnapshot, ProblemType, TargetType, TaskCategory};
    use crate::task::{FailureKind, TaskFailure, TaskPayload, TaskResult};

    fn fp(seed: char) -> Fingerprint {
        seed.to_string().repeat(64).parse().unwrap()
    }

    fn task(seed: char) -> Task {
        Task::new(
            fp(seed),
            TaskPayload::Evaluation {
                snapshot: PlanSnapshot {
                    schema_version: 2,
                    meta: PlanMeta::default(),
                    profile: EvalProfile {
                        problem_type: ProblemType::Mcqa,
                        target_type: TargetType::General,
                        task_type: TaskCategory::Knowledge,
                        external_tool_usage: false,
                        language: "Korean".into(),
                        subject_type: vec!["Tech./Coding".into()],
                        sample_size: 10,
                        seed: None,
                    },
                    models: vec![],
                    directives: EvalDirectives::default(),
                },
            },
        )
    }

    #[tokio::test]
    async fn create_and_get() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task = task('a');
        let task_id = registry.create(task).await?;

        let fetched = registry.get(task_id).await?.unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.revision, 1);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_in_flight_fingerprint_rejected() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        registry.create(task('a')).await?;

        let err = registry.create(task('a')).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateFingerprintInFlight { .. }));

        // A different fingerprint is fine.
        registry.create(task('b')).await?;
        Ok(())
    }

    #[tokio::test]
    async fn terminal_task_does_not_block_fingerprint() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled, TransitionPatch::none())
            .await?;

        // Same fingerprint is allowed again once the first is terminal.
        registry.create(task('a')).await?;
        Ok(())
    }

    #[tokio::test]
    async fn cas_applies_and_rejects_mismatch() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        let outcome = registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;
        assert!(outcome.is_applied());

        let outcome = registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;
        assert_eq!(
            outcome,
            CasOutcome::StatusMismatch {
                actual: TaskStatus::Started
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn cas_unknown_task_is_not_found() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let outcome = registry
            .transition(
                TaskId::generate(),
                TaskStatus::Pending,
                TaskStatus::Started,
                TransitionPatch::none(),
            )
            .await?;
        assert_eq!(outcome, CasOutcome::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn success_patch_attaches_result() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;
        registry
            .transition(
                task_id,
                TaskStatus::Started,
                TaskStatus::Success,
                TransitionPatch::with_result(TaskResult::Evaluation { rows: vec![] }),
            )
            .await?;

        let fetched = registry.get(task_id).await?.unwrap();
        assert_eq!(fetched.status, TaskStatus::Success);
        assert!(fetched.result.is_some());
        assert!(fetched.error.is_none());
        assert_eq!(fetched.progress, 100);
        Ok(())
    }

    #[tokio::test]
    async fn failure_patch_attaches_error() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;
        registry
            .transition(
                task_id,
                TaskStatus::Started,
                TaskStatus::Failure,
                TransitionPatch::with_error(TaskFailure::new(
                    FailureKind::EvaluatorFatal,
                    "provider rejected the request",
                )),
            )
            .await?;

        let fetched = registry.get(task_id).await?.unwrap();
        assert_eq!(fetched.error.as_ref().unwrap().kind, FailureKind::EvaluatorFatal);
        Ok(())
    }

    #[tokio::test]
    async fn revision_strictly_increases() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        let CasOutcome::Applied { revision: r1 } = registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?
        else {
            panic!("expected applied");
        };
        let CasOutcome::Applied { revision: r2 } = registry
            .transition(task_id, TaskStatus::Started, TaskStatus::Success, TransitionPatch::none())
            .await?
        else {
            panic!("expected applied");
        };
        assert!(r2 > r1);
        Ok(())
    }

    #[tokio::test]
    async fn progress_rate_limited() -> Result<()> {
        let registry = InMemoryTaskRegistry::with_progress_interval(Duration::from_secs(60));
        let task_id = registry.create(task('a')).await?;
        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;

        assert!(registry.record_progress(task_id, 10).await?);
        // Second write inside the interval is dropped.
        assert!(!registry.record_progress(task_id, 20).await?);

        let fetched = registry.get(task_id).await?.unwrap();
        assert_eq!(fetched.progress, 10);
        Ok(())
    }

    #[tokio::test]
    async fn progress_ignored_outside_started() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;
        assert!(!registry.record_progress(task_id, 10).await?);
        Ok(())
    }

    #[tokio::test]
    async fn reclaim_resets_started_task() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;
        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;

        assert!(registry.reclaim(task_id).await?);
        let fetched = registry.get(task_id).await?.unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.attempt, 2);
        Ok(())
    }

    #[tokio::test]
    async fn reclaim_refuses_terminal() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;
        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled, TransitionPatch::none())
            .await?;

        assert!(!registry.reclaim(task_id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn find_in_flight_sees_only_non_terminal() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;

        assert!(registry.find_in_flight(&fp('a')).await?.is_some());
        assert!(registry.find_in_flight(&fp('b')).await?.is_none());

        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled, TransitionPatch::none())
            .await?;
        assert!(registry.find_in_flight(&fp('a')).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn status_counts_and_list_filter() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let a = registry.create(task('a')).await?;
        registry.create(task('b')).await?;
        registry
            .transition(a, TaskStatus::Pending, TaskStatus::Started, TransitionPatch::none())
            .await?;

        let counts = registry.status_counts().await?;
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.started, 1);
        assert_eq!(counts.in_flight(), 2);

        let filter = TaskFilter {
            status: Some(TaskStatus::Started),
            ..TaskFilter::default()
        };
        let started = registry.list(&filter).await?;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].task_id, a);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_queries_and_delete() -> Result<()> {
        let registry = InMemoryTaskRegistry::new();
        let task_id = registry.create(task('a')).await?;
        registry
            .transition(task_id, TaskStatus::Pending, TaskStatus::Cancelled, TransitionPatch::none())
            .await?;

        let future = Utc::now() + chrono::Duration::days(1);
        let old = registry.terminal_older_than(future, 10).await?;
        assert_eq!(old, vec![task_id]);

        assert_eq!(registry.delete(&old).await?, 1);
        assert!(registry.get(task_id).await?.is_none());
        Ok(())
    }
}
