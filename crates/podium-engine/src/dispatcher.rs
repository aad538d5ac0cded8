//! The dispatcher: cache-first request resolution with linearizable
//! coalescing.
//!
//! `submit` resolves a plan in three steps, all inside a per-fingerprint
//! critical section: consult the in-flight index (attach), consult the
//! cache (short-circuit), otherwise register and enqueue a new task.
//! The critical section guarantees that of two concurrent submissions
//! with the same fingerprint, at most one task enters the queue; the
//! registry's unique in-flight index backs the same guarantee across
//! dispatcher instances.
//!
//! The dispatcher receives its collaborators at construction; nothing
//! here reads hidden process-wide state at operation time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use podium_core::TaskId;

use crate::cache::{AggregateRow, CacheIndex, CacheLookup, CachePolicy};
use crate::cleanup::CleanupSpec;
use crate::config::EngineConfig;
use crate::credentials::{CredentialSet, CredentialVault};
use crate::error::{Error, Result};
use crate::fingerprint::{fingerprint_cleanup, fingerprint_plan, Fingerprint};
use crate::metrics::EngineMetrics;
use crate::plan::{Plan, PlanValidator};
use crate::queue::{JobEnvelope, JobQueue};
use crate::registry::{TaskRegistry, TransitionPatch};
use crate::task::{FailureKind, Task, TaskFailure, TaskPayload, TaskResult, TaskStatus};
use crate::taxonomy::SubjectTaxonomy;

/// Outcome of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// The task to poll (newly created, attached, or synthesized).
    pub task_id: TaskId,
    /// Status at submission time.
    pub status: TaskStatus,
    /// True if cached rows were returned.
    pub cached: bool,
    /// True if the cache covered only a subset of the requested models
    /// and a reduced task was enqueued for the rest.
    pub partial: bool,
    /// True if the submission attached to an already in-flight task.
    pub coalesced: bool,
    /// Cached rows, when `cached`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<AggregateRow>>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOutcome {
    /// The task's status after the request.
    pub status: TaskStatus,
    /// True if this request performed the transition; false if the task
    /// was already terminal.
    pub changed: bool,
}

/// The evaluation control plane's front door.
pub struct Dispatcher {
    registry: Arc<dyn TaskRegistry>,
    cache: Arc<dyn CacheIndex>,
    queue: Arc<dyn JobQueue>,
    vault: Arc<CredentialVault>,
    validator: PlanValidator,
    config: Arc<EngineConfig>,
    metrics: EngineMetrics,
    /// Per-fingerprint critical sections. Entries are created on demand
    /// and dropped once no submission holds them.
    locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        cache: Arc<dyn CacheIndex>,
        queue: Arc<dyn JobQueue>,
        vault: Arc<CredentialVault>,
        taxonomy: SubjectTaxonomy,
        config: Arc<EngineConfig>,
    ) -> Self {
        let validator = PlanValidator::new(taxonomy, config.max_models, config.max_sample_size());
        Self {
            registry,
            cache,
            queue,
            vault,
            validator,
            config,
            metrics: EngineMetrics::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Submits a plan for evaluation.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if the plan fails schema, enum, or
    ///   taxonomy checks (no task is created)
    /// - `Error::Queue` if a newly created task could not be enqueued
    ///   (the task is failed with kind `queue_unavailable`)
    #[tracing::instrument(skip(self, plan), fields(models = plan.models.len()))]
    pub async fn submit(&self, mut plan: Plan) -> Result<SubmitOutcome> {
        self.validator.validate(&mut plan)?;
        let fingerprint = fingerprint_plan(&plan, &self.config.sample_size_buckets)?;

        let lock = self.lock_for(&fingerprint).await;
        let _guard = lock.lock().await;

        // Attach to in-flight work first: an existing non-terminal task
        // for this fingerprint resolves to the same outcome.
        if let Some(existing) = self.registry.find_in_flight(&fingerprint).await? {
            tracing::debug!(task_id = %existing.task_id, fingerprint = %fingerprint, "coalesced onto in-flight task");
            return Ok(SubmitOutcome {
                task_id: existing.task_id,
                status: existing.status,
                cached: false,
                partial: false,
                coalesced: true,
                rows: None,
            });
        }

        // Requests below the reuse floor skip the cache entirely:
        // aggregates over that few samples are too noisy to reuse.
        if plan.profile.sample_size < self.config.min_cache_reuse_samples {
            self.metrics.record_cache_lookup("bypass");
            return self.register_and_enqueue(&plan, fingerprint).await;
        }

        let requested: Vec<String> = plan.model_names();
        let lookup = self.cache.lookup(&fingerprint, &self.cache_policy()).await?;
        let covered: Vec<AggregateRow> = match &lookup {
            CacheLookup::Fresh(rows) => rows
                .iter()
                .filter(|row| requested.contains(&row.model_name))
                .cloned()
                .collect(),
            CacheLookup::Stale | CacheLookup::Miss => Vec::new(),
        };

        let covered_models: Vec<String> = {
            let mut names: Vec<String> =
                covered.iter().map(|row| row.model_name.clone()).collect();
            names.sort_unstable();
            names.dedup();
            names
        };

        if !covered.is_empty() && covered_models.len() == requested.len() {
            // Full hit: synthesize a terminal task so clients can poll
            // it like any other.
            self.metrics.record_cache_lookup("hit");
            return self.record_cache_hit(&plan, fingerprint, covered).await;
        }

        if !covered_models.is_empty() {
            // Partial hit: enqueue a reduced plan for the missing
            // models; the response unions cached rows with the new task.
            self.metrics.record_cache_lookup("partial");
            let missing: Vec<String> = requested
                .iter()
                .filter(|name| !covered_models.contains(name))
                .cloned()
                .collect();
            let reduced = plan.restricted_to(&missing);
            let reduced_fp =
                fingerprint_plan(&reduced, &self.config.sample_size_buckets)?;
            let outcome = self.register_and_enqueue(&reduced, reduced_fp).await?;
            return Ok(SubmitOutcome {
                task_id: outcome.task_id,
                status: outcome.status,
                cached: true,
                partial: true,
                coalesced: outcome.coalesced,
                rows: Some(covered),
            });
        }

        self.metrics.record_cache_lookup(match lookup {
            CacheLookup::Stale => "stale",
            CacheLookup::Fresh(_) | CacheLookup::Miss => "miss",
        });
        self.register_and_enqueue(&plan, fingerprint).await
    }

    /// Submits a maintenance cleanup, tracked by the same task
    /// mechanism as evaluations.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty resource list, or a
    /// queue error if the task could not be enqueued.
    pub async fn submit_cleanup(&self, spec: CleanupSpec) -> Result<SubmitOutcome> {
        if spec.resources.is_empty() {
            return Err(Error::validation(
                "cleanup must name at least one resource",
            ));
        }
        let fingerprint = fingerprint_cleanup(&spec)?;

        let lock = self.lock_for(&fingerprint).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.find_in_flight(&fingerprint).await? {
            return Ok(SubmitOutcome {
                task_id: existing.task_id,
                status: existing.status,
                cached: false,
                partial: false,
                coalesced: true,
                rows: None,
            });
        }

        let task = Task::new(fingerprint, TaskPayload::Maintenance { spec });
        let task_id = self.enqueue_created(task, None).await?;
        Ok(SubmitOutcome {
            task_id,
            status: TaskStatus::Pending,
            cached: false,
            partial: false,
            coalesced: false,
            rows: None,
        })
    }

    /// Cancels a task.
    ///
    /// PENDING and STARTED tasks transition to CANCELLED; terminal
    /// tasks are left untouched and reported as unchanged. The worker
    /// observes the transition at its next cooperative check.
    ///
    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` for unknown tasks.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, task_id: TaskId) -> Result<CancelOutcome> {
        // The CAS can lose to a worker claiming the task (PENDING ->
        // STARTED) between our read and our write; retry against the
        // fresh status. Two losses in a row means the task went
        // terminal, which the loop handles by reporting it.
        for _ in 0..3 {
            let Some(task) = self.registry.get(task_id).await? else {
                return Err(Error::TaskNotFound { task_id });
            };

            if task.is_terminal() {
                return Ok(CancelOutcome {
                    status: task.status,
                    changed: false,
                });
            }

            let outcome = self
                .registry
                .transition(task_id, task.status, TaskStatus::Cancelled, TransitionPatch::none())
                .await?;

            if outcome.is_applied() {
                self.metrics
                    .record_transition(task.status.as_label(), "cancelled");
                self.vault.purge(task_id);
                // A PENDING delivery can be dropped from the queue
                // outright; a STARTED worker observes the terminal
                // status at its next cooperative check and acks on its
                // own.
                if task.status == TaskStatus::Pending {
                    self.queue.ack(task_id).await?;
                }
                return Ok(CancelOutcome {
                    status: TaskStatus::Cancelled,
                    changed: true,
                });
            }
        }

        let current = self
            .registry
            .get(task_id)
            .await?
            .ok_or(Error::TaskNotFound { task_id })?;
        Ok(CancelOutcome {
            status: current.status,
            changed: false,
        })
    }

    /// The freshness policy derived from configuration.
    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: self.config.cache_ttl,
            min_evaluator_version: self.config.min_evaluator_version,
        }
    }

    async fn lock_for(&self, fingerprint: &Fingerprint) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Opportunistically shed locks nobody holds.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn record_cache_hit(
        &self,
        plan: &Plan,
        fingerprint: Fingerprint,
        rows: Vec<AggregateRow>,
    ) -> Result<SubmitOutcome> {
        let task = Task::new_cached_success(
            fingerprint,
            TaskPayload::Evaluation {
                snapshot: plan.snapshot(),
            },
            TaskResult::Evaluation { rows: rows.clone() },
        );
        let task_id = self.registry.create(task).await?;
        tracing::info!(task_id = %task_id, "cache hit; synthesized terminal task");
        Ok(SubmitOutcome {
            task_id,
            status: TaskStatus::Success,
            cached: true,
            partial: false,
            coalesced: false,
            rows: Some(rows),
        })
    }

    async fn register_and_enqueue(
        &self,
        plan: &Plan,
        fingerprint: Fingerprint,
    ) -> Result<SubmitOutcome> {
        let credentials: CredentialSet = plan
            .models
            .iter()
            .map(|m| (m.name.clone(), m.credential.clone()))
            .collect();

        let task = Task::new(
            fingerprint.clone(),
            TaskPayload::Evaluation {
                snapshot: plan.snapshot(),
            },
        );

        match self.enqueue_created(task, Some(credentials)).await {
            Ok(task_id) => Ok(SubmitOutcome {
                task_id,
                status: TaskStatus::Pending,
                cached: false,
                partial: false,
                coalesced: false,
                rows: None,
            }),
            // Another dispatcher instance won the registry's unique
            // index; attach to its task.
            Err(Error::DuplicateFingerprintInFlight { .. }) => {
                let existing = self
                    .registry
                    .find_in_flight(&fingerprint)
                    .await?
                    .ok_or_else(|| Error::storage("in-flight task vanished during attach"))?;
                Ok(SubmitOutcome {
                    task_id: existing.task_id,
                    status: existing.status,
                    cached: false,
                    partial: false,
                    coalesced: true,
                    rows: None,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Creates the task, seals credentials, and enqueues. On enqueue
    /// failure the task is failed with kind `queue_unavailable` and the
    /// envelope purged, so clients polling the task see the failure.
    async fn enqueue_created(
        &self,
        task: Task,
        credentials: Option<CredentialSet>,
    ) -> Result<TaskId> {
        let task_id = self.registry.create(task).await?;

        if let Some(credentials) = credentials {
            self.vault.store(task_id, &credentials);
        }

        match self.queue.enqueue(JobEnvelope::new(task_id)).await {
            Ok(_) => {
                self.metrics.record_transition("created", "pending");
                if let Ok(depth) = self.queue.depth().await {
                    self.metrics.set_queue_depth(depth);
                }
                Ok(task_id)
            }
            Err(err) => {
                tracing::error!(task_id = %task_id, error = %err, "enqueue failed; failing task");
                self.vault.purge(task_id);
                let _ = self
                    .registry
                    .transition(
                        task_id,
                        TaskStatus::Pending,
                        TaskStatus::Failure,
                        TransitionPatch::with_error(TaskFailure::new(
                            FailureKind::QueueUnavailable,
                            "evaluation could not be queued",
                        )),
                    )
                    .await;
                Err(err)
            }
        }
    }
}
