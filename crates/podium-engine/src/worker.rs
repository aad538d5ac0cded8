//! The worker loop: claims deliveries, drives the evaluator, and owns
//! the terminal transition.
//!
//! Ownership is lease-based: a claimed delivery is renewed in the
//! background for as long as the worker holds it, so a worker that dies
//! silently loses the lease and the delivery becomes reclaimable. The
//! claimer of a reclaimed delivery forces the task back to PENDING
//! before starting it; samples rewritten by the re-run are deduplicated
//! by the result store's write-once key.
//!
//! Correctness property: sample writes and aggregate writes happen
//! strictly before the final state transition, so a task observed
//! SUCCESS has all of its aggregates visible in the cache index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;

use podium_core::TaskId;

use crate::cache::{AggregateKey, AggregateUpsert, CacheIndex};
use crate::cleanup::run_cleanup;
use crate::config::EngineConfig;
use crate::credentials::CredentialVault;
use crate::error::{Error, Result};
use crate::evaluator::{
    CancelToken, EvalRequest, Evaluator, EvaluatorError, ProgressSink, SampleSink,
};
use crate::fingerprint::Fingerprint;
use crate::metrics::EngineMetrics;
use crate::plan::PlanSnapshot;
use crate::queue::{ClaimedJob, JobQueue, Lease};
use crate::registry::{TaskRegistry, TransitionPatch};
use crate::samples::{SampleRow, SampleStore};
use crate::task::{FailureKind, Task, TaskFailure, TaskPayload, TaskResult, TaskStatus};

/// Everything a worker needs, passed explicitly at construction.
#[derive(Clone)]
pub struct WorkerContext {
    /// Task registry (C3).
    pub registry: Arc<dyn TaskRegistry>,
    /// Sample store (C2).
    pub samples: Arc<dyn SampleStore>,
    /// Cache index (C4).
    pub cache: Arc<dyn CacheIndex>,
    /// Job queue (C6).
    pub queue: Arc<dyn JobQueue>,
    /// Credential vault.
    pub vault: Arc<CredentialVault>,
    /// The pluggable evaluator.
    pub evaluator: Arc<dyn Evaluator>,
    /// Engine configuration.
    pub config: Arc<EngineConfig>,
    /// Metrics facade.
    pub metrics: EngineMetrics,
}

/// A pool of worker loops sharing one context.
pub struct WorkerPool {
    worker_count: usize,
    shutdown: CancelToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.worker_concurrency` worker loops plus a janitor
    /// that purges expired credential envelopes and refreshes the queue
    /// depth gauge.
    #[must_use]
    pub fn spawn(ctx: WorkerContext) -> Self {
        let shutdown = CancelToken::new();
        let concurrency = ctx.config.worker_concurrency;
        let mut handles = Vec::with_capacity(concurrency + 1);
        for worker_id in 0..concurrency {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, &ctx, &shutdown).await;
            }));
        }
        {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                janitor_loop(&ctx, &shutdown).await;
            }));
        }
        Self {
            worker_count: concurrency,
            shutdown,
            handles,
        }
    }

    /// Number of worker loops (the janitor is not counted).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Signals shutdown and waits for the loops to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(worker_id: usize, ctx: &WorkerContext, shutdown: &CancelToken) {
    tracing::debug!(worker_id, "worker loop started");
    while !shutdown.is_cancelled() {
        match ctx.queue.claim(ctx.config.claim_wait).await {
            Ok(Some(job)) => {
                let task_id = job.envelope.task_id;
                if let Err(err) = handle_delivery(ctx, job).await {
                    tracing::error!(worker_id, task_id = %task_id, error = %err, "delivery handling failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(worker_id, error = %err, "claim failed; backing off");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    tracing::debug!(worker_id, "worker loop stopped");
}

/// Background housekeeping: expired envelope purge and queue depth
/// metric refresh.
async fn janitor_loop(ctx: &WorkerContext, shutdown: &CancelToken) {
    let tick = ctx
        .config
        .credential_envelope_ttl
        .min(Duration::from_secs(30))
        .max(Duration::from_millis(100));
    while !shutdown.is_cancelled() {
        tokio::time::sleep(tick).await;
        let purged = ctx.vault.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired credential envelopes purged");
        }
        if let Ok(depth) = ctx.queue.depth().await {
            ctx.metrics.set_queue_depth(depth);
        }
    }
}

/// How one task run ended, before the terminal transition.
enum Completion {
    Success(TaskResult),
    Cancelled,
    Failed(TaskFailure),
}

async fn handle_delivery(ctx: &WorkerContext, job: ClaimedJob) -> Result<()> {
    let task_id = job.envelope.task_id;

    if job.reclaimed {
        ctx.registry.reclaim(task_id).await?;
    }

    let Some(task) = ctx.registry.get(task_id).await? else {
        // Task record gone (cleanup raced the queue); drop the delivery.
        ctx.queue.ack(task_id).await?;
        return Ok(());
    };
    if task.is_terminal() {
        // Cancelled (or otherwise finished) while queued.
        ctx.queue.ack(task_id).await?;
        return Ok(());
    }

    let deadline = Utc::now()
        + chrono::Duration::from_std(ctx.config.task_max_duration)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
    let claim = ctx
        .registry
        .transition(
            task_id,
            TaskStatus::Pending,
            TaskStatus::Started,
            TransitionPatch::with_deadline(deadline),
        )
        .await?;
    if !claim.is_applied() {
        // Someone else owns or finished the task.
        ctx.queue.ack(task_id).await?;
        return Ok(());
    }
    ctx.metrics.record_transition("pending", "started");

    let renewal = spawn_lease_renewal(ctx.queue.clone(), job.lease.clone(), ctx.config.lease_ttl);
    let cancel = CancelToken::new();
    let watcher = spawn_cancel_watcher(
        ctx.registry.clone(),
        task_id,
        cancel.clone(),
        cancel_poll_interval(ctx.config.cancel_latency_bound),
    );

    let completion = match &task.payload {
        TaskPayload::Evaluation { snapshot } => {
            run_evaluation(ctx, &task, snapshot, &cancel, deadline).await
        }
        TaskPayload::Maintenance { spec } => {
            match run_cleanup(spec, &ctx.registry, &ctx.samples, &ctx.cache).await {
                Ok(report) => Completion::Success(TaskResult::Maintenance { report }),
                Err(err) => Completion::Failed(TaskFailure::new(
                    err.failure_kind().unwrap_or(FailureKind::StorageUnavailable),
                    "cleanup failed",
                )),
            }
        }
    };

    renewal.abort();
    watcher.abort();

    finalize(ctx, &task, completion).await
}

async fn finalize(ctx: &WorkerContext, task: &Task, completion: Completion) -> Result<()> {
    let task_id = task.task_id;
    let (target, patch, label) = match completion {
        Completion::Success(result) => (
            TaskStatus::Success,
            TransitionPatch::with_result(result),
            "success",
        ),
        Completion::Cancelled => (TaskStatus::Cancelled, TransitionPatch::none(), "cancelled"),
        Completion::Failed(failure) => {
            tracing::warn!(task_id = %task_id, kind = failure.kind.as_str(), "task failed");
            (
                TaskStatus::Failure,
                TransitionPatch::with_error(failure),
                "failure",
            )
        }
    };

    let outcome = ctx
        .registry
        .transition(task_id, TaskStatus::Started, target, patch)
        .await?;
    if outcome.is_applied() {
        ctx.metrics.record_transition("started", target.as_label());
        if let Some(fresh) = ctx.registry.get(task_id).await? {
            if let Some(duration) = fresh.duration().and_then(|d| d.to_std().ok()) {
                ctx.metrics.observe_task_duration(label, duration.as_secs_f64());
            }
        }
    }
    // On a lost race (e.g. a cancel landed first) the terminal state of
    // the winner stands; ours is discarded.

    ctx.vault.purge(task_id);
    ctx.queue.ack(task_id).await?;
    Ok(())
}

async fn run_evaluation(
    ctx: &WorkerContext,
    task: &Task,
    snapshot: &PlanSnapshot,
    cancel: &CancelToken,
    deadline: DateTime<Utc>,
) -> Completion {
    let task_id = task.task_id;

    let credentials = match ctx.vault.hydrate(task_id) {
        Ok(credentials) => credentials,
        Err(_) => {
            return Completion::Failed(TaskFailure::new(
                FailureKind::CredentialsMissing,
                "credential envelope expired or missing",
            ));
        }
    };

    let sink = StoreSampleSink {
        samples: ctx.samples.clone(),
        task_id,
        max_attempts: ctx.config.storage_max_attempts,
        base_backoff: ctx.config.storage_base_backoff,
        metrics: ctx.metrics,
        storage_failed: AtomicBool::new(false),
    };
    let progress = RegistryProgressSink {
        registry: ctx.registry.clone(),
        task_id,
    };

    let mut attempt: u32 = 1;
    loop {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        let now = Utc::now();
        if now > deadline {
            return Completion::Failed(TaskFailure::new(
                FailureKind::Timeout,
                "task exceeded its maximum duration",
            ));
        }
        let remaining = (deadline - now)
            .to_std()
            .unwrap_or(Duration::from_millis(1));

        let request = EvalRequest {
            snapshot,
            credentials: &credentials,
            samples: &sink,
            progress: &progress,
            cancel,
        };

        match tokio::time::timeout(remaining, ctx.evaluator.evaluate(request)).await {
            Err(_elapsed) => {
                return Completion::Failed(TaskFailure::new(
                    FailureKind::Timeout,
                    "task exceeded its maximum duration",
                ));
            }
            Ok(Ok(())) => {
                if cancel.is_cancelled() {
                    // Partial samples stay in the result store; no
                    // aggregate is written.
                    return Completion::Cancelled;
                }
                return match write_aggregates(ctx, task, snapshot).await {
                    Ok(rows) => Completion::Success(TaskResult::Evaluation { rows }),
                    Err(err) => {
                        tracing::error!(task_id = %task_id, error = %err, "aggregate write failed");
                        Completion::Failed(TaskFailure::new(
                            FailureKind::StorageUnavailable,
                            "result aggregation failed",
                        ))
                    }
                };
            }
            Ok(Err(err)) => {
                if sink.storage_failed.load(Ordering::SeqCst) {
                    return Completion::Failed(TaskFailure::new(
                        FailureKind::StorageUnavailable,
                        "sample persistence failed after retries",
                    ));
                }
                match err {
                    EvaluatorError::Retryable { message } => {
                        if attempt >= ctx.config.evaluator_max_attempts {
                            return Completion::Failed(TaskFailure::new(
                                FailureKind::EvaluatorRetryable,
                                format!("retries exhausted: {message}"),
                            ));
                        }
                        let backoff = backoff_with_jitter(ctx.config.retry_base_backoff, attempt);
                        tracing::debug!(
                            task_id = %task_id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "retryable evaluator error; backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    EvaluatorError::Fatal { message } => {
                        return Completion::Failed(TaskFailure::new(
                            FailureKind::EvaluatorFatal,
                            message,
                        ));
                    }
                }
            }
        }
    }
}

/// Derives aggregate rows from the result store and writes them to the
/// cache index. Runs strictly before the SUCCESS transition.
async fn write_aggregates(
    ctx: &WorkerContext,
    task: &Task,
    snapshot: &PlanSnapshot,
) -> Result<Vec<crate::cache::AggregateRow>> {
    let rows = ctx.samples.samples_for_task(task.task_id).await?;
    if rows.is_empty() {
        return Err(Error::storage("no samples recorded for completed task"));
    }

    let upserts = derive_upserts(
        &task.fingerprint,
        task.task_id,
        snapshot,
        &rows,
        ctx.config.evaluator_version,
    );
    ctx.cache.upsert_rows(upserts).await
}

/// Groups samples by (model, subject label) into cache upserts. The
/// language and task slices come from the plan profile.
fn derive_upserts(
    fingerprint: &Fingerprint,
    task_id: TaskId,
    snapshot: &PlanSnapshot,
    rows: &[SampleRow],
    evaluator_version: u32,
) -> Vec<AggregateUpsert> {
    use std::collections::BTreeMap;

    let language = snapshot.profile.language.trim().to_lowercase();
    let task_type = snapshot.profile.task_type;

    let mut groups: BTreeMap<(String, String), (f64, u64)> = BTreeMap::new();
    for row in rows {
        let subject = if row.subject_label.is_empty() {
            snapshot
                .profile
                .subject_type
                .first()
                .cloned()
                .unwrap_or_default()
        } else {
            row.subject_label.clone()
        };
        let entry = groups
            .entry((row.model_name.clone(), subject))
            .or_insert((0.0, 0));
        entry.0 += row.correctness;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|((model_name, subject_type), (sum, count))| {
            #[allow(clippy::cast_precision_loss)]
            let score = sum / count as f64;
            AggregateUpsert {
                key: AggregateKey {
                    fingerprint: fingerprint.clone(),
                    model_name,
                    language: language.clone(),
                    subject_type,
                    task_type,
                },
                score,
                sample_count: count,
                evaluator_version,
                source_task_id: task_id,
            }
        })
        .collect()
}

fn cancel_poll_interval(bound: Duration) -> Duration {
    (bound / 5).max(Duration::from_millis(25))
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1_u32 << attempt.min(8).saturating_sub(1));
    #[allow(clippy::cast_possible_truncation)]
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
    exp + Duration::from_millis(jitter_ms)
}

fn spawn_lease_renewal(
    queue: Arc<dyn JobQueue>,
    lease: Lease,
    lease_ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    let interval = (lease_ttl / 3).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut lease = lease;
        loop {
            tokio::time::sleep(interval).await;
            match queue.renew(&lease).await {
                Ok(renewed) => lease = renewed,
                Err(err) => {
                    tracing::warn!(task_id = %lease.task_id, error = %err, "lease renewal failed");
                    break;
                }
            }
        }
    })
}

fn spawn_cancel_watcher(
    registry: Arc<dyn TaskRegistry>,
    task_id: TaskId,
    cancel: CancelToken,
    poll: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll).await;
            match registry.get(task_id).await {
                Ok(Some(task)) if task.status == TaskStatus::Cancelled => {
                    cancel.cancel();
                    break;
                }
                Ok(Some(task)) if task.is_terminal() => break,
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    })
}

/// Streams evaluator batches into the result store with bounded
/// retries.
struct StoreSampleSink {
    samples: Arc<dyn SampleStore>,
    task_id: TaskId,
    max_attempts: u32,
    base_backoff: Duration,
    metrics: EngineMetrics,
    storage_failed: AtomicBool,
}

#[async_trait]
impl SampleSink for StoreSampleSink {
    async fn emit(&self, rows: Vec<SampleRow>) -> std::result::Result<(), EvaluatorError> {
        let mut attempt: u32 = 1;
        loop {
            match self.samples.append_samples(self.task_id, rows.clone()).await {
                Ok(inserted) => {
                    self.metrics.record_samples_appended(inserted);
                    return Ok(());
                }
                Err(Error::Validation { message }) => {
                    // A malformed sample is an evaluator bug, not a
                    // storage outage.
                    return Err(EvaluatorError::fatal(message));
                }
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(
                        task_id = %self.task_id,
                        attempt,
                        error = %err,
                        "sample batch write failed; retrying"
                    );
                    tokio::time::sleep(backoff_with_jitter(self.base_backoff, attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.storage_failed.store(true, Ordering::SeqCst);
                    return Err(EvaluatorError::fatal(format!(
                        "sample persistence failed: {err}"
                    )));
                }
            }
        }
    }
}

/// Forwards evaluator progress into the registry (which rate-limits).
struct RegistryProgressSink {
    registry: Arc<dyn TaskRegistry>,
    task_id: TaskId,
}

#[async_trait]
impl ProgressSink for RegistryProgressSink {
    async fn report(&self, progress: u8) {
        if let Err(err) = self.registry.record_progress(self.task_id, progress).await {
            tracing::debug!(task_id = %self.task_id, error = %err, "progress write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempts() {
        let base = Duration::from_millis(100);
        let first = backoff_with_jitter(base, 1);
        let third = backoff_with_jitter(base, 3);
        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
    }

    #[test]
    fn cancel_poll_has_floor() {
        assert_eq!(
            cancel_poll_interval(Duration::from_secs(5)),
            Duration::from_secs(1)
        );
        assert_eq!(
            cancel_poll_interval(Duration::from_millis(10)),
            Duration::from_millis(25)
        );
    }
}
