//! End-to-end orchestrator tests: dispatcher, queue, workers, and
//! stores wired together exactly as the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use podium_core::TaskId;

use podium_engine::cache::{BrowseFilter, CacheIndex, InMemoryCacheIndex};
use podium_engine::cleanup::{CleanupResource, CleanupSpec};
use podium_engine::config::EngineConfig;
use podium_engine::credentials::{CredentialVault, Secret};
use podium_engine::dispatcher::Dispatcher;
use podium_engine::error::Result;
use podium_engine::evaluator::{Evaluator, ScriptedEvaluator};
use podium_engine::fingerprint::fingerprint_plan;
use podium_engine::metrics::EngineMetrics;
use podium_engine::plan::{
    EvalDirectives, EvalProfile, ModelSpec, Plan, PlanMeta, ProblemType, ProviderKind, TargetType,
    TaskCategory, PLAN_SCHEMA_VERSION,
};
use podium_engine::queue::{InMemoryJobQueue, JobQueue};
use podium_engine::registry::{InMemoryTaskRegistry, TaskRegistry};
use podium_engine::samples::{InMemorySampleStore, SampleRow, SampleStore};
use podium_engine::task::{FailureKind, Task, TaskStatus};
use podium_engine::taxonomy::SubjectTaxonomy;
use podium_engine::worker::{WorkerContext, WorkerPool};

const TEN_SAMPLE_SCRIPT: [f64; 10] = [1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0];

struct Stack {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<dyn TaskRegistry>,
    samples: Arc<dyn SampleStore>,
    cache: Arc<dyn CacheIndex>,
    queue: Arc<InMemoryJobQueue>,
    vault: Arc<CredentialVault>,
    config: Arc<EngineConfig>,
    ctx: WorkerContext,
}

fn test_config() -> EngineConfig {
    EngineConfig {
        task_max_duration: Duration::from_secs(10),
        lease_ttl: Duration::from_millis(150),
        claim_wait: Duration::from_millis(25),
        cancel_latency_bound: Duration::from_millis(500),
        progress_min_interval: Duration::from_millis(10),
        retry_base_backoff: Duration::from_millis(5),
        storage_base_backoff: Duration::from_millis(5),
        worker_concurrency: 2,
        ..EngineConfig::default()
    }
}

fn stack_with(config: EngineConfig, evaluator: Arc<dyn Evaluator>) -> Stack {
    let config = Arc::new(config);
    let registry: Arc<dyn TaskRegistry> = Arc::new(InMemoryTaskRegistry::with_progress_interval(
        config.progress_min_interval,
    ));
    let samples: Arc<dyn SampleStore> = Arc::new(InMemorySampleStore::new());
    let cache: Arc<dyn CacheIndex> = Arc::new(InMemoryCacheIndex::new());
    let queue = Arc::new(InMemoryJobQueue::new("test", config.lease_ttl));
    let vault = Arc::new(CredentialVault::new(config.credential_envelope_ttl));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        cache.clone(),
        queue.clone(),
        vault.clone(),
        SubjectTaxonomy::builtin(),
        config.clone(),
    ));

    let ctx = WorkerContext {
        registry: registry.clone(),
        samples: samples.clone(),
        cache: cache.clone(),
        queue: queue.clone(),
        vault: vault.clone(),
        evaluator,
        config: config.clone(),
        metrics: EngineMetrics::new(),
    };

    Stack {
        dispatcher,
        registry,
        samples,
        cache,
        queue,
        vault,
        config,
        ctx,
    }
}

fn plan(models: &[&str], sample_size: u64) -> Plan {
    Plan {
        schema_version: PLAN_SCHEMA_VERSION,
        meta: PlanMeta {
            name: "test".into(),
            description: String::new(),
        },
        profile: EvalProfile {
            problem_type: ProblemType::Mcqa,
            target_type: TargetType::General,
            task_type: TaskCategory::Knowledge,
            external_tool_usage: false,
            language: "Korean".into(),
            subject_type: vec!["Tech./Coding".into()],
            sample_size,
            seed: Some(42),
        },
        models: models
            .iter()
            .map(|name| ModelSpec {
                name: (*name).to_string(),
                provider_kind: ProviderKind::Openai,
                endpoint: "https://api.example.com/v1".into(),
                credential: Secret::new(format!("sk-{name}")),
            })
            .collect(),
        directives: EvalDirectives {
            batch_size: 5,
            ..EvalDirectives::default()
        },
    }
}

async fn wait_for_terminal(
    registry: &Arc<dyn TaskRegistry>,
    task_id: TaskId,
    timeout: Duration,
) -> Task {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = registry
            .get(task_id)
            .await
            .expect("registry read")
            .expect("task exists");
        if task.is_terminal() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {task_id} did not reach a terminal state (status {})",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn cold_miss_single_model_succeeds() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(ScriptedEvaluator::with_script(TEN_SAMPLE_SCRIPT.to_vec())),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    assert_eq!(outcome.status, TaskStatus::Pending);

    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);

    // Aggregate score is the mean of the scripted correctness.
    let aggregates = stack.samples.aggregate(outcome.task_id).await?;
    let m1 = aggregates.get("m1").expect("m1 aggregate");
    assert!((m1.score - 0.8).abs() < 1e-9);
    assert_eq!(m1.sample_count, 10);

    // One row landed in the cache index.
    let rows = stack.cache.browse(&BrowseFilter::with_limit(10)).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].model_name, "m1");
    assert!((rows[0].score - 0.8).abs() < 1e-9);
    assert_eq!(rows[0].sample_count, 10);
    assert_eq!(rows[0].source_task_id, outcome.task_id);

    // Credentials were purged on the terminal transition.
    assert!(stack.vault.is_empty());

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn success_implies_aggregates_visible() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1", "m2"], 10)).await?;
    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Success);

    // The moment SUCCESS is observable, rows for both models are too.
    let lookup = stack
        .cache
        .lookup(&task.fingerprint, &stack.dispatcher.cache_policy())
        .await?;
    let rows = lookup.fresh_rows().expect("fresh rows");
    let mut models: Vec<&str> = rows.iter().map(|r| r.model_name.as_str()).collect();
    models.sort_unstable();
    assert_eq!(models, vec!["m1", "m2"]);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn second_submit_hits_cache() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));
    let pool = WorkerPool::spawn(stack.ctx.clone());

    // Sample size must clear min_cache_reuse_samples for reuse.
    let first = stack.dispatcher.submit(plan(&["m1"], 100)).await?;
    wait_for_terminal(&stack.registry, first.task_id, Duration::from_secs(10)).await;

    let second = stack.dispatcher.submit(plan(&["m1"], 100)).await?;
    assert!(second.cached);
    assert_eq!(second.status, TaskStatus::Success);
    assert_ne!(second.task_id, first.task_id);
    let rows = second.rows.expect("cached rows");
    assert!((rows[0].score - 1.0).abs() < 1e-9);

    // The synthesized task resolves like a computed one.
    let task = stack
        .registry
        .get(second.task_id)
        .await?
        .expect("synthesized task");
    assert_eq!(task.status, TaskStatus::Success);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn coalesced_submits_resolve_to_same_outcome() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(
            ScriptedEvaluator::perfect().with_delay_per_sample(Duration::from_millis(5)),
        ),
    );

    // Submit twice before any worker runs: exactly one task, one enqueue.
    let first = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    let second = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    assert_eq!(first.task_id, second.task_id);
    assert!(second.coalesced);
    assert_eq!(stack.queue.depth().await?, 1);
    assert_eq!(stack.registry.status_counts().await?.total(), 1);

    let pool = WorkerPool::spawn(stack.ctx.clone());
    let task = wait_for_terminal(&stack.registry, first.task_id, Duration::from_secs(10)).await;
    assert_eq!(task.status, TaskStatus::Success);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn worker_death_reclaims_and_deduplicates() -> Result<()> {
    let config = test_config();
    let stack = stack_with(
        config,
        Arc::new(ScriptedEvaluator::with_script(TEN_SAMPLE_SCRIPT.to_vec())),
    );

    let outcome = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    let task_id = outcome.task_id;

    // A worker claims the delivery, starts the task, writes half the
    // samples, and dies without acking or renewing its lease.
    {
        let job = stack
            .queue
            .claim(Duration::from_millis(200))
            .await?
            .expect("delivery");
        assert_eq!(job.envelope.task_id, task_id);

        let claim = stack
            .registry
            .transition(
                task_id,
                TaskStatus::Pending,
                TaskStatus::Started,
                podium_engine::registry::TransitionPatch::none(),
            )
            .await?;
        assert!(claim.is_applied());

        let partial: Vec<SampleRow> = TEN_SAMPLE_SCRIPT[..5]
            .iter()
            .enumerate()
            .map(|(index, &correctness)| SampleRow {
                model_name: "m1".into(),
                sample_index: u32::try_from(index).unwrap(),
                prompt: format!("sample {index}"),
                answer: format!("answer {index}"),
                correctness,
                skill_label: "Knowledge".into(),
                target_label: "General".into(),
                subject_label: "Tech./Coding".into(),
                task_label: "Knowledge".into(),
                dataset_name: "scripted".into(),
                metadata: serde_json::Value::Null,
                recorded_at: chrono::Utc::now(),
            })
            .collect();
        stack.samples.append_samples(task_id, partial).await?;
        // Worker dies here: the lease is never renewed.
    }

    // After lease_ttl the delivery is reclaimable; a healthy pool picks
    // it up, resets the task, and re-runs it.
    tokio::time::sleep(stack.config.lease_ttl + Duration::from_millis(50)).await;
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let task = wait_for_terminal(&stack.registry, task_id, Duration::from_secs(10)).await;
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.attempt >= 2, "task was reclaimed");

    // Ten canonical samples, not fifteen: the re-written first five were
    // deduplicated by (task, model, index).
    let aggregates = stack.samples.aggregate(task_id).await?;
    let m1 = aggregates.get("m1").expect("aggregate");
    assert_eq!(m1.sample_count, 10);
    assert!((m1.score - 0.8).abs() < 1e-9);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancellation_during_started_stops_within_bound() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(
            ScriptedEvaluator::perfect().with_delay_per_sample(Duration::from_millis(10)),
        ),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1"], 1000)).await?;
    let task_id = outcome.task_id;

    // Wait for the worker to start.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = stack.registry.get(task_id).await?.expect("task");
        if task.status == TaskStatus::Started {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancel = stack.dispatcher.cancel(task_id).await?;
    assert!(cancel.changed);
    assert_eq!(cancel.status, TaskStatus::Cancelled);

    // The worker observes the cancellation within the bound and stops
    // producing samples.
    tokio::time::sleep(stack.config.cancel_latency_bound).await;
    let count_after_bound = stack.samples.count().await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stack.samples.count().await?, count_after_bound);

    // No aggregate row was written; partial samples remain.
    let rows = stack.cache.browse(&BrowseFilter::with_limit(10)).await?;
    assert!(rows.is_empty());

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn retryable_evaluator_errors_are_retried() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(ScriptedEvaluator::perfect().with_retryable_failures(2)),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(10)).await;
    assert_eq!(task.status, TaskStatus::Success);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_the_task() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(ScriptedEvaluator::perfect().with_retryable_failures(10)),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(10)).await;
    assert_eq!(task.status, TaskStatus::Failure);
    let error = task.error.expect("failure record");
    assert_eq!(error.kind, FailureKind::EvaluatorRetryable);
    assert!(error.message.contains("retries exhausted"));

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_credentials_fail_the_task() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));

    let outcome = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    // The envelope disappears before any worker runs (simulating TTL
    // expiry or a process restart).
    stack.vault.purge(outcome.task_id);

    let pool = WorkerPool::spawn(stack.ctx.clone());
    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Failure);
    assert_eq!(task.error.expect("failure").kind, FailureKind::CredentialsMissing);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn deadline_overrun_fails_with_timeout() -> Result<()> {
    let config = EngineConfig {
        task_max_duration: Duration::from_millis(100),
        ..test_config()
    };
    let stack = stack_with(
        config,
        Arc::new(
            ScriptedEvaluator::perfect().with_delay_per_sample(Duration::from_millis(50)),
        ),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let outcome = stack.dispatcher.submit(plan(&["m1"], 1000)).await?;
    let task = wait_for_terminal(&stack.registry, outcome.task_id, Duration::from_secs(5)).await;
    assert_eq!(task.status, TaskStatus::Failure);
    assert_eq!(task.error.expect("failure").kind, FailureKind::Timeout);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn quarantined_rows_do_not_serve_cache_hits() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let first = stack.dispatcher.submit(plan(&["m1"], 100)).await?;
    wait_for_terminal(&stack.registry, first.task_id, Duration::from_secs(10)).await;

    let rows = stack.cache.browse(&BrowseFilter::with_limit(10)).await?;
    stack.cache.quarantine(&[rows[0].row_id], "moderation").await?;

    // The same plan no longer short-circuits.
    let second = stack.dispatcher.submit(plan(&["m1"], 100)).await?;
    assert!(!second.cached);
    assert_eq!(second.status, TaskStatus::Pending);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cleanup_task_reports_and_removes() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));
    let pool = WorkerPool::spawn(stack.ctx.clone());

    // Produce one completed evaluation to clean up.
    let eval = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    wait_for_terminal(&stack.registry, eval.task_id, Duration::from_secs(5)).await;

    // Dry run first: counts, removes nothing. days_old = 0 makes
    // everything eligible.
    let dry = stack
        .dispatcher
        .submit_cleanup(CleanupSpec {
            dry_run: true,
            resources: vec![CleanupResource::Samples],
            days_old: 0,
            limit: 1000,
            hard_delete: false,
        })
        .await?;
    let dry_task = wait_for_terminal(&stack.registry, dry.task_id, Duration::from_secs(5)).await;
    assert_eq!(dry_task.status, TaskStatus::Success);
    assert_eq!(stack.samples.count().await?, 10);

    let wet = stack
        .dispatcher
        .submit_cleanup(CleanupSpec {
            dry_run: false,
            resources: vec![CleanupResource::Samples],
            days_old: 0,
            limit: 1000,
            hard_delete: true,
        })
        .await?;
    let wet_task = wait_for_terminal(&stack.registry, wet.task_id, Duration::from_secs(5)).await;
    assert_eq!(wet_task.status, TaskStatus::Success);
    assert_eq!(stack.samples.count().await?, 0);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn submit_submit_resolves_to_identical_result() -> Result<()> {
    let stack = stack_with(
        test_config(),
        Arc::new(
            ScriptedEvaluator::with_script(TEN_SAMPLE_SCRIPT.to_vec())
                .with_delay_per_sample(Duration::from_millis(10)),
        ),
    );
    let pool = WorkerPool::spawn(stack.ctx.clone());

    let first = stack.dispatcher.submit(plan(&["m1"], 10)).await?;
    let second = stack.dispatcher.submit(plan(&["m1"], 10)).await?;

    let first_task =
        wait_for_terminal(&stack.registry, first.task_id, Duration::from_secs(10)).await;
    let second_task =
        wait_for_terminal(&stack.registry, second.task_id, Duration::from_secs(10)).await;

    // Coalesced: both ids resolve to the same task and thus the same
    // terminal payload.
    assert_eq!(first_task.task_id, second_task.task_id);
    assert_eq!(first_task.status, TaskStatus::Success);

    pool.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fingerprint_stable_across_submissions() -> Result<()> {
    let stack = stack_with(test_config(), Arc::new(ScriptedEvaluator::perfect()));
    let a = fingerprint_plan(&plan(&["m1"], 97), &stack.config.sample_size_buckets)?;
    let b = fingerprint_plan(&plan(&["m1"], 100), &stack.config.sample_size_buckets)?;
    assert_eq!(a, b, "sizes in the same bucket share a fingerprint");
    Ok(())
}
