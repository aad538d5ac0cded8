//! The pluggable evaluator contract.
//!
//! The orchestrator never calls model providers itself: an [`Evaluator`]
//! implementation turns a plan snapshot into scored samples. The worker
//! loop owns retries, persistence, aggregation, and the task lifecycle;
//! the evaluator only produces samples and reports progress.
//!
//! [`ScriptedEvaluator`] is the in-process implementation used by tests
//! and development deployments: it emits a scripted correctness sequence
//! per model and can simulate slowness and transient failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::credentials::CredentialSet;
use crate::plan::PlanSnapshot;
use crate::samples::SampleRow;

/// Errors surfaced by an evaluator, classified for retry policy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluatorError {
    /// Transient failure (network timeout, provider 5xx); the worker
    /// retries within the same task with backoff.
    #[error("retryable evaluator error: {message}")]
    Retryable {
        /// Client-safe description.
        message: String,
    },
    /// Permanent failure (bad plan, auth rejection); fails the task
    /// immediately.
    #[error("fatal evaluator error: {message}")]
    Fatal {
        /// Client-safe description.
        message: String,
    },
}

impl EvaluatorError {
    /// Creates a retryable error.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true if the worker may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Receives sample batches as the evaluator produces them.
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Accepts a batch of scored samples.
    ///
    /// # Errors
    ///
    /// Returns an evaluator error when persistence is unavailable; the
    /// evaluator should stop producing.
    async fn emit(&self, rows: Vec<SampleRow>) -> Result<(), EvaluatorError>;
}

/// Receives progress estimates (0..=100).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Reports overall progress. Implementations may drop writes.
    async fn report(&self, progress: u8);
}

/// Cooperative cancellation flag shared between the worker and the
/// evaluator.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One evaluation request handed to the evaluator.
pub struct EvalRequest<'a> {
    /// The redacted plan.
    pub snapshot: &'a PlanSnapshot,
    /// Hydrated credentials, keyed by model name.
    pub credentials: &'a CredentialSet,
    /// Where to stream scored samples.
    pub samples: &'a dyn SampleSink,
    /// Where to report progress.
    pub progress: &'a dyn ProgressSink,
    /// Cooperative cancellation: check between provider calls and stop
    /// starting new ones once set.
    pub cancel: &'a CancelToken,
}

/// Turns a plan snapshot into scored samples.
///
/// Implementations drive the actual benchmark runtime and model
/// provider calls. They must:
///
/// - stream samples through `request.samples` as they are scored
/// - observe `request.cancel` between provider calls
/// - classify failures as retryable or fatal
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Runs one evaluation to completion.
    async fn evaluate(&self, request: EvalRequest<'_>) -> Result<(), EvaluatorError>;

    /// Reports whether the evaluator backend is usable (health surface).
    fn available(&self) -> bool {
        true
    }
}

/// Scripted evaluator for tests and development.
///
/// Emits a fixed correctness sequence per model (cycled if the plan
/// requests more samples than the script provides), optionally sleeping
/// per sample and failing with retryable errors a configured number of
/// times before succeeding.
#[derive(Debug, Default)]
pub struct ScriptedEvaluator {
    scripts: BTreeMap<String, Vec<f64>>,
    fallback: Vec<f64>,
    delay_per_sample: Option<Duration>,
    fail_first_attempts: AtomicU32,
}

impl ScriptedEvaluator {
    /// An evaluator scoring every sample 1.0.
    #[must_use]
    pub fn perfect() -> Self {
        Self {
            fallback: vec![1.0],
            ..Self::default()
        }
    }

    /// An evaluator using `correctness` for every model.
    #[must_use]
    pub fn with_script(correctness: Vec<f64>) -> Self {
        Self {
            fallback: correctness,
            ..Self::default()
        }
    }

    /// Overrides the script for one model.
    #[must_use]
    pub fn with_model_script(mut self, model: impl Into<String>, correctness: Vec<f64>) -> Self {
        self.scripts.insert(model.into(), correctness);
        self
    }

    /// Sleeps this long per emitted sample (for cancellation tests).
    #[must_use]
    pub fn with_delay_per_sample(mut self, delay: Duration) -> Self {
        self.delay_per_sample = Some(delay);
        self
    }

    /// Fails the first `attempts` evaluate calls with a retryable error.
    #[must_use]
    pub fn with_retryable_failures(self, attempts: u32) -> Self {
        self.fail_first_attempts.store(attempts, Ordering::SeqCst);
        self
    }

    fn script_for(&self, model: &str) -> &[f64] {
        let script = self
            .scripts
            .get(model)
            .map_or(self.fallback.as_slice(), Vec::as_slice);
        if script.is_empty() {
            &[1.0]
        } else {
            script
        }
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, request: EvalRequest<'_>) -> Result<(), EvaluatorError> {
        let remaining = self.fail_first_attempts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first_attempts.store(remaining - 1, Ordering::SeqCst);
            return Err(EvaluatorError::retryable("simulated provider timeout"));
        }

        let profile = &request.snapshot.profile;
        let sample_size = profile.sample_size;
        let total = sample_size * request.snapshot.models.len().max(1) as u64;
        let mut produced: u64 = 0;

        for model in &request.snapshot.models {
            if request.credentials.get(&model.name).is_none() {
                return Err(EvaluatorError::fatal(format!(
                    "no credential for model '{}'",
                    model.name
                )));
            }

            let script = self.script_for(&model.name);
            let mut batch = Vec::new();
            for index in 0..sample_size {
                if request.cancel.is_cancelled() {
                    // Flush what we have so partial results persist.
                    if !batch.is_empty() {
                        request.samples.emit(batch).await?;
                    }
                    return Ok(());
                }
                if let Some(delay) = self.delay_per_sample {
                    tokio::time::sleep(delay).await;
                }

                #[allow(clippy::cast_possible_truncation)]
                let correctness = script[(index as usize) % script.len()];
                batch.push(sample_row(request.snapshot, &model.name, index, correctness));
                produced += 1;

                if batch.len() >= request.snapshot.directives.batch_size {
                    request.samples.emit(std::mem::take(&mut batch)).await?;
                    #[allow(clippy::cast_possible_truncation)]
                    let pct = ((produced * 100) / total.max(1)) as u8;
                    request.progress.report(pct).await;
                }
            }
            if !batch.is_empty() {
                request.samples.emit(batch).await?;
            }
        }

        request.progress.report(100).await;
        Ok(())
    }
}

fn sample_row(snapshot: &PlanSnapshot, model: &str, index: u64, correctness: f64) -> SampleRow {
    let profile = &snapshot.profile;
    #[allow(clippy::cast_possible_truncation)]
    SampleRow {
        model_name: model.to_string(),
        sample_index: index as u32,
        prompt: format!("sample {index}"),
        answer: format!("answer {index}"),
        correctness,
        skill_label: profile.task_type.as_str().to_string(),
        target_label: profile.target_type.as_str().to_string(),
        subject_label: profile
            .subject_type
            .first()
            .cloned()
            .unwrap_or_default(),
        task_label: profile.task_type.as_str().to_string(),
        dataset_name: "scripted".to_string(),
        metadata: serde_json::Value::Null,
        recorded_at: Utc::now(),
    }
}
