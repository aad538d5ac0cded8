//! The result store: append-only, write-once per-sample outcomes.
//!
//! Samples are write-once per `(task_id, model_name, sample_index)`.
//! Duplicate appends are discarded, which is what makes worker retries
//! and lease reclaims safe: a task re-run after worker death rewrites
//! the same triples and the second write of each is a no-op.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use podium_core::TaskId;

use crate::error::{Error, Result};

pub use memory::InMemorySampleStore;

/// One scored item produced during a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    /// Model that produced the answer.
    pub model_name: String,
    /// Position of the sample within the model's run (write-once key).
    pub sample_index: u32,
    /// The prompt shown to the model.
    pub prompt: String,
    /// The model's answer.
    pub answer: String,
    /// Correctness in `[0, 1]`.
    pub correctness: f64,
    /// Skill label copied from the source row.
    pub skill_label: String,
    /// Target label copied from the source row.
    pub target_label: String,
    /// Subject label copied from the source row.
    pub subject_label: String,
    /// Task label copied from the source row.
    pub task_label: String,
    /// Source dataset name.
    pub dataset_name: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the sample was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl SampleRow {
    /// Returns true if correctness is within `[0, 1]`.
    #[must_use]
    pub fn correctness_in_range(&self) -> bool {
        self.correctness.is_finite() && (0.0..=1.0).contains(&self.correctness)
    }
}

/// Per-model aggregate over a task's samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelAggregate {
    /// Mean correctness.
    pub score: f64,
    /// Number of samples.
    pub sample_count: u64,
}

/// Append-only store of sample rows.
///
/// ## Thread Safety
///
/// Concurrent appends are safe by construction: the write-once key
/// includes the sample index, so the first write of a triple wins and
/// later writes are discarded.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Atomically appends a batch of rows for a task.
    ///
    /// Rows whose `(model_name, sample_index)` already exist for the
    /// task are discarded. Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns a validation error if any row's correctness is outside
    /// `[0, 1]`, or a storage error if the batch could not be persisted.
    async fn append_samples(&self, task_id: TaskId, rows: Vec<SampleRow>) -> Result<usize>;

    /// Computes mean correctness grouped by model for a task.
    async fn aggregate(&self, task_id: TaskId) -> Result<BTreeMap<String, ModelAggregate>>;

    /// Returns all rows for a task, ordered by (model, index).
    async fn samples_for_task(&self, task_id: TaskId) -> Result<Vec<SampleRow>>;

    /// Total stored rows.
    async fn count(&self) -> Result<usize>;

    /// Removes all rows belonging to the given tasks; returns how many
    /// rows were removed.
    async fn delete_for_tasks(&self, task_ids: &[TaskId]) -> Result<usize>;

    /// Counts rows recorded before `cutoff`, capped by `limit`.
    async fn count_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Removes up to `limit` rows recorded before `cutoff`; returns how
    /// many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;
}

pub(crate) fn validate_batch(rows: &[SampleRow]) -> Result<()> {
    for row in rows {
        if !row.correctness_in_range() {
            return Err(Error::validation(format!(
                "sample correctness {} for model '{}' index {} is outside [0, 1]",
                row.correctness, row.model_name, row.sample_index
            )));
        }
    }
    Ok(())
}
