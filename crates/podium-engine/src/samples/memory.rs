//! In-memory sample store.
//!
//! Thread-safe implementation of [`SampleStore`] backed by a `RwLock`.
//! Suitable for tests, development, and single-process deployments;
//! state is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use podium_core::TaskId;

use super::{validate_batch, ModelAggregate, SampleRow, SampleStore};
use crate::error::{Error, Result};

/// Write-once key within a task.
type SampleKey = (String, u32);

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("sample store lock poisoned")
}

/// In-memory, write-once sample store.
#[derive(Debug, Default)]
pub struct InMemorySampleStore {
    rows: RwLock<HashMap<TaskId, BTreeMap<SampleKey, SampleRow>>>,
}

impl InMemorySampleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleStore for InMemorySampleStore {
    async fn append_samples(&self, task_id: TaskId, batch: Vec<SampleRow>) -> Result<usize> {
        validate_batch(&batch)?;

        let mut rows = self.rows.write().map_err(poison_err)?;
        let task_rows = rows.entry(task_id).or_default();

        let mut inserted = 0;
        for row in batch {
            let key = (row.model_name.clone(), row.sample_index);
            if let std::collections::btree_map::Entry::Vacant(slot) = task_rows.entry(key) {
                slot.insert(row);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn aggregate(&self, task_id: TaskId) -> Result<BTreeMap<String, ModelAggregate>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let Some(task_rows) = rows.get(&task_id) else {
            return Ok(BTreeMap::new());
        };

        let mut sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for row in task_rows.values() {
            let entry = sums.entry(row.model_name.clone()).or_insert((0.0, 0));
            entry.0 += row.correctness;
            entry.1 += 1;
        }

        Ok(sums
            .into_iter()
            .map(|(model, (sum, count))| {
                #[allow(clippy::cast_precision_loss)]
                let score = sum / count as f64;
                (
                    model,
                    ModelAggregate {
                        score,
                        sample_count: count,
                    },
                )
            })
            .collect())
    }

    async fn samples_for_task(&self, task_id: TaskId) -> Result<Vec<SampleRow>> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows
            .get(&task_id)
            .map(|task_rows| task_rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.values().map(BTreeMap::len).sum())
    }

    async fn delete_for_tasks(&self, task_ids: &[TaskId]) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let mut removed = 0;
        for task_id in task_ids {
            if let Some(task_rows) = rows.remove(task_id) {
                removed += task_rows.len();
            }
        }
        Ok(removed)
    }

    async fn count_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        let matched = rows
            .values()
            .flat_map(BTreeMap::values)
            .filter(|r| r.recorded_at < cutoff)
            .count();
        Ok(matched.min(limit))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let mut removed = 0;
        for task_rows in rows.values_mut() {
            if removed >= limit {
                break;
            }
            let keys: Vec<SampleKey> = task_rows
                .iter()
                .filter(|(_, r)| r.recorded_at < cutoff)
                .map(|(k, _)| k.clone())
                .take(limit - removed)
                .collect();
            for key in keys {
                task_rows.remove(&key);
                removed += 1;
            }
        }
        rows.retain(|_, task_rows| !task_rows.is_empty());
        Ok(removed)
    }
}
