//! Maintenance cleanup: aged-out tasks, samples, and cache rows.
//!
//! Cleanup requests flow through the same task mechanism as evaluations:
//! the dispatcher registers a maintenance task, the worker loop executes
//! it, and clients poll the task for the report. `dry_run` counts what
//! would be removed without removing anything; `hard_delete` controls
//! whether cache rows are removed outright or quarantined.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheIndex;
use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::samples::SampleStore;

/// A resource class eligible for cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupResource {
    /// Terminal tasks.
    Tasks,
    /// Per-sample rows.
    Samples,
    /// Leaderboard cache rows.
    Cache,
}

impl CleanupResource {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Samples => "samples",
            Self::Cache => "cache",
        }
    }
}

/// Parameters of a cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSpec {
    /// Count only; remove nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Which resource classes to clean.
    pub resources: Vec<CleanupResource>,
    /// Only entries older than this many days are eligible.
    pub days_old: u32,
    /// Per-resource ceiling on removals.
    pub limit: usize,
    /// Remove cache rows outright instead of quarantining them.
    #[serde(default)]
    pub hard_delete: bool,
}

/// Outcome for one resource class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupEntry {
    /// The resource class.
    pub resource: CleanupResource,
    /// Entries matching the age filter (capped by `limit`).
    pub matched: usize,
    /// Entries actually removed (zero on dry runs).
    pub removed: usize,
}

/// The report recorded on the maintenance task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Per-resource outcomes.
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    /// Total entries removed across resources.
    #[must_use]
    pub fn total_removed(&self) -> usize {
        self.entries.iter().map(|e| e.removed).sum()
    }
}

/// Executes a cleanup spec against the stores.
///
/// Task cleanup also removes the samples belonging to the deleted tasks,
/// so sample rows never outlive their task.
///
/// # Errors
///
/// Propagates store errors; a failed resource aborts the run.
pub async fn run_cleanup(
    spec: &CleanupSpec,
    registry: &Arc<dyn TaskRegistry>,
    samples: &Arc<dyn SampleStore>,
    cache: &Arc<dyn CacheIndex>,
) -> Result<CleanupReport> {
    let cutoff = Utc::now() - Duration::days(i64::from(spec.days_old));
    let mut report = CleanupReport {
        dry_run: spec.dry_run,
        entries: Vec::with_capacity(spec.resources.len()),
    };

    for resource in &spec.resources {
        let entry = match resource {
            CleanupResource::Tasks => {
                let task_ids = registry.terminal_older_than(cutoff, spec.limit).await?;
                let matched = task_ids.len();
                let removed = if spec.dry_run {
                    0
                } else {
                    samples.delete_for_tasks(&task_ids).await?;
                    registry.delete(&task_ids).await?
                };
                CleanupEntry {
                    resource: *resource,
                    matched,
                    removed,
                }
            }
            CleanupResource::Samples => {
                let matched = samples.count_older_than(cutoff, spec.limit).await?;
                let removed = if spec.dry_run {
                    0
                } else {
                    samples.delete_older_than(cutoff, spec.limit).await?
                };
                CleanupEntry {
                    resource: *resource,
                    matched,
                    removed,
                }
            }
            CleanupResource::Cache => {
                let matched = cache.count_older_than(cutoff, spec.limit).await?;
                let removed = if spec.dry_run {
                    0
                } else if spec.hard_delete {
                    cache.delete_older_than(cutoff, spec.limit).await?
                } else {
                    cache
                        .quarantine_older_than(cutoff, spec.limit, "aged out by cleanup")
                        .await?
                };
                CleanupEntry {
                    resource: *resource,
                    matched,
                    removed,
                }
            }
        };

        tracing::info!(
            resource = entry.resource.as_str(),
            matched = entry.matched,
            removed = entry.removed,
            dry_run = spec.dry_run,
            "cleanup resource processed"
        );
        report.entries.push(entry);
    }

    Ok(report)
}
