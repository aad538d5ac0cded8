//! Aggregated engine statistics for the stats surface.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheIndex;
use crate::error::Result;
use crate::registry::{StatusCounts, TaskRegistry};

/// How many completed tasks feed the median duration.
const DURATION_SAMPLE: usize = 100;

/// A point-in-time snapshot of engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Task counts per status.
    pub tasks: StatusCounts,
    /// Total cache rows (including quarantined).
    pub cache_rows: usize,
    /// Non-terminal tasks.
    pub in_flight: u64,
    /// Median duration of recently completed tasks, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_task_duration_ms: Option<u64>,
    /// Worker loops in this process.
    pub worker_count: usize,
    /// Whether the evaluator backend reports itself usable.
    pub evaluator_available: bool,
}

/// Gathers a stats snapshot from the registry and cache.
///
/// # Errors
///
/// Propagates store errors.
pub async fn gather(
    registry: &Arc<dyn TaskRegistry>,
    cache: &Arc<dyn CacheIndex>,
    worker_count: usize,
    evaluator_available: bool,
) -> Result<EngineStats> {
    let tasks = registry.status_counts().await?;
    let cache_rows = cache.count().await?;
    let durations = registry.recent_durations(DURATION_SAMPLE).await?;

    Ok(EngineStats {
        tasks,
        cache_rows,
        in_flight: tasks.in_flight(),
        median_task_duration_ms: median(durations).map(|d| {
            u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
        }),
        worker_count,
        evaluator_available,
    })
}

fn median(mut durations: Vec<Duration>) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    durations.sort_unstable();
    Some(durations[durations.len() / 2])
}
