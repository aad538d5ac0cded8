//! Observability metrics for the orchestrator.
//!
//! Exposed via the `metrics` crate facade; binaries decide the exporter
//! (Prometheus in production).
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `podium_tasks_total` | Counter | `from`, `to` | Task state transitions |
//! | `podium_cache_lookups_total` | Counter | `outcome` | Cache lookup outcomes |
//! | `podium_task_duration_seconds` | Histogram | `status` | Terminal task durations |
//! | `podium_queue_depth` | Gauge | - | Claimable deliveries |
//! | `podium_samples_appended_total` | Counter | - | Sample rows persisted |

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: task state transitions.
    pub const TASKS_TOTAL: &str = "podium_tasks_total";
    /// Counter: cache lookup outcomes.
    pub const CACHE_LOOKUPS_TOTAL: &str = "podium_cache_lookups_total";
    /// Histogram: terminal task durations in seconds.
    pub const TASK_DURATION_SECONDS: &str = "podium_task_duration_seconds";
    /// Gauge: claimable deliveries.
    pub const QUEUE_DEPTH: &str = "podium_queue_depth";
    /// Counter: sample rows persisted.
    pub const SAMPLES_APPENDED_TOTAL: &str = "podium_samples_appended_total";
}

/// Thin recording facade over the orchestrator's metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Creates the facade.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a task state transition.
    pub fn record_transition(&self, from: &'static str, to: &'static str) {
        counter!(names::TASKS_TOTAL, "from" => from, "to" => to).increment(1);
    }

    /// Records a cache lookup outcome (`hit`, `partial`, `stale`,
    /// `miss`, `bypass`).
    pub fn record_cache_lookup(&self, outcome: &'static str) {
        counter!(names::CACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Observes a terminal task duration.
    pub fn observe_task_duration(&self, status: &'static str, seconds: f64) {
        histogram!(names::TASK_DURATION_SECONDS, "status" => status).record(seconds);
    }

    /// Updates the queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(names::QUEUE_DEPTH).set(depth as f64);
    }

    /// Records persisted sample rows.
    pub fn record_samples_appended(&self, count: usize) {
        counter!(names::SAMPLES_APPENDED_TOTAL).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_a_noop() {
        let metrics = EngineMetrics::new();
        metrics.record_transition("pending", "started");
        metrics.record_cache_lookup("hit");
        metrics.observe_task_duration("success", 1.5);
        metrics.set_queue_depth(3);
        metrics.record_samples_appended(10);
    }
}
