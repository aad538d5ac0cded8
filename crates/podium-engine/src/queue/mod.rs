//! The job queue abstraction: durable enqueue and lease-based claim.
//!
//! This module provides:
//!
//! - [`JobQueue`]: Trait over the delivery mechanism
//! - [`JobEnvelope`]: The serializable queue message
//! - [`Lease`]: Time-bounded exclusive ownership of a delivery
//! - [`InMemoryJobQueue`]: In-memory implementation for tests and
//!   single-process deployments
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: the engine runs on any queue that supports
//!   durable enqueue plus lease-based claim
//! - **Opaque payloads**: `plan_ref` means nothing to the queue; workers
//!   resolve it against the task registry
//! - **Leases survive worker death**: a lease not renewed within its TTL
//!   makes the delivery reclaimable by another worker

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use podium_core::TaskId;

use crate::error::Result;

pub use memory::InMemoryJobQueue;

/// The message handed to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Task this delivery belongs to.
    pub task_id: TaskId,
    /// Opaque reference resolved by workers (the task registry key).
    pub plan_ref: String,
    /// When the job was enqueued.
    pub enqueue_ts: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates an envelope for a task.
    #[must_use]
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            plan_ref: task_id.to_string(),
            enqueue_ts: Utc::now(),
        }
    }
}

/// Time-bounded exclusive ownership of a claimed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Unique lease identifier.
    pub lease_id: String,
    /// Task the lease covers.
    pub task_id: TaskId,
    /// When ownership lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

/// A claimed delivery.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The queue message.
    pub envelope: JobEnvelope,
    /// Ownership of this delivery.
    pub lease: Lease,
    /// True if a previous lease on this delivery expired; the claimer
    /// must force the task back to PENDING before starting it.
    pub reclaimed: bool,
}

/// Result of enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The job is durable in the queue.
    Enqueued {
        /// Queue-assigned message ID.
        message_id: String,
    },
    /// A live delivery already exists for this task.
    Deduplicated,
}

impl EnqueueResult {
    /// Returns true if a new delivery was created.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }
}

/// Delivery mechanism abstraction.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from the
/// dispatcher and multiple workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job. Returns once the job is durable to the queue.
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<EnqueueResult>;

    /// Claims the next job, blocking up to `wait`.
    ///
    /// Returns `None` if nothing became claimable within the window.
    async fn claim(&self, wait: Duration) -> Result<Option<ClaimedJob>>;

    /// Extends ownership of a claimed delivery.
    ///
    /// # Errors
    ///
    /// Returns a queue error if the lease was already lost.
    async fn renew(&self, lease: &Lease) -> Result<Lease>;

    /// Finalizes a delivery successfully.
    async fn ack(&self, task_id: TaskId) -> Result<()>;

    /// Returns a delivery to the queue for another attempt.
    async fn nack(&self, task_id: TaskId, reason: &str) -> Result<()>;

    /// Approximate number of claimable jobs.
    async fn depth(&self) -> Result<usize>;

    /// The queue's name or identifier.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes() {
        let envelope = JobEnvelope::new(TaskId::generate());
        let json = serde_json::to_string(&envelope).unwrap();
        let back: JobEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, envelope.task_id);
        assert_eq!(back.plan_ref, envelope.plan_ref);
    }

    #[test]
    fn enqueue_result_is_enqueued() {
        assert!(EnqueueResult::Enqueued {
            message_id: "msg-1".into()
        }
        .is_enqueued());
        assert!(!EnqueueResult::Deduplicated.is_enqueued());
    }
}
