//! In-memory job queue with lease-based claims.
//!
//! Thread-safe implementation of [`JobQueue`] for tests and
//! single-process deployments. Deliveries are not durable across process
//! restarts; leases and reclaim behavior match the production contract.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use ulid::Ulid;

use podium_core::TaskId;

use super::{ClaimedJob, EnqueueResult, JobEnvelope, JobQueue, Lease};
use crate::error::{Error, Result};

/// Converts a lock poison error to a queue error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::queue("job queue lock poisoned")
}

/// A delivery waiting to be claimed.
#[derive(Debug, Clone)]
struct ReadyEntry {
    envelope: JobEnvelope,
    /// True if a previous lease on this delivery expired.
    reclaimed: bool,
}

/// A delivery currently under lease.
#[derive(Debug, Clone)]
struct LeasedEntry {
    envelope: JobEnvelope,
    lease_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ReadyEntry>,
    leased: HashMap<TaskId, LeasedEntry>,
}

impl QueueState {
    /// Moves expired leases back to the front of the ready queue.
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<TaskId> = self
            .leased
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(task_id, _)| *task_id)
            .collect();

        for task_id in expired {
            if let Some(entry) = self.leased.remove(&task_id) {
                tracing::warn!(task_id = %task_id, "lease expired; delivery reclaimable");
                self.ready.push_front(ReadyEntry {
                    envelope: entry.envelope,
                    reclaimed: true,
                });
            }
        }
    }

    fn has_live_delivery(&self, task_id: TaskId) -> bool {
        self.leased.contains_key(&task_id)
            || self.ready.iter().any(|e| e.envelope.task_id == task_id)
    }
}

/// In-memory job queue.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    lease_ttl: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryJobQueue {
    /// Creates a queue with the given name and lease TTL.
    #[must_use]
    pub fn new(name: impl Into<String>, lease_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            lease_ttl,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lease_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.lease_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(30))
    }

    fn try_claim(&self) -> Result<Option<ClaimedJob>> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poison_err)?;
        state.reclaim_expired(now);

        let Some(entry) = state.ready.pop_front() else {
            return Ok(None);
        };

        let lease = Lease {
            lease_id: Ulid::new().to_string(),
            task_id: entry.envelope.task_id,
            expires_at: self.lease_expiry(now),
        };
        state.leased.insert(
            entry.envelope.task_id,
            LeasedEntry {
                envelope: entry.envelope.clone(),
                lease_id: lease.lease_id.clone(),
                expires_at: lease.expires_at,
            },
        );

        Ok(Some(ClaimedJob {
            envelope: entry.envelope,
            lease,
            reclaimed: entry.reclaimed,
        }))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<EnqueueResult> {
        {
            let mut state = self.state.lock().map_err(poison_err)?;
            if state.has_live_delivery(envelope.task_id) {
                return Ok(EnqueueResult::Deduplicated);
            }
            state.ready.push_back(ReadyEntry {
                envelope,
                reclaimed: false,
            });
        }
        self.notify.notify_one();
        Ok(EnqueueResult::Enqueued {
            message_id: Ulid::new().to_string(),
        })
    }

    async fn claim(&self, wait: Duration) -> Result<Option<ClaimedJob>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.try_claim()? {
                return Ok(Some(job));
            }
            let notified = self.notify.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // One last poll so an expiring lease within the window is
                // not missed.
                return self.try_claim();
            }
        }
    }

    async fn renew(&self, lease: &Lease) -> Result<Lease> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poison_err)?;

        let Some(entry) = state.leased.get_mut(&lease.task_id) else {
            return Err(Error::queue(format!(
                "lease {} lost: delivery no longer leased",
                lease.lease_id
            )));
        };
        if entry.lease_id != lease.lease_id {
            return Err(Error::queue(format!(
                "lease {} lost: delivery re-leased to another worker",
                lease.lease_id
            )));
        }
        if entry.expires_at <= now {
            return Err(Error::queue(format!("lease {} expired", lease.lease_id)));
        }

        entry.expires_at = self.lease_expiry(now);
        Ok(Lease {
            lease_id: entry.lease_id.clone(),
            task_id: lease.task_id,
            expires_at: entry.expires_at,
        })
    }

    async fn ack(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.state.lock().map_err(poison_err)?;
        state.leased.remove(&task_id);
        state.ready.retain(|e| e.envelope.task_id != task_id);
        Ok(())
    }

    async fn nack(&self, task_id: TaskId, reason: &str) -> Result<()> {
        {
            let mut state = self.state.lock().map_err(poison_err)?;
            if let Some(entry) = state.leased.remove(&task_id) {
                tracing::debug!(task_id = %task_id, reason, "delivery returned to queue");
                state.ready.push_front(ReadyEntry {
                    envelope: entry.envelope,
                    reclaimed: true,
                });
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let state = self.state.lock().map_err(poison_err)?;
        Ok(state.ready.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
