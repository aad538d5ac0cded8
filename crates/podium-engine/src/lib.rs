//! # podium-engine
//!
//! The evaluation orchestrator for Podium: a cache-first, queue-backed job
//! engine producing on-demand model leaderboards.
//!
//! This crate implements the orchestration domain, providing:
//!
//! - **Fingerprinting**: Deterministic cache keys from canonicalized plans
//! - **Result Storage**: Write-once per-sample outcomes with aggregation
//! - **Task Lifecycle**: A CAS-guarded state machine with sticky terminal
//!   states and strictly monotonic revisions
//! - **Cache Index**: TTL'd aggregate rows with reversible quarantine
//! - **Dispatch**: Cache-hit short-circuiting and linearizable coalescing
//!   of duplicate in-flight work
//! - **Workers**: Lease-guarded execution of a pluggable [`Evaluator`]
//!
//! ## Core Concepts
//!
//! - **Plan**: A validated, structured description of what to evaluate
//! - **Fingerprint**: A content hash identifying equivalent plans
//! - **Task**: One execution attempt with a lifecycle, polled by clients
//! - **Aggregate row**: Mean correctness for one (model, language,
//!   subject, task) slice, indexed by fingerprint
//!
//! ## Guarantees
//!
//! - Two concurrent submissions with the same fingerprint enqueue at most
//!   one task
//! - A task observed `SUCCESS` has all of its aggregates visible in the
//!   cache index
//! - Terminal states are sticky; revisions strictly increase on mutation
//!
//! [`Evaluator`]: crate::evaluator::Evaluator

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod metrics;
pub mod plan;
pub mod queue;
pub mod registry;
pub mod samples;
pub mod stats;
pub mod task;
pub mod taxonomy;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cache::{AggregateRow, CacheIndex, CacheLookup, InMemoryCacheIndex};
    pub use crate::config::EngineConfig;
    pub use crate::credentials::{CredentialSet, CredentialVault, Secret};
    pub use crate::dispatcher::{Dispatcher, SubmitOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::evaluator::{Evaluator, EvaluatorError, ScriptedEvaluator};
    pub use crate::fingerprint::{Fingerprint, SampleSizeBuckets};
    pub use crate::plan::{EvalProfile, Plan, PlanSnapshot};
    pub use crate::queue::{InMemoryJobQueue, JobQueue};
    pub use crate::registry::{InMemoryTaskRegistry, TaskRegistry};
    pub use crate::samples::{InMemorySampleStore, SampleRow, SampleStore};
    pub use crate::task::{FailureKind, Task, TaskStatus};
    pub use crate::worker::WorkerPool;
}
