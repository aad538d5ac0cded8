//! # podium-core
//!
//! Core abstractions for the Podium evaluation control plane.
//!
//! This crate provides the foundational types used across all Podium
//! components:
//!
//! - **Identifiers**: Strongly-typed, lexicographically sortable IDs for
//!   tasks and leaderboard rows
//! - **Error Types**: Shared error definitions and result types
//! - **Canonical JSON**: Deterministic encoding used for plan
//!   fingerprinting
//! - **Observability**: Logging initialization shared by binaries
//!
//! ## Crate Boundary
//!
//! `podium-core` is the only crate allowed to define shared primitives.
//! The orchestration domain lives in `podium-engine`; the HTTP surface in
//! `podium-api`.
//!
//! ## Example
//!
//! ```rust
//! use podium_core::prelude::*;
//!
//! let task_id = TaskId::generate();
//! assert_eq!(task_id.to_string().len(), 26);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical_json;
pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{RowId, TaskId};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use podium_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::canonical_json::to_canonical_bytes;
    pub use crate::error::{Error, Result};
    pub use crate::id::{RowId, TaskId};
}
