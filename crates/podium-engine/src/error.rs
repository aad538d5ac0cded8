//! Error types for the orchestration domain.

use podium_core::TaskId;

use crate::fingerprint::Fingerprint;
use crate::task::FailureKind;

/// The result type used throughout podium-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A plan or request failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A task was not found in the registry.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The task ID that was not found.
        task_id: TaskId,
    },

    /// Another non-terminal task already exists for this fingerprint.
    ///
    /// Internal only: the dispatcher converts this into a coalesced
    /// attach and never surfaces it to clients.
    #[error("another task is already in flight for fingerprint {fingerprint}")]
    DuplicateFingerprintInFlight {
        /// The contended fingerprint.
        fingerprint: Fingerprint,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// No credential envelope exists for the task (expired or purged).
    #[error("credentials missing for task {task_id}")]
    CredentialsMissing {
        /// The task whose envelope was not found.
        task_id: TaskId,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The job queue could not enqueue or claim.
    #[error("queue error: {message}")]
    Queue {
        /// Description of the queue failure.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from podium-core.
    #[error("core error: {0}")]
    Core(#[from] podium_core::Error),
}

impl Error {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new queue error.
    #[must_use]
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Returns the wire-level failure kind for this error, if it has one.
    ///
    /// Used by the API layer to map engine errors onto the stable error
    /// kinds clients see.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Validation { .. } => Some(FailureKind::ValidationError),
            Self::DuplicateFingerprintInFlight { .. } => {
                Some(FailureKind::DuplicateFingerprintInFlight)
            }
            Self::InvalidStateTransition { .. } => Some(FailureKind::Conflict),
            Self::CredentialsMissing { .. } => Some(FailureKind::CredentialsMissing),
            Self::Storage { .. } => Some(FailureKind::StorageUnavailable),
            Self::Queue { .. } => Some(FailureKind::QueueUnavailable),
            Self::TaskNotFound { .. } | Self::Serialization { .. } | Self::Core(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = Error::validation("at least one model is required");
        assert!(err.to_string().contains("at least one model"));
    }

    #[test]
    fn state_transition_display() {
        let err = Error::InvalidStateTransition {
            from: "SUCCESS".into(),
            to: "PENDING".into(),
            reason: "terminal states are sticky".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("SUCCESS"));
        assert!(msg.contains("sticky"));
    }

    #[test]
    fn storage_error_with_source() {
        use std::error::Error as StdError;
        let source = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::storage_with_source("sample batch insert failed", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn failure_kind_mapping() {
        assert_eq!(
            Error::validation("x").failure_kind(),
            Some(FailureKind::ValidationError)
        );
        assert_eq!(
            Error::queue("down").failure_kind(),
            Some(FailureKind::QueueUnavailable)
        );
        assert_eq!(
            Error::TaskNotFound {
                task_id: TaskId::generate()
            }
            .failure_kind(),
            None
        );
    }
}
