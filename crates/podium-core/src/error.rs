//! Shared error definitions for Podium components.

/// The result type used throughout podium-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared across Podium components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier failed to parse.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// Input failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A requested entity does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Description of the missing entity.
        message: String,
    },

    /// A serialization or encoding operation failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the encoding failure.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
