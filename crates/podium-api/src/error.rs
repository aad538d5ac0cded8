//! API error types and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use podium_engine::error::Error as EngineError;
use podium_engine::task::FailureKind;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    /// Stable machine-readable error kind.
    pub kind: String,
    /// Human-readable message (safe for clients: no credentials, no
    /// internal paths).
    pub message: String,
    /// Rows that could not be found, for admin operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_rows: Option<Vec<String>>,
}

/// HTTP API error with a stable machine-readable kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    missing_rows: Option<Vec<String>>,
}

impl ApiError {
    /// 400 for schema, enum, or taxonomy violations.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, FailureKind::ValidationError.as_str(), message)
    }

    /// 401 for missing or wrong admin credentials.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 404 for unknown resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 404 carrying the row IDs an admin operation could not find.
    pub fn rows_not_found(missing: Vec<String>) -> Self {
        let mut err = Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{} row(s) not found", missing.len()),
        );
        err.missing_rows = Some(missing);
        err
    }

    /// 409 for state machine violations (e.g. cancel on terminal).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, FailureKind::Conflict.as_str(), message)
    }

    /// 503 for unavailable collaborators.
    pub fn unavailable(kind: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, kind, message)
    }

    /// 500 for everything else.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    /// Returns the HTTP status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            missing_rows: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                kind: self.kind.to_string(),
                message: self.message,
                missing_rows: self.missing_rows,
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        match &value {
            EngineError::Validation { message } => Self::validation(message.clone()),
            EngineError::TaskNotFound { task_id } => {
                Self::not_found(format!("task not found: {task_id}"))
            }
            EngineError::InvalidStateTransition { from, to, .. } => {
                Self::conflict(format!("invalid transition: {from} -> {to}"))
            }
            EngineError::Storage { .. } => Self::unavailable(
                FailureKind::StorageUnavailable.as_str(),
                "persistent store unavailable",
            ),
            EngineError::Queue { .. } => Self::unavailable(
                FailureKind::QueueUnavailable.as_str(),
                "evaluation queue unavailable",
            ),
            // Internal-only kinds never reach clients with detail.
            EngineError::DuplicateFingerprintInFlight { .. }
            | EngineError::CredentialsMissing { .. }
            | EngineError::Serialization { .. }
            | EngineError::Core(_) => Self::internal("internal error"),
        }
    }
}
