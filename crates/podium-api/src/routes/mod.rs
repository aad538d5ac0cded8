//! Route modules and the wire DTOs they share.
//!
//! Engine types stay inside the engine; every response body here is an
//! explicit wire DTO so the HTTP contract can evolve independently of
//! the domain model.

pub mod evaluate;
pub mod leaderboard;
pub mod maintenance;
pub mod status;
pub mod tasks;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use podium_engine::cache::AggregateRow;
use podium_engine::task::{Task, TaskFailure};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Checks the admin bearer token on admin-scoped routes.
///
/// With no token configured (dev posture) every caller is admin.
pub(crate) fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = state.api_config.admin_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("admin token required"))
    }
}

/// Returns true when the caller presents the admin token (or none is
/// configured). Used where admin scope widens a read instead of gating
/// it.
pub(crate) fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    require_admin(state, headers).is_ok()
}

/// One leaderboard row on the wire.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardRowBody {
    /// Opaque row ID for admin operations.
    pub row_id: String,
    /// Producing plan fingerprint.
    pub fingerprint: String,
    /// Model name.
    pub model_name: String,
    /// Language slice.
    pub language: String,
    /// Subject slice.
    pub subject_type: String,
    /// Task category slice.
    pub task_type: String,
    /// Mean correctness.
    pub score: f64,
    /// Samples behind the score.
    pub sample_count: u64,
    /// Last write to the row.
    pub last_updated: DateTime<Utc>,
    /// Whether the row is quarantined (admin reads only see this true).
    pub quarantined: bool,
    /// Task that produced the row.
    pub source_task_id: String,
}

impl From<AggregateRow> for LeaderboardRowBody {
    fn from(row: AggregateRow) -> Self {
        Self {
            row_id: row.row_id.to_string(),
            fingerprint: row.fingerprint.to_string(),
            model_name: row.model_name,
            language: row.language,
            subject_type: row.subject_type,
            task_type: row.task_type.as_str().to_string(),
            score: row.score,
            sample_count: row.sample_count,
            last_updated: row.last_updated,
            quarantined: row.quarantined,
            source_task_id: row.source_task_id.to_string(),
        }
    }
}

/// A task failure on the wire.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskErrorBody {
    /// Stable failure kind.
    pub kind: String,
    /// Redacted message.
    pub message: String,
}

impl From<&TaskFailure> for TaskErrorBody {
    fn from(failure: &TaskFailure) -> Self {
        Self {
            kind: failure.kind.as_str().to_string(),
            message: failure.message.clone(),
        }
    }
}

/// Full task view for polling clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskView {
    /// Task identifier.
    pub task_id: String,
    /// Lifecycle status (`PENDING`, `STARTED`, `SUCCESS`, `FAILURE`,
    /// `CANCELLED`).
    pub status: String,
    /// Work kind (`evaluation` or `maintenance`).
    pub kind: String,
    /// Progress, 0..=100.
    pub progress: u8,
    /// Strictly increasing revision.
    pub revision: u64,
    /// Delivery attempt.
    pub attempt: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time, once claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// The redacted work payload (plan snapshot or cleanup spec).
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Structured result, present when SUCCESS.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub result: Option<serde_json::Value>,
    /// Failure record, present when FAILURE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskErrorBody>,
}

impl TaskView {
    /// Builds the wire view of a task.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the payload fails to serialize
    /// (it cannot for well-formed tasks).
    pub fn from_task(task: &Task) -> ApiResult<Self> {
        let payload = serde_json::to_value(&task.payload)
            .map_err(|_| ApiError::internal("task payload serialization failed"))?;
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|_| ApiError::internal("task result serialization failed"))?;

        Ok(Self {
            task_id: task.task_id.to_string(),
            status: task.status.to_string(),
            kind: match task.kind() {
                podium_engine::task::TaskKind::Evaluation => "evaluation".to_string(),
                podium_engine::task::TaskKind::Maintenance => "maintenance".to_string(),
            },
            progress: task.progress,
            revision: task.revision,
            attempt: task.attempt,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            payload,
            result,
            error: task.error.as_ref().map(TaskErrorBody::from),
        })
    }
}
