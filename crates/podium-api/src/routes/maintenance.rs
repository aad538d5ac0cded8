//! `POST /maintenance/cleanup`: admin cleanup, tracked as a task.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use podium_engine::cleanup::{CleanupResource, CleanupSpec};

use super::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Request body for `POST /maintenance/cleanup`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CleanupRequest {
    /// Count only; remove nothing.
    #[serde(default)]
    pub dry_run: bool,
    /// Resource classes to clean (`tasks`, `samples`, `cache`).
    #[schema(value_type = Vec<String>)]
    pub resources: Vec<CleanupResource>,
    /// Only entries older than this many days are eligible.
    pub days_old: u32,
    /// Per-resource ceiling on removals.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Remove cache rows outright instead of quarantining them.
    #[serde(default)]
    pub hard_delete: bool,
}

const fn default_limit() -> usize {
    1000
}

/// Response body: the maintenance task to poll.
#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    /// The tracking task.
    pub task_id: String,
    /// Status at submission time.
    pub status: String,
    /// True if an identical in-flight cleanup was reused.
    pub coalesced: bool,
}

/// Builds the `/maintenance` router.
pub fn router() -> Router<AppState> {
    Router::new().route("/maintenance/cleanup", post(cleanup))
}

/// Schedules a cleanup run. Progress and the final report are tracked
/// by the returned task.
#[utoipa::path(
    post,
    path = "/maintenance/cleanup",
    request_body = CleanupRequest,
    responses(
        (status = 202, description = "Cleanup task accepted", body = CleanupResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiErrorBody),
        (status = 401, description = "Admin token required", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CleanupRequest>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&state, &headers)?;
    let Json(request) = payload
        .map_err(|rejection| ApiError::validation(format!("invalid request body: {rejection}")))?;

    let outcome = state
        .dispatcher
        .submit_cleanup(CleanupSpec {
            dry_run: request.dry_run,
            resources: request.resources,
            days_old: request.days_old,
            limit: request.limit,
            hard_delete: request.hard_delete,
        })
        .await?;

    tracing::info!(task_id = %outcome.task_id, dry_run = request.dry_run, "cleanup scheduled");
    Ok((
        StatusCode::ACCEPTED,
        Json(CleanupResponse {
            task_id: outcome.task_id.to_string(),
            status: outcome.status.to_string(),
            coalesced: outcome.coalesced,
        }),
    ))
}
