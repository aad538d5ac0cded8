//! `GET /tasks/{task_id}` and `PATCH /tasks/{task_id}`: polling and
//! cancellation.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use podium_core::TaskId;

use podium_engine::registry::TaskRegistry;

use super::TaskView;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Request body for `PATCH /tasks/{task_id}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskPatchRequest {
    /// The only supported action is `cancel`.
    pub action: String,
}

/// Response body for an accepted cancellation.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskPatchResponse {
    /// The task.
    pub task_id: String,
    /// Status after the action.
    pub status: String,
}

/// Builds the `/tasks` router.
pub fn router() -> Router<AppState> {
    Router::new().route("/tasks/:task_id", get(get_task).patch(patch_task))
}

fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("invalid task ID '{raw}'")))
}

/// Returns the task with its redacted payload, progress, and (when
/// terminal) its result or error.
#[utoipa::path(
    get,
    path = "/tasks/{task_id}",
    params(("task_id" = String, Path, description = "Task identifier")),
    responses(
        (status = 200, description = "Task view", body = TaskView),
        (status = 404, description = "Unknown task", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskView>> {
    let task_id = parse_task_id(&task_id)?;
    let task = state
        .registry
        .get(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("task not found: {task_id}")))?;
    Ok(Json(TaskView::from_task(&task)?))
}

/// Applies an action to a task. `cancel` transitions PENDING or STARTED
/// to CANCELLED; a terminal task yields 409.
#[utoipa::path(
    patch,
    path = "/tasks/{task_id}",
    params(("task_id" = String, Path, description = "Task identifier")),
    request_body = TaskPatchRequest,
    responses(
        (status = 200, description = "Transition accepted", body = TaskPatchResponse),
        (status = 404, description = "Unknown task", body = crate::error::ApiErrorBody),
        (status = 409, description = "Task already terminal", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn patch_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(request): Json<TaskPatchRequest>,
) -> ApiResult<Json<TaskPatchResponse>> {
    if request.action != "cancel" {
        return Err(ApiError::validation(format!(
            "unsupported action '{}'",
            request.action
        )));
    }

    let task_id = parse_task_id(&task_id)?;
    let outcome = state.dispatcher.cancel(task_id).await?;
    if !outcome.changed {
        return Err(ApiError::conflict(format!(
            "task is already terminal ({})",
            outcome.status
        )));
    }

    Ok(Json(TaskPatchResponse {
        task_id: task_id.to_string(),
        status: outcome.status.to_string(),
    }))
}
