//! OpenAPI document for the control plane.

use utoipa::OpenApi;

use crate::error::ApiErrorBody;
use crate::routes::evaluate::{DirectivesBody, EvaluateRequest, EvaluateResponse, ModelBody};
use crate::routes::leaderboard::{
    CategoriesResponse, LeaderboardResponse, ModerationRequest, ModerationResponse,
};
use crate::routes::maintenance::{CleanupRequest, CleanupResponse};
use crate::routes::status::{HealthResponse, StatsResponse};
use crate::routes::tasks::{TaskPatchRequest, TaskPatchResponse};
use crate::routes::{LeaderboardRowBody, TaskErrorBody, TaskView};

/// The OpenAPI document for the control-plane routes.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Podium control plane",
        description = "On-demand model leaderboards: submit evaluation plans, poll tasks, browse cached aggregates.",
        version = "0.3.0",
    ),
    paths(
        crate::routes::evaluate::submit,
        crate::routes::tasks::get_task,
        crate::routes::tasks::patch_task,
        crate::routes::leaderboard::browse,
        crate::routes::leaderboard::categories,
        crate::routes::leaderboard::quarantine,
        crate::routes::leaderboard::restore,
        crate::routes::leaderboard::hard_delete,
        crate::routes::maintenance::cleanup,
        crate::routes::status::health,
        crate::routes::status::stats_handler,
    ),
    components(schemas(
        ApiErrorBody,
        CategoriesResponse,
        CleanupRequest,
        CleanupResponse,
        DirectivesBody,
        EvaluateRequest,
        EvaluateResponse,
        HealthResponse,
        LeaderboardResponse,
        LeaderboardRowBody,
        ModelBody,
        ModerationRequest,
        ModerationResponse,
        StatsResponse,
        TaskErrorBody,
        TaskPatchRequest,
        TaskPatchResponse,
        TaskView,
    ))
)]
pub struct ApiDoc;

/// Renders the document as JSON.
#[must_use]
pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_default()
}
