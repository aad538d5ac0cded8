//! `/leaderboard`: filtered browsing, categories, and admin moderation.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use podium_core::RowId;
use podium_engine::cache::{BrowseFilter, CacheIndex};
use podium_engine::plan::TaskCategory;

use super::{is_admin, require_admin, LeaderboardRowBody};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// Query parameters for `GET /leaderboard`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrowseParams {
    /// Exact language match.
    pub language: Option<String>,
    /// Exact subject match.
    pub subject_type: Option<String>,
    /// Exact task category match.
    pub task_type: Option<String>,
    /// Case-insensitive model name substring.
    pub model_name: Option<String>,
    /// Inclusive lower score bound.
    pub score_min: Option<f64>,
    /// Inclusive upper score bound.
    pub score_max: Option<f64>,
    /// Only rows updated strictly after this instant (RFC 3339).
    pub updated_after: Option<DateTime<Utc>>,
    /// Page size (default 100, max 1000).
    pub limit: Option<usize>,
    /// Page offset.
    pub offset: Option<usize>,
    /// Include quarantined rows (admin-scoped callers only).
    pub include_quarantined: Option<bool>,
}

/// Response body for `GET /leaderboard`.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    /// Matching rows, score descending.
    pub rows: Vec<LeaderboardRowBody>,
    /// Page size applied.
    pub limit: usize,
    /// Page offset applied.
    pub offset: usize,
}

/// Response body for `GET /leaderboard/categories`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CategoriesResponse {
    /// Distinct languages.
    pub languages: Vec<String>,
    /// Distinct subject tags.
    pub subject_types: Vec<String>,
    /// Distinct task categories.
    pub task_types: Vec<String>,
}

/// Request body for quarantine and restore.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ModerationRequest {
    /// Rows to act on.
    pub row_ids: Vec<String>,
    /// Reason recorded on the rows (quarantine only).
    #[serde(default)]
    pub reason: String,
}

/// Response body for admin mutations.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModerationResponse {
    /// Rows that were updated.
    pub updated: Vec<String>,
}

/// Builds the `/leaderboard` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/leaderboard", get(browse))
        .route("/leaderboard/categories", get(categories))
        .route("/leaderboard/quarantine", post(quarantine))
        .route("/leaderboard/restore", post(restore))
        .route("/leaderboard/:row_id", delete(hard_delete))
}

fn parse_row_ids(raw: &[String]) -> ApiResult<Vec<RowId>> {
    raw.iter()
        .map(|s| {
            s.parse()
                .map_err(|_| ApiError::validation(format!("invalid row ID '{s}'")))
        })
        .collect()
}

/// Browses leaderboard rows. Quarantined rows are excluded unless an
/// admin-scoped caller asks for them.
#[utoipa::path(
    get,
    path = "/leaderboard",
    responses(
        (status = 200, description = "Matching rows", body = LeaderboardResponse),
        (status = 400, description = "Invalid filter", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn browse(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<BrowseParams>,
) -> ApiResult<Json<LeaderboardResponse>> {
    let task_type = params
        .task_type
        .as_deref()
        .map(|raw| {
            TaskCategory::parse(raw)
                .ok_or_else(|| ApiError::validation(format!("invalid task_type '{raw}'")))
        })
        .transpose()?;

    let include_quarantined =
        params.include_quarantined.unwrap_or(false) && is_admin(&state, &headers);

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let filter = BrowseFilter {
        language: params.language,
        subject_type: params.subject_type,
        task_type,
        model_name: params.model_name,
        score_min: params.score_min,
        score_max: params.score_max,
        updated_after: params.updated_after,
        include_quarantined,
        limit,
        offset,
    };

    let rows = state.cache.browse(&filter).await?;
    Ok(Json(LeaderboardResponse {
        rows: rows.into_iter().map(LeaderboardRowBody::from).collect(),
        limit,
        offset,
    }))
}

/// Lists distinct slice values present in the cache.
#[utoipa::path(
    get,
    path = "/leaderboard/categories",
    responses((status = 200, description = "Distinct slice values", body = CategoriesResponse))
)]
pub(crate) async fn categories(State(state): State<AppState>) -> ApiResult<Json<CategoriesResponse>> {
    let categories = state.cache.categories().await?;
    Ok(Json(CategoriesResponse {
        languages: categories.languages,
        subject_types: categories.subject_types,
        task_types: categories
            .task_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect(),
    }))
}

/// Quarantines rows (admin). Reversible: restore brings them back.
#[utoipa::path(
    post,
    path = "/leaderboard/quarantine",
    request_body = ModerationRequest,
    responses(
        (status = 200, description = "Rows quarantined", body = ModerationResponse),
        (status = 404, description = "Some rows not found", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn quarantine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ModerationRequest>,
) -> ApiResult<Json<ModerationResponse>> {
    require_admin(&state, &headers)?;
    let row_ids = parse_row_ids(&request.row_ids)?;
    let reason = if request.reason.is_empty() {
        "quarantined by admin"
    } else {
        request.reason.as_str()
    };

    let outcome = state.cache.quarantine(&row_ids, reason).await?;
    if !outcome.all_found() {
        return Err(ApiError::rows_not_found(
            outcome.missing.iter().map(ToString::to_string).collect(),
        ));
    }
    Ok(Json(ModerationResponse {
        updated: outcome.updated.iter().map(ToString::to_string).collect(),
    }))
}

/// Restores quarantined rows (admin).
#[utoipa::path(
    post,
    path = "/leaderboard/restore",
    request_body = ModerationRequest,
    responses(
        (status = 200, description = "Rows restored", body = ModerationResponse),
        (status = 404, description = "Some rows not found", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn restore(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ModerationRequest>,
) -> ApiResult<Json<ModerationResponse>> {
    require_admin(&state, &headers)?;
    let row_ids = parse_row_ids(&request.row_ids)?;

    let outcome = state.cache.restore(&row_ids).await?;
    if !outcome.all_found() {
        return Err(ApiError::rows_not_found(
            outcome.missing.iter().map(ToString::to_string).collect(),
        ));
    }
    Ok(Json(ModerationResponse {
        updated: outcome.updated.iter().map(ToString::to_string).collect(),
    }))
}

/// Hard-deletes one row (admin). Irreversible.
#[utoipa::path(
    delete,
    path = "/leaderboard/{row_id}",
    params(("row_id" = String, Path, description = "Row identifier")),
    responses(
        (status = 200, description = "Row deleted", body = ModerationResponse),
        (status = 404, description = "Row not found", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn hard_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(row_id): Path<String>,
) -> ApiResult<Json<ModerationResponse>> {
    require_admin(&state, &headers)?;
    let row_ids = parse_row_ids(std::slice::from_ref(&row_id))?;

    let outcome = state.cache.hard_delete(&row_ids).await?;
    if !outcome.all_found() {
        return Err(ApiError::rows_not_found(
            outcome.missing.iter().map(ToString::to_string).collect(),
        ));
    }
    tracing::info!(row_id, "leaderboard row hard-deleted");
    Ok(Json(ModerationResponse {
        updated: outcome.updated.iter().map(ToString::to_string).collect(),
    }))
}
