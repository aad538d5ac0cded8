//! `GET /health` and `GET /stats`: operational surfaces.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use podium_engine::cache::CacheIndex;
use podium_engine::evaluator::Evaluator;
use podium_engine::queue::JobQueue;
use podium_engine::stats;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Component condition on the health surface.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` when every component is up, otherwise `degraded`.
    pub status: String,
    /// Cache index condition (`ok` or `down`).
    pub cache: String,
    /// Queue condition (`ok` or `down`).
    pub queue: String,
    /// Evaluator condition (`available` or `unavailable`).
    pub evaluator: String,
}

/// Task and cache statistics.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Tasks in PENDING.
    pub pending: u64,
    /// Tasks in STARTED.
    pub started: u64,
    /// Tasks in SUCCESS.
    pub success: u64,
    /// Tasks in FAILURE.
    pub failure: u64,
    /// Tasks in CANCELLED.
    pub cancelled: u64,
    /// Non-terminal tasks.
    pub in_flight: u64,
    /// Total cache rows (including quarantined).
    pub cache_rows: usize,
    /// Median duration of recently completed tasks, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_task_duration_ms: Option<u64>,
    /// Worker loops in this process.
    pub worker_count: usize,
    /// Whether the evaluator backend reports itself usable.
    pub evaluator_available: bool,
}

/// Builds the status router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats_handler))
}

/// Reports component health.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Component health", body = HealthResponse))
)]
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_ok = state.cache.count().await.is_ok();
    let queue_ok = state.queue.depth().await.is_ok();
    let evaluator_ok = state.evaluator.available();

    let status = if cache_ok && queue_ok && evaluator_ok {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        cache: if cache_ok { "ok" } else { "down" }.to_string(),
        queue: if queue_ok { "ok" } else { "down" }.to_string(),
        evaluator: if evaluator_ok {
            "available"
        } else {
            "unavailable"
        }
        .to_string(),
    })
}

/// Reports task counts, cache size, and recent durations.
#[utoipa::path(
    get,
    path = "/stats",
    responses((status = 200, description = "Engine statistics", body = StatsResponse))
)]
pub(crate) async fn stats_handler(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let snapshot = stats::gather(
        &state.registry,
        &state.cache,
        state.worker_count,
        state.evaluator.available(),
    )
    .await
    .map_err(ApiError::from)?;

    Ok(Json(StatsResponse {
        pending: snapshot.tasks.pending,
        started: snapshot.tasks.started,
        success: snapshot.tasks.success,
        failure: snapshot.tasks.failure,
        cancelled: snapshot.tasks.cancelled,
        in_flight: snapshot.in_flight,
        cache_rows: snapshot.cache_rows,
        median_task_duration_ms: snapshot.median_task_duration_ms,
        worker_count: snapshot.worker_count,
        evaluator_available: snapshot.evaluator_available,
    }))
}
