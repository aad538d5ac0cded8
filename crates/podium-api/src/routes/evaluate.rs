//! `POST /evaluate`: plan submission.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use podium_engine::credentials::Secret;
use podium_engine::plan::{
    EvalDirectives, EvalProfile, ModelSpec, Plan, PlanMeta, ProblemType, ProviderKind,
    ScoringMethod, TargetType, TaskCategory, PLAN_SCHEMA_VERSION,
};

use super::LeaderboardRowBody;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// One model endpoint in a submission.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelBody {
    /// Model display name.
    pub name: String,
    /// Provider family (`openai`, `anthropic`, `google`, `local`).
    #[schema(value_type = String)]
    pub provider_kind: ProviderKind,
    /// Endpoint base URL.
    pub endpoint: String,
    /// Provider credential. Held in memory only; never persisted.
    pub api_key: String,
}

/// Evaluation directives in a submission.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DirectivesBody {
    /// Scoring method (`exact_match`, `partial_credit`, `llm_judge`).
    #[serde(default = "default_scoring")]
    #[schema(value_type = String)]
    pub scoring_method: ScoringMethod,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Sample batch size for result streaming.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_scoring() -> ScoringMethod {
    ScoringMethod::ExactMatch
}

const fn default_call_timeout_secs() -> u64 {
    60
}

const fn default_batch_size() -> usize {
    20
}

impl Default for DirectivesBody {
    fn default() -> Self {
        Self {
            scoring_method: default_scoring(),
            call_timeout_secs: default_call_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Request body for `POST /evaluate`: the plan, its models, and their
/// credentials.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EvaluateRequest {
    /// Human-readable plan name (excluded from the fingerprint).
    #[serde(default)]
    pub name: String,
    /// Free-form description (excluded from the fingerprint).
    #[serde(default)]
    pub description: String,
    /// Problem format (`Binary`, `MCQA`, `short-form`, `open-ended`).
    #[schema(value_type = String)]
    pub problem_type: ProblemType,
    /// Target type (`General`, `Local`).
    #[schema(value_type = String)]
    pub target_type: TargetType,
    /// Task category (`Knowledge`, `Reasoning`, `Value`, `Alignment`).
    #[schema(value_type = String)]
    pub task_type: TaskCategory,
    /// Whether samples may require external tools.
    #[serde(default)]
    pub external_tool_usage: bool,
    /// Target language.
    pub language: String,
    /// Subject tags from the closed taxonomy. Non-empty.
    pub subject_type: Vec<String>,
    /// Requested samples per model.
    pub sample_size: u64,
    /// Optional deterministic seed.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Models to evaluate.
    pub models: Vec<ModelBody>,
    /// Evaluation directives.
    #[serde(default)]
    pub directives: DirectivesBody,
}

impl EvaluateRequest {
    fn into_plan(self) -> Plan {
        Plan {
            schema_version: PLAN_SCHEMA_VERSION,
            meta: PlanMeta {
                name: self.name,
                description: self.description,
            },
            profile: EvalProfile {
                problem_type: self.problem_type,
                target_type: self.target_type,
                task_type: self.task_type,
                external_tool_usage: self.external_tool_usage,
                language: self.language,
                subject_type: self.subject_type,
                sample_size: self.sample_size,
                seed: self.seed,
            },
            models: self
                .models
                .into_iter()
                .map(|m| ModelSpec {
                    name: m.name,
                    provider_kind: m.provider_kind,
                    endpoint: m.endpoint,
                    credential: Secret::new(m.api_key),
                })
                .collect(),
            directives: EvalDirectives {
                scoring_method: self.directives.scoring_method,
                call_timeout: std::time::Duration::from_secs(self.directives.call_timeout_secs),
                batch_size: self.directives.batch_size,
            },
        }
    }
}

/// Response body for `POST /evaluate`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EvaluateResponse {
    /// The task to poll.
    pub task_id: String,
    /// Status at submission time.
    pub status: String,
    /// True if cached rows were returned.
    pub cached: bool,
    /// True if the cache covered only a subset of the requested models.
    pub partial: bool,
    /// True if the submission attached to in-flight work.
    pub coalesced: bool,
    /// Cached rows, when `cached`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<LeaderboardRowBody>>,
}

/// Builds the `/evaluate` router.
pub fn router() -> Router<AppState> {
    Router::new().route("/evaluate", post(submit))
}

/// Submits a plan for evaluation.
#[utoipa::path(
    post,
    path = "/evaluate",
    request_body = EvaluateRequest,
    responses(
        (status = 202, description = "Task accepted (or resolved from cache)", body = EvaluateResponse),
        (status = 400, description = "Schema or enum violation", body = crate::error::ApiErrorBody),
        (status = 503, description = "Queue unavailable", body = crate::error::ApiErrorBody),
    )
)]
pub(crate) async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::validation(format!("invalid request body: {rejection}"))
    })?;

    let outcome = state.dispatcher.submit(request.into_plan()).await?;
    tracing::info!(
        task_id = %outcome.task_id,
        cached = outcome.cached,
        coalesced = outcome.coalesced,
        "plan submitted"
    );

    let response = EvaluateResponse {
        task_id: outcome.task_id.to_string(),
        status: outcome.status.to_string(),
        cached: outcome.cached,
        partial: outcome.partial,
        coalesced: outcome.coalesced,
        rows: outcome
            .rows
            .map(|rows| rows.into_iter().map(LeaderboardRowBody::from).collect()),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}
