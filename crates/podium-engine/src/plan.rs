//! The evaluation plan: a validated, structured description of what to
//! evaluate.
//!
//! A plan is a value with closed, validated fields, not a bag of strings.
//! It is built by the dispatcher from a client submission, validated
//! against the closed enum sets and the subject taxonomy, and never
//! persisted in raw form: only the credential-free [`PlanSnapshot`] lives
//! on the task.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::credentials::Secret;
use crate::error::{Error, Result};
use crate::taxonomy::SubjectTaxonomy;

/// Current plan schema version, included in the fingerprint so schema
/// changes never reuse stale cache entries.
pub const PLAN_SCHEMA_VERSION: u32 = 2;

/// Problem format of the evaluation samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProblemType {
    /// Yes/no or true/false items.
    Binary,
    /// Multiple-choice question answering.
    #[serde(rename = "MCQA")]
    Mcqa,
    /// Short free-form answers scored by match.
    #[serde(rename = "short-form")]
    ShortForm,
    /// Open-ended generation scored by a judge.
    #[serde(rename = "open-ended")]
    OpenEnded,
}

impl ProblemType {
    /// Returns the exact wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "Binary",
            Self::Mcqa => "MCQA",
            Self::ShortForm => "short-form",
            Self::OpenEnded => "open-ended",
        }
    }
}

/// Whether the evaluation targets general or locale-specific knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    /// Universally applicable knowledge.
    General,
    /// Locale- or culture-specific knowledge.
    Local,
}

impl TargetType {
    /// Returns the exact wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::General => "General",
            Self::Local => "Local",
        }
    }
}

/// The capability dimension being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskCategory {
    /// Factual knowledge recall.
    Knowledge,
    /// Multi-step reasoning.
    Reasoning,
    /// Value judgments.
    Value,
    /// Alignment and safety behavior.
    Alignment,
}

impl TaskCategory {
    /// Returns the exact wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "Knowledge",
            Self::Reasoning => "Reasoning",
            Self::Value => "Value",
            Self::Alignment => "Alignment",
        }
    }

    /// Parses the exact wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Knowledge" => Some(Self::Knowledge),
            "Reasoning" => Some(Self::Reasoning),
            "Value" => Some(Self::Value),
            "Alignment" => Some(Self::Alignment),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider family of a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completion endpoints.
    Openai,
    /// Anthropic messages endpoints.
    Anthropic,
    /// Google generative language endpoints.
    Google,
    /// Self-hosted endpoints speaking an OpenAI-compatible dialect.
    Local,
}

impl ProviderKind {
    /// Returns the exact wire form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Local => "local",
        }
    }
}

/// How sample correctness is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// String-normalized exact match.
    ExactMatch,
    /// Partial credit by token overlap.
    PartialCredit,
    /// Scored by a judge model.
    LlmJudge,
}

impl ScoringMethod {
    /// Returns the exact wire form, included in the fingerprint as the
    /// evaluator method identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::PartialCredit => "partial_credit",
            Self::LlmJudge => "llm_judge",
        }
    }
}

/// Human-readable plan metadata, excluded from the fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMeta {
    /// Short name for display.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// The evaluation profile: what to measure, in which slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalProfile {
    /// Problem format of the samples.
    pub problem_type: ProblemType,
    /// General vs. locale-specific target.
    pub target_type: TargetType,
    /// Capability dimension being measured.
    pub task_type: TaskCategory,
    /// Whether samples may require external tools.
    #[serde(default)]
    pub external_tool_usage: bool,
    /// Target language (free string, e.g. "Korean").
    pub language: String,
    /// Subject tags drawn from the closed taxonomy. Non-empty.
    pub subject_type: Vec<String>,
    /// Requested number of samples per model.
    pub sample_size: u64,
    /// Optional deterministic sampling seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// One model endpoint to evaluate.
///
/// The credential is a short-lived secret: it never appears in Debug
/// output, is never serialized, and is diverted into the in-memory
/// credential vault before the plan is snapshotted.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
    /// Model display name, unique within the plan.
    pub name: String,
    /// Provider family.
    pub provider_kind: ProviderKind,
    /// Endpoint base URL.
    pub endpoint: String,
    /// Provider credential for this endpoint.
    pub credential: Secret,
}

/// Execution directives for the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalDirectives {
    /// Correctness scoring method.
    pub scoring_method: ScoringMethod,
    /// Per-call timeout for provider requests.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Sample batch size for result streaming.
    pub batch_size: usize,
}

impl Default for EvalDirectives {
    fn default() -> Self {
        Self {
            scoring_method: ScoringMethod::ExactMatch,
            call_timeout: Duration::from_secs(60),
            batch_size: 20,
        }
    }
}

/// A validated evaluation plan: the unit of work.
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// Plan schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Human-readable metadata (excluded from the fingerprint).
    #[serde(default)]
    pub meta: PlanMeta,
    /// The evaluation profile.
    pub profile: EvalProfile,
    /// Models to evaluate. Non-empty, at most [`PlanValidator::max_models`].
    pub models: Vec<ModelSpec>,
    /// Execution directives.
    #[serde(default)]
    pub directives: EvalDirectives,
}

fn default_schema_version() -> u32 {
    PLAN_SCHEMA_VERSION
}

impl Plan {
    /// Produces the redacted snapshot persisted on the task.
    ///
    /// Credentials cannot leak through this path: [`ModelRef`] has no
    /// secret field at all.
    #[must_use]
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            schema_version: self.schema_version,
            meta: self.meta.clone(),
            profile: self.profile.clone(),
            models: self.models.iter().map(ModelRef::from).collect(),
            directives: self.directives.clone(),
        }
    }

    /// Returns a copy of this plan restricted to the given model names.
    ///
    /// Used by the dispatcher to enqueue a reduced plan when the cache
    /// already covers a subset of the requested models.
    #[must_use]
    pub fn restricted_to(&self, model_names: &[String]) -> Self {
        let mut reduced = self.clone();
        reduced
            .models
            .retain(|m| model_names.iter().any(|n| n == &m.name));
        reduced
    }

    /// Model names in plan order.
    #[must_use]
    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }
}

/// A credential-free reference to a model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    /// Model display name.
    pub name: String,
    /// Provider family.
    pub provider_kind: ProviderKind,
    /// Endpoint base URL.
    pub endpoint: String,
}

impl From<&ModelSpec> for ModelRef {
    fn from(spec: &ModelSpec) -> Self {
        Self {
            name: spec.name.clone(),
            provider_kind: spec.provider_kind,
            endpoint: spec.endpoint.clone(),
        }
    }
}

/// The redacted plan persisted on the task and handed to workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    /// Plan schema version.
    pub schema_version: u32,
    /// Human-readable metadata.
    pub meta: PlanMeta,
    /// The evaluation profile.
    pub profile: EvalProfile,
    /// Models to evaluate, without credentials.
    pub models: Vec<ModelRef>,
    /// Execution directives.
    pub directives: EvalDirectives,
}

impl PlanSnapshot {
    /// Model names in snapshot order.
    #[must_use]
    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    /// The per-call timeout as a chrono duration, for deadline math.
    #[must_use]
    pub fn call_timeout(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.directives.call_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(60))
    }
}

/// Validates plans against the closed enum sets, the subject taxonomy,
/// and the configured limits.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    taxonomy: SubjectTaxonomy,
    /// Maximum number of models per plan.
    pub max_models: usize,
    /// Ceiling on sample size; oversized requests are clamped to it,
    /// not rejected.
    pub max_sample_size: u64,
}

impl PlanValidator {
    /// Creates a validator with the given taxonomy and limits.
    #[must_use]
    pub fn new(taxonomy: SubjectTaxonomy, max_models: usize, max_sample_size: u64) -> Self {
        Self {
            taxonomy,
            max_models,
            max_sample_size,
        }
    }

    /// Validates a plan, returning the first violated constraint, and
    /// clamps an oversized sample size to the configured ceiling.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` describing the violated constraint.
    pub fn validate(&self, plan: &mut Plan) -> Result<()> {
        if plan.models.is_empty() {
            return Err(Error::validation("at least one model is required"));
        }
        if plan.models.len() > self.max_models {
            return Err(Error::validation(format!(
                "at most {} models allowed per plan, got {}",
                self.max_models,
                plan.models.len()
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for model in &plan.models {
            if model.name.trim().is_empty() {
                return Err(Error::validation("model name must not be empty"));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate model name '{}'",
                    model.name
                )));
            }
            if !model.endpoint.starts_with("http://") && !model.endpoint.starts_with("https://") {
                return Err(Error::validation(format!(
                    "model '{}' endpoint must start with http:// or https://",
                    model.name
                )));
            }
        }

        let profile = &mut plan.profile;
        if profile.language.trim().is_empty() {
            return Err(Error::validation("language must not be empty"));
        }
        if profile.subject_type.is_empty() {
            return Err(Error::validation("at least one subject tag is required"));
        }
        for tag in &profile.subject_type {
            if !self.taxonomy.contains(tag) {
                return Err(Error::validation(format!(
                    "unknown subject tag '{tag}'"
                )));
            }
        }
        if profile.sample_size == 0 {
            return Err(Error::validation("sample_size must be at least 1"));
        }
        if profile.sample_size > self.max_sample_size {
            tracing::debug!(
                requested = profile.sample_size,
                max = self.max_sample_size,
                "sample_size clamped to the configured ceiling"
            );
            profile.sample_size = self.max_sample_size;
        }

        if plan.directives.batch_size == 0 {
            return Err(Error::validation("batch_size must be at least 1"));
        }

        Ok(())
    }
}
