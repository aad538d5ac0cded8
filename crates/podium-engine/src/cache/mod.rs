//! The leaderboard cache index: fingerprint-keyed aggregate rows.
//!
//! Rows are keyed by `(fingerprint, model_name, language, subject_type,
//! task_type)` and carry the mean correctness over a task's samples. A
//! time-to-live policy governs freshness; a quarantine flag hides a row
//! from default reads without removing it, so moderation actions stay
//! reversible.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use podium_core::{RowId, TaskId};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::plan::TaskCategory;

pub use memory::InMemoryCacheIndex;

/// The composite identity of an aggregate row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Fingerprint of the producing plan.
    pub fingerprint: Fingerprint,
    /// Model name.
    pub model_name: String,
    /// Language slice (canonical lowercase).
    pub language: String,
    /// Subject slice.
    pub subject_type: String,
    /// Task category slice.
    pub task_type: TaskCategory,
}

/// One leaderboard cache row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Opaque row identifier for admin addressing.
    pub row_id: RowId,
    /// Fingerprint of the producing plan.
    pub fingerprint: Fingerprint,
    /// Model name.
    pub model_name: String,
    /// Language slice.
    pub language: String,
    /// Subject slice.
    pub subject_type: String,
    /// Task category slice.
    pub task_type: TaskCategory,
    /// Mean correctness over the task's samples.
    pub score: f64,
    /// Number of samples behind the score.
    pub sample_count: u64,
    /// Version of the evaluator that produced the row.
    pub evaluator_version: u32,
    /// Bumped on every upsert.
    pub last_updated: DateTime<Utc>,
    /// Hidden from default reads when set.
    pub quarantined: bool,
    /// Why the row was quarantined, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<String>,
    /// Task that wrote the row.
    pub source_task_id: TaskId,
}

impl AggregateRow {
    /// Returns the composite key of this row.
    #[must_use]
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            fingerprint: self.fingerprint.clone(),
            model_name: self.model_name.clone(),
            language: self.language.clone(),
            subject_type: self.subject_type.clone(),
            task_type: self.task_type,
        }
    }

    /// Returns true if the row is fresh under `policy` at `now`.
    #[must_use]
    pub fn is_fresh(&self, policy: &CachePolicy, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(policy.ttl).unwrap_or_else(|_| chrono::Duration::MAX);
        if now.signed_duration_since(self.last_updated) > ttl {
            return false;
        }
        policy
            .min_evaluator_version
            .is_none_or(|min| self.evaluator_version >= min)
    }
}

/// A write into the cache index (identity + value, no row ID yet).
#[derive(Debug, Clone)]
pub struct AggregateUpsert {
    /// The composite identity.
    pub key: AggregateKey,
    /// Mean correctness.
    pub score: f64,
    /// Number of samples behind the score.
    pub sample_count: u64,
    /// Version of the evaluator that produced the value.
    pub evaluator_version: u32,
    /// Task that produced the value.
    pub source_task_id: TaskId,
}

/// Freshness policy for cache lookups.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Rows older than this are stale.
    pub ttl: Duration,
    /// Rows produced by an older evaluator are stale.
    pub min_evaluator_version: Option<u32>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            min_evaluator_version: None,
        }
    }
}

/// Result of a fingerprint lookup.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// Fresh, non-quarantined rows exist for the fingerprint.
    Fresh(Vec<AggregateRow>),
    /// Rows exist but all are stale under the policy.
    Stale,
    /// Nothing cached for the fingerprint.
    Miss,
}

impl CacheLookup {
    /// Returns the fresh rows, if any.
    #[must_use]
    pub fn fresh_rows(&self) -> Option<&[AggregateRow]> {
        match self {
            Self::Fresh(rows) => Some(rows),
            Self::Stale | Self::Miss => None,
        }
    }
}

/// Filter for leaderboard browsing.
#[derive(Debug, Clone, Default)]
pub struct BrowseFilter {
    /// Exact language match.
    pub language: Option<String>,
    /// Exact subject match.
    pub subject_type: Option<String>,
    /// Exact task category match.
    pub task_type: Option<TaskCategory>,
    /// Case-insensitive model name substring.
    pub model_name: Option<String>,
    /// Inclusive lower score bound.
    pub score_min: Option<f64>,
    /// Inclusive upper score bound.
    pub score_max: Option<f64>,
    /// Only rows updated strictly after this instant.
    pub updated_after: Option<DateTime<Utc>>,
    /// Include quarantined rows (admin-scoped callers only).
    pub include_quarantined: bool,
    /// Page size.
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

impl BrowseFilter {
    /// A filter returning the first `limit` rows.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn matches(&self, row: &AggregateRow) -> bool {
        if !self.include_quarantined && row.quarantined {
            return false;
        }
        if self.language.as_ref().is_some_and(|l| l != &row.language) {
            return false;
        }
        if self
            .subject_type
            .as_ref()
            .is_some_and(|s| s != &row.subject_type)
        {
            return false;
        }
        if self.task_type.is_some_and(|t| t != row.task_type) {
            return false;
        }
        if self.model_name.as_ref().is_some_and(|needle| {
            !row.model_name
                .to_lowercase()
                .contains(&needle.to_lowercase())
        }) {
            return false;
        }
        if self.score_min.is_some_and(|min| row.score < min) {
            return false;
        }
        if self.score_max.is_some_and(|max| row.score > max) {
            return false;
        }
        if self
            .updated_after
            .is_some_and(|after| row.last_updated <= after)
        {
            return false;
        }
        true
    }
}

/// Outcome of an admin mutation over explicit row IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminOutcome {
    /// Rows that were updated.
    pub updated: Vec<RowId>,
    /// Requested rows that do not exist.
    pub missing: Vec<RowId>,
}

impl AdminOutcome {
    /// Returns true if every requested row was found.
    #[must_use]
    pub fn all_found(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Distinct slice values present in the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheCategories {
    /// Distinct languages.
    pub languages: Vec<String>,
    /// Distinct subject tags.
    pub subject_types: Vec<String>,
    /// Distinct task categories.
    pub task_types: Vec<TaskCategory>,
}

/// The keyed aggregate map behind leaderboard reads.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Looks up rows for a fingerprint under the freshness policy.
    ///
    /// Quarantined rows are invisible here: a fingerprint whose rows are
    /// all quarantined is a miss.
    async fn lookup(&self, fingerprint: &Fingerprint, policy: &CachePolicy) -> Result<CacheLookup>;

    /// Inserts or replaces rows, bumping `last_updated` and recording
    /// the originating task. Existing rows keep their row ID and their
    /// quarantine flag.
    async fn upsert_rows(&self, rows: Vec<AggregateUpsert>) -> Result<Vec<AggregateRow>>;

    /// Browses rows under a filter, ordered by score descending.
    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<AggregateRow>>;

    /// Flips the quarantine flag on the given rows.
    async fn quarantine(&self, row_ids: &[RowId], reason: &str) -> Result<AdminOutcome>;

    /// Clears the quarantine flag on the given rows.
    async fn restore(&self, row_ids: &[RowId]) -> Result<AdminOutcome>;

    /// Removes the given rows outright.
    async fn hard_delete(&self, row_ids: &[RowId]) -> Result<AdminOutcome>;

    /// Total rows (including quarantined).
    async fn count(&self) -> Result<usize>;

    /// Distinct slice values over non-quarantined rows.
    async fn categories(&self) -> Result<CacheCategories>;

    /// Counts rows last updated before `cutoff`, capped by `limit`.
    async fn count_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Removes up to `limit` rows last updated before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;

    /// Quarantines up to `limit` rows last updated before `cutoff`.
    async fn quarantine_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        reason: &str,
    ) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn fp(seed: char) -> Fingerprint {
        seed.to_string().repeat(64).parse().unwrap()
    }

    pub(crate) fn upsert(fingerprint: &Fingerprint, model: &str, score: f64) -> AggregateUpsert {
        AggregateUpsert {
            key: AggregateKey {
                fingerprint: fingerprint.clone(),
                model_name: model.into(),
                language: "korean".into(),
                subject_type: "Tech./Coding".into(),
                task_type: TaskCategory::Knowledge,
            },
            score,
            sample_count: 100,
            evaluator_version: 1,
            source_task_id: TaskId::generate(),
        }
    }

    #[test]
    fn freshness_respects_ttl() {
        let row = AggregateRow {
            row_id: RowId::generate(),
            fingerprint: fp('a'),
            model_name: "m1".into(),
            language: "korean".into(),
            subject_type: "Tech./Coding".into(),
            task_type: TaskCategory::Knowledge,
            score: 0.8,
            sample_count: 100,
            evaluator_version: 1,
            last_updated: Utc::now() - chrono::Duration::hours(2),
            quarantined: false,
            quarantine_reason: None,
            source_task_id: TaskId::generate(),
        };

        let fresh_policy = CachePolicy {
            ttl: Duration::from_secs(3 * 60 * 60),
            min_evaluator_version: None,
        };
        let stale_policy = CachePolicy {
            ttl: Duration::from_secs(60 * 60),
            min_evaluator_version: None,
        };
        assert!(row.is_fresh(&fresh_policy, Utc::now()));
        assert!(!row.is_fresh(&stale_policy, Utc::now()));
    }

    #[test]
    fn freshness_respects_evaluator_pin() {
        let mut row = AggregateRow {
            row_id: RowId::generate(),
            fingerprint: fp('a'),
            model_name: "m1".into(),
            language: "korean".into(),
            subject_type: "Tech./Coding".into(),
            task_type: TaskCategory::Knowledge,
            score: 0.8,
            sample_count: 100,
            evaluator_version: 1,
            last_updated: Utc::now(),
            quarantined: false,
            quarantine_reason: None,
            source_task_id: TaskId::generate(),
        };

        let pinned = CachePolicy {
            ttl: Duration::from_secs(3600),
            min_evaluator_version: Some(2),
        };
        assert!(!row.is_fresh(&pinned, Utc::now()));
        row.evaluator_version = 2;
        assert!(row.is_fresh(&pinned, Utc::now()));
    }

    #[test]
    fn browse_filter_score_range() {
        let row = AggregateRow {
            row_id: RowId::generate(),
            fingerprint: fp('a'),
            model_name: "claude-x".into(),
            language: "korean".into(),
            subject_type: "Tech./Coding".into(),
            task_type: TaskCategory::Knowledge,
            score: 0.8,
            sample_count: 100,
            evaluator_version: 1,
            last_updated: Utc::now(),
            quarantined: false,
            quarantine_reason: None,
            source_task_id: TaskId::generate(),
        };

        let mut filter = BrowseFilter::with_limit(10);
        filter.score_min = Some(0.5);
        filter.score_max = Some(0.9);
        assert!(filter.matches(&row));

        filter.score_min = Some(0.85);
        assert!(!filter.matches(&row));
    }

    #[test]
    fn browse_filter_model_substring_is_case_insensitive() {
        let row = AggregateRow {
            row_id: RowId::generate(),
            fingerprint: fp('a'),
            model_name: "Claude-X".into(),
            language: "korean".into(),
            subject_type: "Tech./Coding".into(),
            task_type: TaskCategory::Knowledge,
            score: 0.8,
            sample_count: 100,
            evaluator_version: 1,
            last_updated: Utc::now(),
            quarantined: false,
            quarantine_reason: None,
            source_task_id: TaskId::generate(),
        };

        let mut filter = BrowseFilter::with_limit(10);
        filter.model_name = Some("claude".into());
        assert!(filter.matches(&row));
        filter.model_name = Some("gpt".into());
        assert!(!filter.matches(&row));
    }
}
