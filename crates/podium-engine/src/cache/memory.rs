//! In-memory cache index.
//!
//! Thread-safe implementation of [`CacheIndex`] backed by a `RwLock`.
//! Suitable for tests, development, and single-process deployments.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use podium_core::RowId;

use super::{
    AdminOutcome, AggregateKey, AggregateRow, AggregateUpsert, BrowseFilter, CacheCategories,
    CacheIndex, CacheLookup, CachePolicy,
};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("cache index lock poisoned")
}

/// In-memory cache index.
#[derive(Debug, Default)]
pub struct InMemoryCacheIndex {
    rows: RwLock<BTreeMap<AggregateKey, AggregateRow>>,
}

impl InMemoryCacheIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sort_by_score_desc(rows: &mut [AggregateRow]) {
        rows.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model_name.cmp(&b.model_name))
        });
    }

    fn mutate_rows<F>(&self, row_ids: &[RowId], mut apply: F) -> Result<AdminOutcome>
    where
        F: FnMut(&mut AggregateRow),
    {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let mut outcome = AdminOutcome::default();

        for row_id in row_ids {
            let found = rows.values_mut().find(|r| r.row_id == *row_id);
            match found {
                Some(row) => {
                    apply(row);
                    row.last_updated = Utc::now();
                    outcome.updated.push(*row_id);
                }
                None => outcome.missing.push(*row_id),
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl CacheIndex for InMemoryCacheIndex {
    async fn lookup(&self, fingerprint: &Fingerprint, policy: &CachePolicy) -> Result<CacheLookup> {
        let now = Utc::now();
        let rows = self.rows.read().map_err(poison_err)?;

        let mut any = false;
        let mut fresh = Vec::new();
        for row in rows.values() {
            if row.fingerprint != *fingerprint || row.quarantined {
                continue;
            }
            any = true;
            if row.is_fresh(policy, now) {
                fresh.push(row.clone());
            }
        }

        if !any {
            return Ok(CacheLookup::Miss);
        }
        if fresh.is_empty() {
            return Ok(CacheLookup::Stale);
        }
        Self::sort_by_score_desc(&mut fresh);
        Ok(CacheLookup::Fresh(fresh))
    }

    async fn upsert_rows(&self, upserts: Vec<AggregateUpsert>) -> Result<Vec<AggregateRow>> {
        let now = Utc::now();
        let mut rows = self.rows.write().map_err(poison_err)?;

        let mut written = Vec::with_capacity(upserts.len());
        for upsert in upserts {
            let row = rows
                .entry(upsert.key.clone())
                .and_modify(|existing| {
                    existing.score = upsert.score;
                    existing.sample_count = upsert.sample_count;
                    existing.evaluator_version = upsert.evaluator_version;
                    existing.source_task_id = upsert.source_task_id;
                    existing.last_updated = now;
                })
                .or_insert_with(|| AggregateRow {
                    row_id: RowId::generate(),
                    fingerprint: upsert.key.fingerprint.clone(),
                    model_name: upsert.key.model_name.clone(),
                    language: upsert.key.language.clone(),
                    subject_type: upsert.key.subject_type.clone(),
                    task_type: upsert.key.task_type,
                    score: upsert.score,
                    sample_count: upsert.sample_count,
                    evaluator_version: upsert.evaluator_version,
                    last_updated: now,
                    quarantined: false,
                    quarantine_reason: None,
                    source_task_id: upsert.source_task_id,
                });
            written.push(row.clone());
        }
        Ok(written)
    }

    async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<AggregateRow>> {
        let rows = self.rows.read().map_err(poison_err)?;
        let mut matched: Vec<AggregateRow> = rows
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Self::sort_by_score_desc(&mut matched);
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn quarantine(&self, row_ids: &[RowId], reason: &str) -> Result<AdminOutcome> {
        self.mutate_rows(row_ids, |row| {
            row.quarantined = true;
            row.quarantine_reason = Some(reason.to_string());
        })
    }

    async fn restore(&self, row_ids: &[RowId]) -> Result<AdminOutcome> {
        self.mutate_rows(row_ids, |row| {
            row.quarantined = false;
            row.quarantine_reason = None;
        })
    }

    async fn hard_delete(&self, row_ids: &[RowId]) -> Result<AdminOutcome> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let mut outcome = AdminOutcome::default();

        for row_id in row_ids {
            let key = rows
                .iter()
                .find(|(_, r)| r.row_id == *row_id)
                .map(|(k, _)| k.clone());
            match key {
                Some(key) => {
                    rows.remove(&key);
                    outcome.updated.push(*row_id);
                }
                None => outcome.missing.push(*row_id),
            }
        }
        Ok(outcome)
    }

    async fn count(&self) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.len())
    }

    async fn categories(&self) -> Result<CacheCategories> {
        let rows = self.rows.read().map_err(poison_err)?;
        let mut categories = CacheCategories::default();
        for row in rows.values().filter(|r| !r.quarantined) {
            if !categories.languages.contains(&row.language) {
                categories.languages.push(row.language.clone());
            }
            if !categories.subject_types.contains(&row.subject_type) {
                categories.subject_types.push(row.subject_type.clone());
            }
            if !categories.task_types.contains(&row.task_type) {
                categories.task_types.push(row.task_type);
            }
        }
        categories.languages.sort_unstable();
        categories.subject_types.sort_unstable();
        categories.task_types.sort_unstable();
        Ok(categories)
    }

    async fn count_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        let matched = rows.values().filter(|r| r.last_updated < cutoff).count();
        Ok(matched.min(limit))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let keys: Vec<AggregateKey> = rows
            .iter()
            .filter(|(_, r)| r.last_updated < cutoff)
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect();
        for key in &keys {
            rows.remove(key);
        }
        Ok(keys.len())
    }

    async fn quarantine_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        reason: &str,
    ) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let mut affected = 0;
        for row in rows.values_mut() {
            if affected >= limit {
                break;
            }
            if row.last_updated < cutoff && !row.quarantined {
                row.quarantined = true;
                row.quarantine_reason = Some(reason.to_string());
                affected += 1;
            }
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{fp, upsert};
    use crate::plan::TaskCategory;

    #[tokio::test]
    async fn upsert_and_lookup_fresh() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let fingerprint = fp('a');

        index
            .upsert_rows(vec![upsert(&fingerprint, "m1", 0.8)])
            .await?;

        let lookup = index.lookup(&fingerprint, &CachePolicy::default()).await?;
        let rows = lookup.fresh_rows().expect("should be fresh");
        assert_eq!(rows.len(), 1);
        assert!((rows[0].score - 0.8).abs() < f64::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_unknown_fingerprint_is_miss() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let lookup = index.lookup(&fp('f'), &CachePolicy::default()).await?;
        assert!(matches!(lookup, CacheLookup::Miss));
        Ok(())
    }

    #[tokio::test]
    async fn stale_rows_reported_as_stale() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let fingerprint = fp('a');
        index
            .upsert_rows(vec![upsert(&fingerprint, "m1", 0.8)])
            .await?;

        // The row was written just now, so staleness is driven by the
        // evaluator-version pin rather than a TTL race.
        let pinned = CachePolicy {
            ttl: std::time::Duration::from_secs(3600),
            min_evaluator_version: Some(99),
        };
        assert!(matches!(
            index.lookup(&fingerprint, &pinned).await?,
            CacheLookup::Stale
        ));
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_value_and_keeps_row_id() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let fingerprint = fp('a');

        let first = index
            .upsert_rows(vec![upsert(&fingerprint, "m1", 0.5)])
            .await?;
        let second = index
            .upsert_rows(vec![upsert(&fingerprint, "m1", 0.9)])
            .await?;

        assert_eq!(first[0].row_id, second[0].row_id);
        assert!((second[0].score - 0.9).abs() < f64::EPSILON);
        assert_eq!(index.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn quarantine_hides_and_restore_reveals() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let fingerprint = fp('a');
        let rows = index
            .upsert_rows(vec![
                upsert(&fingerprint, "m1", 0.8),
                upsert(&fingerprint, "m2", 0.6),
            ])
            .await?;
        let m1_row = rows.iter().find(|r| r.model_name == "m1").unwrap().row_id;

        let outcome = index.quarantine(&[m1_row], "moderation").await?;
        assert!(outcome.all_found());

        let visible = index.browse(&BrowseFilter::with_limit(10)).await?;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].model_name, "m2");

        // Quarantined rows are also invisible to cache lookups.
        let lookup = index.lookup(&fingerprint, &CachePolicy::default()).await?;
        assert_eq!(lookup.fresh_rows().unwrap().len(), 1);

        index.restore(&[m1_row]).await?;
        let visible = index.browse(&BrowseFilter::with_limit(10)).await?;
        assert_eq!(visible.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn quarantine_reports_missing_rows() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let ghost = RowId::generate();
        let outcome = index.quarantine(&[ghost], "x").await?;
        assert!(!outcome.all_found());
        assert_eq!(outcome.missing, vec![ghost]);
        Ok(())
    }

    #[tokio::test]
    async fn hard_delete_removes_rows() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        let rows = index.upsert_rows(vec![upsert(&fp('a'), "m1", 0.8)]).await?;

        let outcome = index.hard_delete(&[rows[0].row_id]).await?;
        assert!(outcome.all_found());
        assert_eq!(index.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn browse_orders_by_score_desc() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        index
            .upsert_rows(vec![
                upsert(&fp('a'), "low", 0.3),
                upsert(&fp('a'), "high", 0.9),
                upsert(&fp('a'), "mid", 0.6),
            ])
            .await?;

        let rows = index.browse(&BrowseFilter::with_limit(10)).await?;
        let names: Vec<&str> = rows.iter().map(|r| r.model_name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
        Ok(())
    }

    #[tokio::test]
    async fn browse_pagination() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        index
            .upsert_rows(vec![
                upsert(&fp('a'), "a", 0.9),
                upsert(&fp('a'), "b", 0.8),
                upsert(&fp('a'), "c", 0.7),
            ])
            .await?;

        let mut filter = BrowseFilter::with_limit(2);
        filter.offset = 1;
        let rows = index.browse(&filter).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].model_name, "b");
        Ok(())
    }

    #[tokio::test]
    async fn categories_lists_distinct_values() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        index
            .upsert_rows(vec![
                upsert(&fp('a'), "m1", 0.8),
                upsert(&fp('b'), "m2", 0.6),
            ])
            .await?;

        let categories = index.categories().await?;
        assert_eq!(categories.languages, vec!["korean".to_string()]);
        assert_eq!(categories.task_types, vec![TaskCategory::Knowledge]);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_helpers_respect_cutoff() -> Result<()> {
        let index = InMemoryCacheIndex::new();
        index.upsert_rows(vec![upsert(&fp('a'), "m1", 0.8)]).await?;

        let past_cutoff = Utc::now() - chrono::Duration::days(1);
        assert_eq!(index.count_older_than(past_cutoff, 10).await?, 0);

        let future_cutoff = Utc::now() + chrono::Duration::days(1);
        assert_eq!(index.count_older_than(future_cutoff, 10).await?, 1);
        assert_eq!(index.quarantine_older_than(future_cutoff, 10, "aged").await?, 1);
        assert_eq!(index.delete_older_than(future_cutoff, 10).await?, 1);
        assert_eq!(index.count().await?, 0);
        Ok(())
    }
}
