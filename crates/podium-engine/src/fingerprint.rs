//! Plan fingerprinting: the cache key derivation (a pure function).
//!
//! Semantically equivalent plans must hash identically. Canonicalization:
//!
//! - trim and lowercase the language
//! - sort subject tags lexicographically
//! - sort models by (name, endpoint) ascending, credentials dropped
//! - round sample size up to the bucket ladder
//! - include the plan schema version and the scoring method identifier
//! - exclude the plan name, description, credentials, and any timestamps
//!
//! The canonical form is encoded with sorted-key, whitespace-free JSON
//! and hashed with SHA-256 (hex encoded). Without bucketing, a request
//! for 97 samples would never reuse a cached result for 100; with it,
//! near-duplicates coalesce while the maximum over-delivery stays
//! bounded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use podium_core::canonical_json::to_canonical_bytes;

use crate::cleanup::CleanupSpec;
use crate::error::{Error, Result};
use crate::plan::Plan;

/// Hex length of a SHA-256 fingerprint.
const FINGERPRINT_HEX_LEN: usize = 64;

/// A deterministic, collision-resistant identifier for equivalent plans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn from_digest(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Returns the hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != FINGERPRINT_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::validation(format!(
                "fingerprint must be {FINGERPRINT_HEX_LEN} hex characters"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// The sample-size bucket ladder.
///
/// Requested sizes map to the smallest bucket that covers them; sizes
/// above the top bucket clamp to the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSizeBuckets {
    ladder: Vec<u64>,
}

impl SampleSizeBuckets {
    /// Builds a ladder from the given bucket sizes.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the ladder is empty, unsorted, or
    /// contains zero or duplicate entries.
    pub fn new(ladder: Vec<u64>) -> Result<Self> {
        if ladder.is_empty() {
            return Err(Error::validation("bucket ladder must not be empty"));
        }
        if ladder.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::validation(
                "bucket ladder must be strictly increasing",
            ));
        }
        if ladder[0] == 0 {
            return Err(Error::validation("bucket sizes must be positive"));
        }
        Ok(Self { ladder })
    }

    /// Maps a requested size to its bucket: the smallest bucket that is
    /// at least `requested`, clamping to the top bucket.
    #[must_use]
    pub fn bucket_for(&self, requested: u64) -> u64 {
        self.ladder
            .iter()
            .copied()
            .find(|&b| b >= requested)
            .unwrap_or_else(|| self.max())
    }

    /// The largest bucket, which is also the ceiling oversized
    /// requests are clamped to.
    #[must_use]
    pub fn max(&self) -> u64 {
        *self.ladder.last().unwrap_or(&1)
    }
}

impl Default for SampleSizeBuckets {
    fn default() -> Self {
        Self {
            ladder: vec![10, 25, 50, 100, 250, 500, 1000],
        }
    }
}

/// The canonical form that is actually hashed.
///
/// Field order does not matter (keys are sorted during encoding), but
/// every field here is part of the cache identity. All values are
/// strings, booleans, or integers, so canonical encoding cannot hit the
/// float restriction.
#[derive(Debug, Serialize)]
struct CanonicalPlan {
    schema_version: u32,
    scoring_method: &'static str,
    problem_type: &'static str,
    target_type: &'static str,
    task_type: &'static str,
    external_tool_usage: bool,
    language: String,
    subjects: Vec<String>,
    models: Vec<CanonicalModel>,
    sample_bucket: u64,
    seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CanonicalModel {
    name: String,
    provider: &'static str,
    endpoint: String,
}

/// Computes the fingerprint of a plan.
///
/// # Errors
///
/// Returns a serialization error if canonical encoding fails (it cannot
/// for well-formed plans; the canonical form contains no floats).
pub fn fingerprint_plan(plan: &Plan, buckets: &SampleSizeBuckets) -> Result<Fingerprint> {
    let profile = &plan.profile;

    let mut subjects: Vec<String> = profile.subject_type.clone();
    subjects.sort_unstable();

    let mut models: Vec<CanonicalModel> = plan
        .models
        .iter()
        .map(|m| CanonicalModel {
            name: m.name.clone(),
            provider: m.provider_kind.as_str(),
            endpoint: m.endpoint.clone(),
        })
        .collect();
    models.sort_unstable_by(|a, b| (&a.name, &a.endpoint).cmp(&(&b.name, &b.endpoint)));

    let canonical = CanonicalPlan {
        schema_version: plan.schema_version,
        scoring_method: plan.directives.scoring_method.as_str(),
        problem_type: profile.problem_type.as_str(),
        target_type: profile.target_type.as_str(),
        task_type: profile.task_type.as_str(),
        external_tool_usage: profile.external_tool_usage,
        language: profile.language.trim().to_lowercase(),
        subjects,
        models,
        sample_bucket: buckets.bucket_for(profile.sample_size),
        seed: profile.seed,
    };

    let bytes = to_canonical_bytes(&canonical).map_err(|e| Error::Serialization {
        message: format!("canonical plan encoding failed: {e}"),
    })?;
    Ok(Fingerprint::from_digest(&bytes))
}

/// Computes the fingerprint of a maintenance (cleanup) request.
///
/// Identical cleanup requests coalesce the same way evaluation plans do.
///
/// # Errors
///
/// Returns a serialization error if canonical encoding fails.
pub fn fingerprint_cleanup(spec: &CleanupSpec) -> Result<Fingerprint> {
    #[derive(Serialize)]
    struct CanonicalCleanup<'a> {
        kind: &'static str,
        spec: &'a CleanupSpec,
    }

    let bytes = to_canonical_bytes(&CanonicalCleanup {
        kind: "maintenance_cleanup",
        spec,
    })
    .map_err(|e| Error::Serialization {
        message: format!("canonical cleanup encoding failed: {e}"),
    })?;
    Ok(Fingerprint::from_digest(&bytes))
}
