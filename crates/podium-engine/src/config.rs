//! Engine configuration, loaded from `PODIUM_*` environment variables.
//!
//! Every recognized option, with its effect:
//!
//! | Variable | Effect | Default |
//! |---|---|---|
//! | `PODIUM_TASK_MAX_DURATION` | hard ceiling on task runtime | `15m` |
//! | `PODIUM_SAMPLE_SIZE_BUCKETS` | fingerprint bucketing ladder | `10,25,50,100,250,500,1000` |
//! | `PODIUM_CACHE_TTL` | staleness threshold for cache rows | `24h` |
//! | `PODIUM_MIN_CACHE_REUSE_SAMPLES` | floor for cache reuse | `25` |
//! | `PODIUM_CANCEL_LATENCY_BOUND` | max wait between cancel and worker acknowledgment | `5s` |
//! | `PODIUM_LEASE_TTL` | worker ownership window | `30s` |
//! | `PODIUM_PROGRESS_MIN_INTERVAL` | rate limit on progress writes | `500ms` |
//! | `PODIUM_CREDENTIAL_ENVELOPE_TTL` | lifetime of credential envelopes | `1h` |
//! | `PODIUM_WORKER_CONCURRENCY` | worker loops per process | `4` |
//!
//! Durations accept humantime strings (`30s`, `5m`); the bucket ladder
//! is a comma-separated integer list.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::fingerprint::SampleSizeBuckets;

/// Runtime configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on task runtime; beyond it the worker self-cancels
    /// with error kind `timeout`.
    pub task_max_duration: Duration,
    /// Fingerprint bucketing ladder; requests above its top bucket are
    /// clamped to it.
    pub sample_size_buckets: SampleSizeBuckets,
    /// Cache rows older than this are stale.
    pub cache_ttl: Duration,
    /// Plans requesting fewer samples than this bypass the cache
    /// (results too noisy to reuse).
    pub min_cache_reuse_samples: u64,
    /// Maximum wait between a cancel request and the worker observing it.
    pub cancel_latency_bound: Duration,
    /// Worker ownership window per delivery.
    pub lease_ttl: Duration,
    /// Minimum interval between accepted progress writes.
    pub progress_min_interval: Duration,
    /// Lifetime of credential envelopes.
    pub credential_envelope_ttl: Duration,
    /// Worker loops per process.
    pub worker_concurrency: usize,
    /// Maximum evaluator attempts per task (retryable errors only).
    pub evaluator_max_attempts: u32,
    /// Base backoff between evaluator retries (doubled per attempt,
    /// plus jitter).
    pub retry_base_backoff: Duration,
    /// Maximum attempts for a sample batch write.
    pub storage_max_attempts: u32,
    /// Base backoff between storage retries.
    pub storage_base_backoff: Duration,
    /// How long a worker blocks on an empty queue per claim call.
    pub claim_wait: Duration,
    /// Maximum models per plan.
    pub max_models: usize,
    /// Version stamp written onto cache rows; bump to invalidate rows
    /// produced by older evaluator builds.
    pub evaluator_version: u32,
    /// Pinned minimum evaluator version for cache reuse.
    pub min_evaluator_version: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_max_duration: Duration::from_secs(15 * 60),
            sample_size_buckets: SampleSizeBuckets::default(),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            min_cache_reuse_samples: 25,
            cancel_latency_bound: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
            progress_min_interval: Duration::from_millis(500),
            credential_envelope_ttl: Duration::from_secs(60 * 60),
            worker_concurrency: 4,
            evaluator_max_attempts: 3,
            retry_base_backoff: Duration::from_millis(500),
            storage_max_attempts: 4,
            storage_base_backoff: Duration::from_millis(100),
            claim_wait: Duration::from_secs(1),
            max_models: 10,
            evaluator_version: 1,
            min_evaluator_version: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `PODIUM_*` environment variables,
    /// falling back to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparseable values.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = read_env("PODIUM_TASK_MAX_DURATION") {
            config.task_max_duration = parse_duration("PODIUM_TASK_MAX_DURATION", &value)?;
        }
        if let Some(value) = read_env("PODIUM_SAMPLE_SIZE_BUCKETS") {
            config.sample_size_buckets = parse_buckets(&value)?;
        }
        if let Some(value) = read_env("PODIUM_CACHE_TTL") {
            config.cache_ttl = parse_duration("PODIUM_CACHE_TTL", &value)?;
        }
        if let Some(value) = read_env("PODIUM_MIN_CACHE_REUSE_SAMPLES") {
            config.min_cache_reuse_samples =
                parse_int("PODIUM_MIN_CACHE_REUSE_SAMPLES", &value)?;
        }
        if let Some(value) = read_env("PODIUM_CANCEL_LATENCY_BOUND") {
            config.cancel_latency_bound = parse_duration("PODIUM_CANCEL_LATENCY_BOUND", &value)?;
        }
        if let Some(value) = read_env("PODIUM_LEASE_TTL") {
            config.lease_ttl = parse_duration("PODIUM_LEASE_TTL", &value)?;
        }
        if let Some(value) = read_env("PODIUM_PROGRESS_MIN_INTERVAL") {
            config.progress_min_interval =
                parse_duration("PODIUM_PROGRESS_MIN_INTERVAL", &value)?;
        }
        if let Some(value) = read_env("PODIUM_CREDENTIAL_ENVELOPE_TTL") {
            config.credential_envelope_ttl =
                parse_duration("PODIUM_CREDENTIAL_ENVELOPE_TTL", &value)?;
        }
        if let Some(value) = read_env("PODIUM_WORKER_CONCURRENCY") {
            let concurrency: u64 = parse_int("PODIUM_WORKER_CONCURRENCY", &value)?;
            if concurrency == 0 {
                return Err(Error::validation(
                    "PODIUM_WORKER_CONCURRENCY must be at least 1",
                ));
            }
            config.worker_concurrency = usize::try_from(concurrency)
                .map_err(|_| Error::validation("PODIUM_WORKER_CONCURRENCY out of range"))?;
        }

        Ok(config)
    }

    /// The sample-size ceiling (top of the bucket ladder); oversized
    /// requests are clamped to it during validation.
    #[must_use]
    pub fn max_sample_size(&self) -> u64 {
        self.sample_size_buckets.max()
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| Error::validation(format!("{name}: invalid duration '{value}': {e}")))
}

fn parse_int(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::validation(format!("{name}: invalid integer '{value}': {e}")))
}

fn parse_buckets(value: &str) -> Result<SampleSizeBuckets> {
    let ladder: Vec<u64> = value
        .split(',')
        .map(|part| parse_int("PODIUM_SAMPLE_SIZE_BUCKETS", part))
        .collect::<Result<_>>()?;
    SampleSizeBuckets::new(ladder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.max_sample_size(), 1000);
        assert_eq!(config.progress_min_interval, Duration::from_millis(500));
        assert_eq!(config.cancel_latency_bound, Duration::from_secs(5));
    }

    #[test]
    fn parse_buckets_accepts_comma_list() {
        let buckets = parse_buckets("10,50,100").unwrap();
        assert_eq!(buckets.bucket_for(30), 50);
        assert_eq!(buckets.max(), 100);
    }

    #[test]
    fn parse_buckets_rejects_garbage() {
        assert!(parse_buckets("10,abc").is_err());
        assert!(parse_buckets("100,10").is_err());
    }

    #[test]
    fn parse_duration_accepts_humantime() {
        assert_eq!(
            parse_duration("X", "90s").unwrap(),
            Duration::from_secs(90)
        );
        assert_eq!(
            parse_duration("X", "5m").unwrap(),
            Duration::from_secs(300)
        );
        assert!(parse_duration("X", "whenever").is_err());
    }
}
