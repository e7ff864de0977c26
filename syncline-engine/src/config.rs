//! Engine configuration.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: u32 = 1000;
/// Longest accepted inter-batch delay (ms).
pub const MAX_BATCH_DELAY_MS: u64 = 60_000;
/// Longest accepted preview TTL (one week).
pub const MAX_PREVIEW_TTL_SECS: u64 = 7 * 24 * 3600;

/// Batch pacing defaults for new queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Lines claimed per batch.
    pub batch_size: u32,
    /// Pause after each full batch (ms), to respect upstream rate limits.
    pub batch_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 2000,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> SyncResult<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SyncError::Config(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.batch_delay_ms > MAX_BATCH_DELAY_MS {
            return Err(SyncError::Config(format!(
                "batch_delay_ms must be at most {MAX_BATCH_DELAY_MS}, got {}",
                self.batch_delay_ms
            )));
        }
        Ok(())
    }
}

/// Delta detection and preview cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Lifetime of a cached snapshot. Zero disables caching.
    pub ttl_secs: u64,
    /// Records kept per bucket in a snapshot.
    pub sample_limit: usize,
    /// Upper bound on records read from the external listing.
    pub max_external_records: Option<usize>,
    /// Budget for the whole external listing (ms).
    pub fetch_timeout_ms: u64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sample_limit: 20,
            max_external_records: None,
            fetch_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub delta: DeltaConfig,
    /// Processing runs after which a queue is flagged for attention, and the
    /// ceiling below which failed lines are re-drafted by a retry.
    pub max_process_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            delta: DeltaConfig::default(),
            max_process_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> SyncResult<()> {
        self.batch.validate()?;
        if self.retry.max_retries == 0 {
            return Err(SyncError::Config("retry.max_retries must be at least 1".into()));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier > 0.0) {
            return Err(SyncError::Config(format!(
                "retry.multiplier must be positive, got {}",
                self.retry.multiplier
            )));
        }
        if self.delta.ttl_secs > MAX_PREVIEW_TTL_SECS {
            return Err(SyncError::Config(format!(
                "delta.ttl_secs must be at most {MAX_PREVIEW_TTL_SECS}, got {}",
                self.delta.ttl_secs
            )));
        }
        if self.delta.fetch_timeout_ms == 0 {
            return Err(SyncError::Config("delta.fetch_timeout_ms must be positive".into()));
        }
        if self.max_process_attempts == 0 {
            return Err(SyncError::Config("max_process_attempts must be at least 1".into()));
        }
        Ok(())
    }
}
