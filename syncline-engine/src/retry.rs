//! In-process retry of a single queue line with exponential backoff.
//!
//! The retry loop runs inside the batch, not through the queue. The line's
//! retry count and last error are written after every failed attempt, and
//! the line is marked `failed` once the budget is spent.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use syncline_store::{QueueStore, SyncQueueLine};
use tracing::{debug, warn};

/// Retry budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per line before it is marked failed.
    pub max_retries: u32,
    /// Wait after the first failed attempt (ms).
    pub initial_backoff_ms: u64,
    /// Growth factor between consecutive waits. Values below 1 are treated as 1.
    pub multiplier: f64,
    /// Give up immediately on errors that cannot succeed on a second try.
    pub fail_fast_on_validation: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            multiplier: 2.0,
            fail_fast_on_validation: false,
        }
    }
}

impl RetryPolicy {
    /// Wait after the failure with the given zero-based index:
    /// `initial_backoff_ms * multiplier^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let ms = self.initial_backoff_ms as f64 * factor;
        // `as` saturates at u64::MAX for huge or infinite values.
        Duration::from_millis(ms as u64)
    }

    /// Whether to try again after `failures` failed attempts ending in `err`.
    pub fn should_retry(&self, err: &SyncError, failures: u32) -> bool {
        if failures >= self.max_retries {
            return false;
        }
        !self.fail_fast_on_validation || err.is_retryable()
    }
}

/// How a retried unit of work ended.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { error: SyncError, attempts: u32 },
}

/// Drives one line through its retry budget.
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    queues: QueueStore,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, queues: QueueStore) -> Self {
        Self { policy, queues }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds or the budget is spent. On exhaustion the
    /// line is marked `failed` with the last error. Storage failures while
    /// recording attempts are logged; the attempt outcome still stands.
    pub async fn run<T, F, Fut>(&self, line: &SyncQueueLine, mut op: F) -> AttemptOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut failures: u32 = 0;
        loop {
            let err = match op().await {
                Ok(value) => {
                    return AttemptOutcome::Succeeded {
                        value,
                        attempts: failures + 1,
                    };
                }
                Err(err) => err,
            };

            failures += 1;
            let message = err.to_string();
            if let Err(e) = self.queues.record_attempt_failure(&line.id, failures, &message) {
                warn!("Failed to record attempt {} for line {}: {}", failures, line.id, e);
            }

            if !self.policy.should_retry(&err, failures) {
                match self.queues.mark_line_failed(&line.id, &message, failures) {
                    Ok(true) => {}
                    Ok(false) => warn!("Line {} was no longer processing when it failed", line.id),
                    Err(e) => warn!("Failed to mark line {} failed: {}", line.id, e),
                }
                warn!(
                    "Line {} ({}) failed after {} attempts: {}",
                    line.id, line.external_key, failures, message
                );
                return AttemptOutcome::Exhausted {
                    error: err,
                    attempts: failures,
                };
            }

            let delay = self.policy.delay_for(failures - 1);
            debug!(
                "Attempt {} for line {} failed ({}), retrying in {:?}",
                failures, line.id, message, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
