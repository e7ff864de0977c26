//! Error types for the sync engine.

use syncline_store::StoreError;
use syncline_types::QueueId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection failure or unexpected upstream status.
    #[error("network error: {0}")]
    Network(String),

    /// An upstream call did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Credentials rejected by the external system.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The external system asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Malformed or unmappable payload.
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity not found on the external side.
    #[error("not found: {0}")]
    NotFound(String),

    /// The external system reported a conflicting write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("queue not found: {0}")]
    QueueNotFound(QueueId),

    /// Selector does not apply to the requested direction.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether another attempt could succeed without operator input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::RateLimited(_)
                | SyncError::Conflict(_)
                | SyncError::Storage(_)
        )
    }

    /// Whether the failure came from the external system.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Timeout(_)
                | SyncError::Auth(_)
                | SyncError::RateLimited(_)
                | SyncError::Validation(_)
                | SyncError::NotFound(_)
                | SyncError::Conflict(_)
        )
    }
}
