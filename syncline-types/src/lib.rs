//! Core type definitions for syncline.
//!
//! This crate defines the plain data shared by the store and the engine:
//! - Identifier newtypes (UUID v7 for local ids, strings for external ids)
//! - Entity types, sync directions and external systems
//! - The tagged entity envelope with per-type change-detection fields
//! - Delta snapshots served by the preview cache

mod delta;
mod entity;
mod ids;
mod kinds;

pub use delta::{DeltaBucket, DeltaSnapshot};
pub use entity::{
    CustomerInsights, CustomerRecord, CustomerSegment, EntityRecord, OrderRecord, ProductRecord,
    RecordSummary,
};
pub use ids::{ConnectorId, EntityId, ExternalId, LineId, OrgId, QueueId, UserId};
pub use kinds::{Direction, EntityType, ExternalSystem};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("unknown sync direction: {0}")]
    UnknownDirection(String),

    #[error("unknown external system: {0}")]
    UnknownSystem(String),
}
