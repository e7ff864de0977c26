//! Which entities a new sync run covers.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use syncline_types::{Direction, EntityId, ExternalId};

/// The universe of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncSelector {
    /// Every record of the source side.
    #[default]
    All,
    /// One external record (inbound).
    ExternalId { id: ExternalId },
    /// One record by email, SKU or order id, looked up on the source side.
    NaturalKey { key: String },
    /// Explicit external records (inbound). Unknown ids are skipped.
    ExternalIds { ids: Vec<ExternalId> },
    /// Explicit local records (outbound). Unknown ids are skipped.
    LocalIds { ids: Vec<EntityId> },
    /// The new and/or updated buckets of a freshly computed delta.
    Delta {
        #[serde(default = "enabled")]
        include_new: bool,
        #[serde(default = "enabled")]
        include_updated: bool,
    },
}

fn enabled() -> bool {
    true
}

impl SyncSelector {
    /// Rejects selectors that do not apply to the direction or select nothing.
    pub fn validate(&self, direction: Direction) -> SyncResult<()> {
        match (self, direction) {
            (SyncSelector::ExternalId { .. } | SyncSelector::ExternalIds { .. }, Direction::Outbound) => {
                Err(SyncError::InvalidSelector(format!(
                    "{self} selects external records and only applies to inbound sync"
                )))
            }
            (SyncSelector::LocalIds { .. }, Direction::Inbound) => Err(SyncError::InvalidSelector(
                format!("{self} selects local records and only applies to outbound sync"),
            )),
            (SyncSelector::ExternalId { id }, _) if id.is_empty() => Err(
                SyncError::InvalidSelector("external id must not be empty".into()),
            ),
            (SyncSelector::NaturalKey { key }, _) if key.trim().is_empty() => Err(
                SyncError::InvalidSelector("natural key must not be empty".into()),
            ),
            (SyncSelector::ExternalIds { ids }, _) if ids.is_empty() => Err(
                SyncError::InvalidSelector("external_ids needs at least one id".into()),
            ),
            (SyncSelector::LocalIds { ids }, _) if ids.is_empty() => Err(
                SyncError::InvalidSelector("local_ids needs at least one id".into()),
            ),
            (
                SyncSelector::Delta {
                    include_new: false,
                    include_updated: false,
                },
                _,
            ) => Err(SyncError::InvalidSelector(
                "delta selector includes neither new nor updated records".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SyncSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncSelector::All => f.write_str("all"),
            SyncSelector::ExternalId { id } => write!(f, "external id {id}"),
            SyncSelector::NaturalKey { key } => write!(f, "natural key {key}"),
            SyncSelector::ExternalIds { ids } => write!(f, "{} external ids", ids.len()),
            SyncSelector::LocalIds { ids } => write!(f, "{} local ids", ids.len()),
            SyncSelector::Delta {
                include_new,
                include_updated,
            } => match (include_new, include_updated) {
                (true, true) => f.write_str("delta (new and updated)"),
                (true, false) => f.write_str("delta (new)"),
                _ => f.write_str("delta (updated)"),
            },
        }
    }
}
