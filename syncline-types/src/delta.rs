//! Delta snapshots: the cached result of comparing two systems.

use crate::{Direction, EntityType, ExternalSystem, OrgId, RecordSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One partition of a delta: exact count plus a bounded sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBucket {
    /// Number of records in this partition.
    pub count: usize,
    /// The first records of the partition, in source iteration order.
    pub records: Vec<RecordSummary>,
}

impl DeltaBucket {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The new / updated / deleted partitions for one (org, system, entity type,
/// direction), valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSnapshot {
    pub org_id: OrgId,
    pub system: ExternalSystem,
    pub entity_type: EntityType,
    pub direction: Direction,
    pub new: DeltaBucket,
    pub updated: DeltaBucket,
    pub deleted: DeltaBucket,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DeltaSnapshot {
    /// A snapshot is stale once `now` reaches `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Total number of records that differ between the two sides.
    pub fn total_changes(&self) -> usize {
        self.new.count + self.updated.count + self.deleted.count
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}
