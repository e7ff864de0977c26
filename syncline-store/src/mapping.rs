//! Internal id ↔ external id pairs.
//!
//! At most one active mapping exists per (connector, entity type, internal id)
//! and per (connector, entity type, external id); both are enforced by partial
//! unique indexes. Mappings are soft-deleted through `active`.

use crate::error::{StoreError, StoreResult, UnknownVariant};
use crate::sql::{now, opt_json_col, opt_time_col, parse_col, time_col};
use crate::{SharedConnection, lock};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use syncline_types::{ConnectorId, Direction, EntityId, EntityType, ExternalId, OrgId};
use tracing::debug;

/// Outcome of the last sync through a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Pending,
    Completed,
    Failed,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Pending => "pending",
            MappingStatus::Completed => "completed",
            MappingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MappingStatus::Pending),
            "completed" => Ok(MappingStatus::Completed),
            "failed" => Ok(MappingStatus::Failed),
            other => Err(UnknownVariant::new("mapping status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: i64,
    pub org_id: OrgId,
    pub connector_id: ConnectorId,
    pub entity_type: EntityType,
    pub internal_id: EntityId,
    pub external_id: ExternalId,
    /// Model name on the external side (e.g. `res.partner`, `customer`).
    pub external_model: String,
    pub direction: Direction,
    pub sync_status: MappingStatus,
    pub active: bool,
    /// Payload of the last successful sync through this mapping.
    pub sync_data: Option<Value>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMapping {
    pub org_id: OrgId,
    pub connector_id: ConnectorId,
    pub entity_type: EntityType,
    pub internal_id: EntityId,
    pub external_id: ExternalId,
    pub external_model: String,
    pub direction: Direction,
    pub sync_data: Option<Value>,
}

/// Result of [`MappingStore::create`] and [`MappingStore::upsert`].
#[derive(Debug, Clone)]
pub enum MappingOutcome {
    Created(MappingRecord),
    /// An active mapping already covered the internal or external id.
    Existing(MappingRecord),
    /// Only from [`MappingStore::upsert`]: active mappings pairing either id
    /// with a different counterpart were deactivated in favour of `record`.
    Replaced {
        record: MappingRecord,
        replaced: Vec<MappingRecord>,
    },
}

impl MappingOutcome {
    pub fn record(&self) -> &MappingRecord {
        match self {
            MappingOutcome::Created(m) | MappingOutcome::Existing(m) => m,
            MappingOutcome::Replaced { record, .. } => record,
        }
    }

    pub fn into_record(self) -> MappingRecord {
        match self {
            MappingOutcome::Created(m) | MappingOutcome::Existing(m) => m,
            MappingOutcome::Replaced { record, .. } => record,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, MappingOutcome::Created(_))
    }
}

const MAPPING_COLUMNS: &str = "id, org_id, connector_id, entity_type, internal_id, external_id, \
     external_model, direction, sync_status, active, sync_data, last_synced_at, created_at, \
     updated_at";

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<MappingRecord> {
    let external: String = row.get(5)?;
    Ok(MappingRecord {
        id: row.get(0)?,
        org_id: parse_col(row, 1)?,
        connector_id: parse_col(row, 2)?,
        entity_type: parse_col(row, 3)?,
        internal_id: parse_col(row, 4)?,
        external_id: ExternalId::new(external),
        external_model: row.get(6)?,
        direction: parse_col(row, 7)?,
        sync_status: parse_col(row, 8)?,
        active: row.get(9)?,
        sync_data: opt_json_col(row, 10)?,
        last_synced_at: opt_time_col(row, 11)?,
        created_at: time_col(row, 12)?,
        updated_at: time_col(row, 13)?,
    })
}

fn select_by_internal(
    conn: &Connection,
    connector_id: &ConnectorId,
    entity_type: EntityType,
    internal_id: &EntityId,
) -> StoreResult<Option<MappingRecord>> {
    let sql = format!(
        "SELECT {MAPPING_COLUMNS} FROM integration_mapping \
         WHERE connector_id = ?1 AND entity_type = ?2 AND internal_id = ?3 AND active = 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![connector_id.to_string(), entity_type.as_str(), internal_id.to_string()],
            mapping_from_row,
        )
        .optional()?)
}

fn select_by_external(
    conn: &Connection,
    connector_id: &ConnectorId,
    entity_type: EntityType,
    external_id: &ExternalId,
) -> StoreResult<Option<MappingRecord>> {
    let sql = format!(
        "SELECT {MAPPING_COLUMNS} FROM integration_mapping \
         WHERE connector_id = ?1 AND entity_type = ?2 AND external_id = ?3 AND active = 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![connector_id.to_string(), entity_type.as_str(), external_id.as_str()],
            mapping_from_row,
        )
        .optional()?)
}

fn select_by_id(conn: &Connection, id: i64) -> StoreResult<Option<MappingRecord>> {
    let sql = format!("SELECT {MAPPING_COLUMNS} FROM integration_mapping WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], mapping_from_row).optional()?)
}

/// Inserts an active, completed mapping without checking for conflicts.
fn insert_mapping(conn: &Connection, new: &NewMapping) -> StoreResult<MappingRecord> {
    let now = now();
    let sync_data = new.sync_data.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO integration_mapping (org_id, connector_id, entity_type, internal_id, \
         external_id, external_model, direction, sync_status, active, sync_data, \
         last_synced_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'completed', 1, ?8, ?9, ?9, ?9)",
        params![
            new.org_id.to_string(),
            new.connector_id.to_string(),
            new.entity_type.as_str(),
            new.internal_id.to_string(),
            new.external_id.as_str(),
            new.external_model,
            new.direction.as_str(),
            sync_data,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    let record =
        select_by_id(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("mapping {id}")))?;
    debug!(
        "Mapped {} {} to external {}",
        record.entity_type, record.internal_id, record.external_id
    );
    Ok(record)
}

fn select_conflicting(conn: &Connection, new: &NewMapping) -> StoreResult<Option<MappingRecord>> {
    if let Some(m) = select_by_internal(conn, &new.connector_id, new.entity_type, &new.internal_id)? {
        return Ok(Some(m));
    }
    select_by_external(conn, &new.connector_id, new.entity_type, &new.external_id)
}

/// Persistent store for integration mappings.
#[derive(Clone)]
pub struct MappingStore {
    conn: SharedConnection,
}

impl MappingStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    pub fn get_by_internal(
        &self,
        connector_id: &ConnectorId,
        entity_type: EntityType,
        internal_id: &EntityId,
    ) -> StoreResult<Option<MappingRecord>> {
        let conn = lock(&self.conn)?;
        select_by_internal(&conn, connector_id, entity_type, internal_id)
    }

    pub fn get_by_external(
        &self,
        connector_id: &ConnectorId,
        entity_type: EntityType,
        external_id: &ExternalId,
    ) -> StoreResult<Option<MappingRecord>> {
        let conn = lock(&self.conn)?;
        select_by_external(&conn, connector_id, entity_type, external_id)
    }

    /// Inserts a completed mapping unless an active one already covers the
    /// internal or the external id, in which case that one is returned.
    pub fn create(&self, new: &NewMapping) -> StoreResult<MappingOutcome> {
        let conn = lock(&self.conn)?;
        if let Some(existing) = select_conflicting(&conn, new)? {
            return Ok(MappingOutcome::Existing(existing));
        }

        match insert_mapping(&conn, new) {
            Ok(record) => Ok(MappingOutcome::Created(record)),
            // Another writer on the same file won the race.
            Err(e) if e.is_unique_violation() => select_conflicting(&conn, new)?
                .map(MappingOutcome::Existing)
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Records a successful sync of exactly this internal/external pair.
    ///
    /// An active mapping of the same pair has its status, sync timestamp and
    /// payload refreshed. Active mappings that pair either id with another
    /// counterpart are deactivated and the pair is inserted, all in one
    /// transaction.
    pub fn upsert(&self, new: &NewMapping) -> StoreResult<MappingOutcome> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let by_internal = select_by_internal(&tx, &new.connector_id, new.entity_type, &new.internal_id)?;

        if let Some(current) = by_internal
            .as_ref()
            .filter(|m| m.external_id == new.external_id)
        {
            let sync_data = new.sync_data.as_ref().map(serde_json::to_string).transpose()?;
            tx.execute(
                "UPDATE integration_mapping SET sync_status = 'completed', \
                 sync_data = COALESCE(?2, sync_data), last_synced_at = ?3, updated_at = ?3 \
                 WHERE id = ?1",
                params![current.id, sync_data, now()],
            )?;
            let record = select_by_id(&tx, current.id)?
                .ok_or_else(|| StoreError::NotFound(format!("mapping {}", current.id)))?;
            tx.commit()?;
            return Ok(MappingOutcome::Existing(record));
        }

        let by_external = select_by_external(&tx, &new.connector_id, new.entity_type, &new.external_id)?;
        let replaced: Vec<MappingRecord> = by_internal.into_iter().chain(by_external).collect();
        for stale in &replaced {
            tx.execute(
                "UPDATE integration_mapping SET active = 0, updated_at = ?2 WHERE id = ?1",
                params![stale.id, now()],
            )?;
            debug!(
                "Deactivated mapping {} ({} {} to external {})",
                stale.id, stale.entity_type, stale.internal_id, stale.external_id
            );
        }
        let record = insert_mapping(&tx, new)?;
        tx.commit()?;

        if replaced.is_empty() {
            Ok(MappingOutcome::Created(record))
        } else {
            Ok(MappingOutcome::Replaced { record, replaced })
        }
    }

    pub fn mark_status(&self, id: i64, status: MappingStatus) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE integration_mapping SET sync_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("mapping {id}")));
        }
        Ok(())
    }

    /// Soft delete. Returns `false` if the mapping was already inactive.
    pub fn deactivate(&self, id: i64) -> StoreResult<bool> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE integration_mapping SET active = 0, updated_at = ?2 WHERE id = ?1 AND active = 1",
            params![id, now()],
        )?;
        Ok(changed == 1)
    }

    pub fn list_active(
        &self,
        connector_id: &ConnectorId,
        entity_type: EntityType,
    ) -> StoreResult<Vec<MappingRecord>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM integration_mapping \
             WHERE connector_id = ?1 AND entity_type = ?2 AND active = 1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![connector_id.to_string(), entity_type.as_str()],
            mapping_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
