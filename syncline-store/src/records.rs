//! The local system of record.

use crate::error::{StoreError, StoreResult};
use crate::sql::{json_col, now, parse_col, time_col};
use crate::{SharedConnection, lock};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use syncline_types::{EntityId, EntityRecord, EntityType, OrgId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: EntityId,
    pub org_id: OrgId,
    pub entity_type: EntityType,
    pub natural_key: String,
    /// The record body; its `id` equals `self.id`.
    pub record: EntityRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const RECORD_COLUMNS: &str =
    "id, org_id, entity_type, natural_key, payload, created_at, updated_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<LocalRecord> {
    Ok(LocalRecord {
        id: parse_col(row, 0)?,
        org_id: parse_col(row, 1)?,
        entity_type: parse_col(row, 2)?,
        natural_key: row.get(3)?,
        record: json_col(row, 4)?,
        created_at: time_col(row, 5)?,
        updated_at: time_col(row, 6)?,
    })
}

fn select_record(conn: &Connection, id: &EntityId) -> StoreResult<Option<LocalRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM local_record WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], record_from_row)
        .optional()?)
}

#[derive(Clone)]
pub struct RecordStore {
    conn: SharedConnection,
}

impl RecordStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Records of one type in insertion order.
    pub fn list(&self, org_id: &OrgId, entity_type: EntityType) -> StoreResult<Vec<LocalRecord>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM local_record WHERE org_id = ?1 AND entity_type = ?2 \
             ORDER BY rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![org_id.to_string(), entity_type.as_str()],
            record_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get(&self, id: &EntityId) -> StoreResult<Option<LocalRecord>> {
        let conn = lock(&self.conn)?;
        select_record(&conn, id)
    }

    pub fn find_by_natural_key(
        &self,
        org_id: &OrgId,
        entity_type: EntityType,
        natural_key: &str,
    ) -> StoreResult<Option<LocalRecord>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM local_record \
             WHERE org_id = ?1 AND entity_type = ?2 AND natural_key = ?3"
        );
        Ok(conn
            .query_row(
                &sql,
                params![org_id.to_string(), entity_type.as_str(), natural_key],
                record_from_row,
            )
            .optional()?)
    }

    /// Inserts a record under a fresh local id. The natural key is taken
    /// from the record as given, before its id is replaced, so an id-keyed
    /// record stays findable under the id it arrived with.
    pub fn insert(&self, org_id: &OrgId, record: &EntityRecord) -> StoreResult<LocalRecord> {
        let id = EntityId::new();
        let natural_key = record.natural_key();
        let mut record = record.clone();
        record.set_id(id.to_string());
        let payload = serde_json::to_string(&record)?;

        let conn = lock(&self.conn)?;
        let now = now();
        conn.execute(
            "INSERT INTO local_record (id, org_id, entity_type, natural_key, payload, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                org_id.to_string(),
                record.entity_type().as_str(),
                natural_key,
                payload,
                now,
            ],
        )?;
        select_record(&conn, &id)?.ok_or_else(|| StoreError::NotFound(format!("record {id}")))
    }

    /// Replaces the body of an existing record, keeping its id. The natural
    /// key is taken from the record as given, like [`insert`](Self::insert).
    pub fn update(&self, id: &EntityId, record: &EntityRecord) -> StoreResult<LocalRecord> {
        let natural_key = record.natural_key();
        let mut record = record.clone();
        record.set_id(id.to_string());
        let payload = serde_json::to_string(&record)?;

        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE local_record SET natural_key = ?2, payload = ?3, updated_at = ?4 WHERE id = ?1",
            params![id.to_string(), natural_key, payload, now()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("record {id}")));
        }
        select_record(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("record {id}")))
    }

    pub fn count(&self, org_id: &OrgId, entity_type: EntityType) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM local_record WHERE org_id = ?1 AND entity_type = ?2",
            params![org_id.to_string(), entity_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
