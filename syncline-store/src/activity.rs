//! Append-only audit trail of sync operations.

use crate::error::{StoreResult, UnknownVariant};
use crate::sql::{now, opt_json_col, opt_parse_col, parse_col, time_col, u32_col, u64_col};
use crate::{MAX_ERROR_CHARS, SharedConnection, lock, sanitize_text};
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use syncline_types::{Direction, EntityId, EntityType, ExternalId, LineId, OrgId, QueueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Success,
    Failed,
    Skipped,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Failed => "failed",
            ActivityStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ActivityStatus::Success),
            "failed" => Ok(ActivityStatus::Failed),
            "skipped" => Ok(ActivityStatus::Skipped),
            other => Err(UnknownVariant::new("activity status", other)),
        }
    }
}

/// What a logged step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    /// A line that could not be synced.
    Sync,
    ForceDone,
    Retry,
    DeltaComputed,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Sync => "sync",
            Operation::ForceDone => "force_done",
            Operation::Retry => "retry",
            Operation::DeltaComputed => "delta_computed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "sync" => Ok(Operation::Sync),
            "force_done" => Ok(Operation::ForceDone),
            "retry" => Ok(Operation::Retry),
            "delta_computed" => Ok(Operation::DeltaComputed),
            other => Err(UnknownVariant::new("operation", other)),
        }
    }
}

/// A stored activity entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub org_id: OrgId,
    pub queue_id: Option<QueueId>,
    pub line_id: Option<LineId>,
    pub entity_type: EntityType,
    pub entity_id: Option<EntityId>,
    pub external_id: Option<ExternalId>,
    pub direction: Option<Direction>,
    pub status: ActivityStatus,
    pub operation: Operation,
    pub records_affected: u32,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// An entry to append.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub org_id: OrgId,
    pub queue_id: Option<QueueId>,
    pub line_id: Option<LineId>,
    pub entity_type: EntityType,
    pub entity_id: Option<EntityId>,
    pub external_id: Option<ExternalId>,
    pub direction: Option<Direction>,
    pub status: ActivityStatus,
    pub operation: Operation,
    pub records_affected: u32,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
}

impl NewActivity {
    pub fn new(
        org_id: OrgId,
        entity_type: EntityType,
        operation: Operation,
        status: ActivityStatus,
    ) -> Self {
        Self {
            org_id,
            queue_id: None,
            line_id: None,
            entity_type,
            entity_id: None,
            external_id: None,
            direction: None,
            status,
            operation,
            records_affected: 0,
            duration_ms: 0,
            message: None,
            request_payload: None,
            response_payload: None,
        }
    }

    pub fn with_queue(mut self, queue_id: QueueId) -> Self {
        self.queue_id = Some(queue_id);
        self
    }

    pub fn with_line(mut self, line_id: LineId) -> Self {
        self.line_id = Some(line_id);
        self
    }

    pub fn with_entity(mut self, entity_id: Option<EntityId>, external_id: Option<ExternalId>) -> Self {
        self.entity_id = entity_id;
        self.external_id = external_id;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_records(mut self, records_affected: u32) -> Self {
        self.records_affected = records_affected;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payloads(mut self, request: Option<Value>, response: Option<Value>) -> Self {
        self.request_payload = request;
        self.response_payload = response;
        self
    }
}

const ACTIVITY_COLUMNS: &str = "id, org_id, queue_id, line_id, entity_type, entity_id, \
     external_id, direction, status, operation, records_affected, duration_ms, message, \
     request_payload, response_payload, created_at";

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let external: Option<String> = row.get(6)?;
    Ok(ActivityEntry {
        id: row.get(0)?,
        org_id: parse_col(row, 1)?,
        queue_id: opt_parse_col(row, 2)?,
        line_id: opt_parse_col(row, 3)?,
        entity_type: parse_col(row, 4)?,
        entity_id: opt_parse_col(row, 5)?,
        external_id: external.map(ExternalId::new),
        direction: opt_parse_col(row, 7)?,
        status: parse_col(row, 8)?,
        operation: parse_col(row, 9)?,
        records_affected: u32_col(row, 10)?,
        duration_ms: u64_col(row, 11)?,
        message: row.get(12)?,
        request_payload: opt_json_col(row, 13)?,
        response_payload: opt_json_col(row, 14)?,
        created_at: time_col(row, 15)?,
    })
}

/// The activity log. Entries are only ever appended.
#[derive(Clone)]
pub struct ActivityLog {
    conn: SharedConnection,
}

impl ActivityLog {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Appends an entry and returns its id.
    pub fn append(&self, entry: &NewActivity) -> StoreResult<i64> {
        let request = entry.request_payload.as_ref().map(serde_json::to_string).transpose()?;
        let response = entry.response_payload.as_ref().map(serde_json::to_string).transpose()?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO sync_activity (org_id, queue_id, line_id, entity_type, entity_id, \
             external_id, direction, status, operation, records_affected, duration_ms, message, \
             request_payload, response_payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                entry.org_id.to_string(),
                entry.queue_id.map(|id| id.to_string()),
                entry.line_id.map(|id| id.to_string()),
                entry.entity_type.as_str(),
                entry.entity_id.map(|id| id.to_string()),
                entry.external_id.as_ref().map(|id| id.as_str().to_string()),
                entry.direction.map(|d| d.as_str()),
                entry.status.as_str(),
                entry.operation.as_str(),
                i64::from(entry.records_affected),
                entry.duration_ms as i64,
                entry.message.as_deref().map(|m| sanitize_text(m, MAX_ERROR_CHARS)),
                request,
                response,
                now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Entries of a queue, newest first.
    pub fn for_queue(&self, queue_id: &QueueId, limit: usize) -> StoreResult<Vec<ActivityEntry>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM sync_activity WHERE queue_id = ?1 \
             ORDER BY id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![queue_id.to_string(), limit as i64], activity_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Entries of an org, newest first.
    pub fn for_org(&self, org_id: &OrgId, limit: usize) -> StoreResult<Vec<ActivityEntry>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM sync_activity WHERE org_id = ?1 \
             ORDER BY id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id.to_string(), limit as i64], activity_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_for_queue(&self, queue_id: &QueueId) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sync_activity WHERE queue_id = ?1",
            params![queue_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
