//! Sync queues and their lines.
//!
//! A queue is one run of one entity type in one direction. Its lines are the
//! individual records to move, processed in creation (`position`) order.
//! Queue counters are never adjusted incrementally: [`QueueStore::refresh_counts`]
//! recomputes them from line states.

use crate::error::{StoreError, StoreResult, UnknownVariant};
use crate::sql::{
    json_col, now, opt_parse_col, opt_time_col, parse_col, time_col, ts, u32_col, u64_col,
};
use crate::{MAX_ERROR_CHARS, MAX_NAME_CHARS, SharedConnection, lock, sanitize_text};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use syncline_types::{
    ConnectorId, Direction, EntityId, EntityRecord, EntityType, ExternalSystem, LineId, OrgId,
    QueueId, UserId,
};
use tracing::debug;

// ── States ───────────────────────────────────────────────────────

/// Lifecycle of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Draft,
    Processing,
    Done,
    DoneWithErrors,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Draft => "draft",
            QueueState::Processing => "processing",
            QueueState::Done => "done",
            QueueState::DoneWithErrors => "done_with_errors",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, QueueState::Done | QueueState::DoneWithErrors)
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QueueState::Draft),
            "processing" => Ok(QueueState::Processing),
            "done" => Ok(QueueState::Done),
            "done_with_errors" => Ok(QueueState::DoneWithErrors),
            other => Err(UnknownVariant::new("queue state", other)),
        }
    }
}

/// Lifecycle of a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Draft,
    Processing,
    Done,
    Failed,
    Skipped,
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Draft => "draft",
            LineState::Processing => "processing",
            LineState::Done => "done",
            LineState::Failed => "failed",
            LineState::Skipped => "skipped",
        }
    }

    /// Terminal for the current run. `Failed` lines may be re-drafted by a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LineState::Done | LineState::Failed | LineState::Skipped)
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(LineState::Draft),
            "processing" => Ok(LineState::Processing),
            "done" => Ok(LineState::Done),
            "failed" => Ok(LineState::Failed),
            "skipped" => Ok(LineState::Skipped),
            other => Err(UnknownVariant::new("line state", other)),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Per-state line counts, plus the create/update split of done lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub total: u32,
    pub draft: u32,
    pub processing: u32,
    pub done: u32,
    pub failed: u32,
    pub skipped: u32,
    pub created: u32,
    pub updated: u32,
}

impl QueueCounts {
    /// Lines that reached a terminal state.
    pub fn processed(&self) -> u32 {
        self.done + self.failed + self.skipped
    }

    /// Whole-number percentage of terminal lines. An empty queue is complete.
    pub fn progress_percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = (u64::from(self.processed()) * 100) / u64::from(self.total);
        pct.min(100) as u8
    }
}

/// A sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueue {
    pub id: QueueId,
    pub org_id: OrgId,
    pub name: String,
    pub connector_id: ConnectorId,
    pub system: ExternalSystem,
    pub entity_type: EntityType,
    pub direction: Direction,
    pub idempotency_key: String,
    pub batch_size: u32,
    pub batch_delay_ms: u64,
    pub state: QueueState,
    pub counts: QueueCounts,
    /// Number of times processing was started for this queue.
    pub process_count: u32,
    pub action_required: bool,
    pub action_required_reason: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_process_date: Option<DateTime<Utc>>,
}

/// Input for [`QueueStore::create_queue`].
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub org_id: OrgId,
    pub name: String,
    pub connector_id: ConnectorId,
    pub system: ExternalSystem,
    pub entity_type: EntityType,
    pub direction: Direction,
    pub idempotency_key: String,
    pub batch_size: u32,
    pub batch_delay_ms: u64,
    pub created_by: Option<UserId>,
}

/// One record to move within a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueLine {
    pub id: LineId,
    pub queue_id: QueueId,
    pub org_id: OrgId,
    pub position: i64,
    /// Identifier of the record on the source side: the external id for
    /// inbound runs, the local id for outbound runs.
    pub external_key: String,
    pub natural_key: String,
    /// Local id, known up front for outbound lines and after success for inbound.
    pub internal_id: Option<EntityId>,
    pub payload: EntityRecord,
    pub state: LineState,
    pub error_message: Option<String>,
    /// Failed attempts during the current run.
    pub retry_count: u32,
    /// Number of times the line was picked up for processing.
    pub process_count: u32,
    pub was_update: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_process_date: Option<DateTime<Utc>>,
}

/// Input for [`QueueStore::add_lines`].
#[derive(Debug, Clone)]
pub struct NewLine {
    pub external_key: String,
    pub internal_id: Option<EntityId>,
    pub payload: EntityRecord,
}

/// Result of [`QueueStore::create_queue`].
#[derive(Debug, Clone)]
pub enum QueueCreation {
    Created(SyncQueue),
    /// The idempotency key was already bound in this org.
    Existing(SyncQueue),
}

impl QueueCreation {
    pub fn queue(&self) -> &SyncQueue {
        match self {
            QueueCreation::Created(q) | QueueCreation::Existing(q) => q,
        }
    }

    pub fn into_queue(self) -> SyncQueue {
        match self {
            QueueCreation::Created(q) | QueueCreation::Existing(q) => q,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, QueueCreation::Created(_))
    }
}

// ── Row mapping ──────────────────────────────────────────────────

const QUEUE_COLUMNS: &str = "id, org_id, name, connector_id, system, entity_type, direction, \
     idempotency_key, batch_size, batch_delay_ms, state, total_count, draft_count, \
     processing_count, done_count, failed_count, skipped_count, created_count, updated_count, \
     process_count, is_action_required, action_required_reason, created_by, created_at, \
     updated_at, last_process_date";

const LINE_COLUMNS: &str = "id, queue_id, org_id, position, external_key, natural_key, \
     internal_id, payload, state, error_message, retry_count, process_count, was_update, \
     created_at, updated_at, last_process_date";

fn queue_from_row(row: &Row<'_>) -> rusqlite::Result<SyncQueue> {
    Ok(SyncQueue {
        id: parse_col(row, 0)?,
        org_id: parse_col(row, 1)?,
        name: row.get(2)?,
        connector_id: parse_col(row, 3)?,
        system: parse_col(row, 4)?,
        entity_type: parse_col(row, 5)?,
        direction: parse_col(row, 6)?,
        idempotency_key: row.get(7)?,
        batch_size: u32_col(row, 8)?,
        batch_delay_ms: u64_col(row, 9)?,
        state: parse_col(row, 10)?,
        counts: QueueCounts {
            total: u32_col(row, 11)?,
            draft: u32_col(row, 12)?,
            processing: u32_col(row, 13)?,
            done: u32_col(row, 14)?,
            failed: u32_col(row, 15)?,
            skipped: u32_col(row, 16)?,
            created: u32_col(row, 17)?,
            updated: u32_col(row, 18)?,
        },
        process_count: u32_col(row, 19)?,
        action_required: row.get(20)?,
        action_required_reason: row.get(21)?,
        created_by: opt_parse_col(row, 22)?,
        created_at: time_col(row, 23)?,
        updated_at: time_col(row, 24)?,
        last_process_date: opt_time_col(row, 25)?,
    })
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<SyncQueueLine> {
    Ok(SyncQueueLine {
        id: parse_col(row, 0)?,
        queue_id: parse_col(row, 1)?,
        org_id: parse_col(row, 2)?,
        position: row.get(3)?,
        external_key: row.get(4)?,
        natural_key: row.get(5)?,
        internal_id: opt_parse_col(row, 6)?,
        payload: json_col(row, 7)?,
        state: parse_col(row, 8)?,
        error_message: row.get(9)?,
        retry_count: u32_col(row, 10)?,
        process_count: u32_col(row, 11)?,
        was_update: row.get(12)?,
        created_at: time_col(row, 13)?,
        updated_at: time_col(row, 14)?,
        last_process_date: opt_time_col(row, 15)?,
    })
}

fn select_queue(conn: &Connection, id: &QueueId) -> StoreResult<Option<SyncQueue>> {
    let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], queue_from_row)
        .optional()?)
}

fn select_queue_by_key(
    conn: &Connection,
    org_id: &OrgId,
    key: &str,
) -> StoreResult<Option<SyncQueue>> {
    let sql =
        format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE org_id = ?1 AND idempotency_key = ?2");
    Ok(conn
        .query_row(&sql, params![org_id.to_string(), key], queue_from_row)
        .optional()?)
}

fn select_line(conn: &Connection, id: &LineId) -> StoreResult<Option<SyncQueueLine>> {
    let sql = format!("SELECT {LINE_COLUMNS} FROM sync_queue_line WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], line_from_row)
        .optional()?)
}

fn insert_queue(conn: &Connection, new: &NewQueue) -> StoreResult<QueueCreation> {
    let name = sanitize_text(&new.name, MAX_NAME_CHARS);
    let key = sanitize_text(&new.idempotency_key, MAX_NAME_CHARS);
    if let Some(existing) = select_queue_by_key(conn, &new.org_id, &key)? {
        debug!("Idempotency key {} already bound to queue {}", key, existing.id);
        return Ok(QueueCreation::Existing(existing));
    }

    let id = QueueId::new();
    let now = now();
    conn.execute(
        "INSERT INTO sync_queue (id, org_id, name, connector_id, system, entity_type, \
         direction, idempotency_key, batch_size, batch_delay_ms, state, created_by, \
         created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'draft', ?11, ?12, ?12)",
        params![
            id.to_string(),
            new.org_id.to_string(),
            name,
            new.connector_id.to_string(),
            new.system.as_str(),
            new.entity_type.as_str(),
            new.direction.as_str(),
            key,
            i64::from(new.batch_size),
            new.batch_delay_ms as i64,
            new.created_by.map(|u| u.to_string()),
            now,
        ],
    )?;
    let queue =
        select_queue(conn, &id)?.ok_or_else(|| StoreError::NotFound(format!("queue {id}")))?;
    Ok(QueueCreation::Created(queue))
}

fn insert_lines(conn: &Connection, queue: &SyncQueue, lines: &[NewLine]) -> StoreResult<usize> {
    let mut position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) FROM sync_queue_line WHERE queue_id = ?1",
        params![queue.id.to_string()],
        |row| row.get(0),
    )?;

    let now = now();
    let mut inserted = 0;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO sync_queue_line (id, queue_id, org_id, position, \
         external_key, natural_key, internal_id, payload, state, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'draft', ?9, ?9)",
    )?;
    for line in lines {
        position += 1;
        let payload = serde_json::to_string(&line.payload)?;
        inserted += stmt.execute(params![
            LineId::new().to_string(),
            queue.id.to_string(),
            queue.org_id.to_string(),
            position,
            sanitize_text(&line.external_key, MAX_NAME_CHARS),
            line.payload.natural_key(),
            line.internal_id.map(|id| id.to_string()),
            payload,
            now,
        ])?;
    }
    Ok(inserted)
}

fn count_lines(conn: &Connection, queue_id: &QueueId) -> StoreResult<QueueCounts> {
    Ok(conn.query_row(
        "SELECT COUNT(*), \
         COALESCE(SUM(state = 'draft'), 0), \
         COALESCE(SUM(state = 'processing'), 0), \
         COALESCE(SUM(state = 'done'), 0), \
         COALESCE(SUM(state = 'failed'), 0), \
         COALESCE(SUM(state = 'skipped'), 0), \
         COALESCE(SUM(state = 'done' AND was_update = 0), 0), \
         COALESCE(SUM(state = 'done' AND was_update = 1), 0) \
         FROM sync_queue_line WHERE queue_id = ?1",
        params![queue_id.to_string()],
        |row| {
            Ok(QueueCounts {
                total: u32_col(row, 0)?,
                draft: u32_col(row, 1)?,
                processing: u32_col(row, 2)?,
                done: u32_col(row, 3)?,
                failed: u32_col(row, 4)?,
                skipped: u32_col(row, 5)?,
                created: u32_col(row, 6)?,
                updated: u32_col(row, 7)?,
            })
        },
    )?)
}

fn store_counts(conn: &Connection, queue_id: &QueueId, counts: &QueueCounts) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE sync_queue SET total_count = ?2, draft_count = ?3, processing_count = ?4, \
         done_count = ?5, failed_count = ?6, skipped_count = ?7, created_count = ?8, \
         updated_count = ?9, updated_at = ?10 WHERE id = ?1",
        params![
            queue_id.to_string(),
            i64::from(counts.total),
            i64::from(counts.draft),
            i64::from(counts.processing),
            i64::from(counts.done),
            i64::from(counts.failed),
            i64::from(counts.skipped),
            i64::from(counts.created),
            i64::from(counts.updated),
            now(),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("queue {queue_id}")));
    }
    Ok(())
}

// ── Store ────────────────────────────────────────────────────────

/// Persistent store for queues and lines.
#[derive(Clone)]
pub struct QueueStore {
    conn: SharedConnection,
}

impl QueueStore {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Creates a queue, or returns the queue already bound to the
    /// idempotency key in this org, whatever its state.
    pub fn create_queue(&self, new: NewQueue) -> StoreResult<QueueCreation> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let creation = insert_queue(&tx, &new)?;
        tx.commit()?;
        Ok(creation)
    }

    /// Creates a queue together with its lines and counters in one
    /// transaction, so a failure leaves no queue behind. A key already bound
    /// returns the existing queue untouched and `0` lines added.
    pub fn create_queue_with_lines(
        &self,
        new: NewQueue,
        lines: &[NewLine],
    ) -> StoreResult<(QueueCreation, usize)> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let queue = match insert_queue(&tx, &new)? {
            QueueCreation::Created(queue) => queue,
            existing => return Ok((existing, 0)),
        };

        let inserted = insert_lines(&tx, &queue, lines)?;
        let counts = count_lines(&tx, &queue.id)?;
        store_counts(&tx, &queue.id, &counts)?;
        let queue = select_queue(&tx, &queue.id)?
            .ok_or_else(|| StoreError::NotFound(format!("queue {}", queue.id)))?;
        tx.commit()?;
        Ok((QueueCreation::Created(queue), inserted))
    }

    pub fn find_by_idempotency_key(
        &self,
        org_id: &OrgId,
        key: &str,
    ) -> StoreResult<Option<SyncQueue>> {
        let conn = lock(&self.conn)?;
        select_queue_by_key(&conn, org_id, &sanitize_text(key, MAX_NAME_CHARS))
    }

    pub fn get_queue(&self, id: &QueueId) -> StoreResult<Option<SyncQueue>> {
        let conn = lock(&self.conn)?;
        select_queue(&conn, id)
    }

    /// Queues of an org, newest first.
    pub fn list_queues(&self, org_id: &OrgId, limit: usize) -> StoreResult<Vec<SyncQueue>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE org_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id.to_string(), limit as i64], queue_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Appends lines in the given order. A line whose external key is already
    /// present in the queue is ignored. Returns the number of lines inserted.
    pub fn add_lines(&self, queue_id: &QueueId, lines: &[NewLine]) -> StoreResult<usize> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let queue = select_queue(&tx, queue_id)?
            .ok_or_else(|| StoreError::NotFound(format!("queue {queue_id}")))?;
        let inserted = insert_lines(&tx, &queue, lines)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Atomically moves up to `limit` draft lines, in position order, to
    /// `processing` and bumps their process count.
    pub fn claim_next_batch(
        &self,
        queue_id: &QueueId,
        limit: u32,
    ) -> StoreResult<Vec<SyncQueueLine>> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM sync_queue_line WHERE queue_id = ?1 AND state = 'draft' \
                 ORDER BY position LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![queue_id.to_string(), i64::from(limit)], |row| {
                row.get(0)
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let now = now();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE sync_queue_line SET state = 'processing', \
                 process_count = process_count + 1, last_process_date = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND state = 'draft'",
                params![id, now],
            )?;
            let line_id: LineId = id
                .parse()
                .map_err(|e| StoreError::InvalidData(format!("line id {id}: {e}")))?;
            if let Some(line) = select_line(&tx, &line_id)? {
                claimed.push(line);
            }
        }
        tx.commit()?;
        Ok(claimed)
    }

    /// Persists the retry count and last error of a line still in flight.
    pub fn record_attempt_failure(
        &self,
        line_id: &LineId,
        retry_count: u32,
        error: &str,
    ) -> StoreResult<bool> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE sync_queue_line SET retry_count = ?2, error_message = ?3, updated_at = ?4 \
             WHERE id = ?1 AND state = 'processing'",
            params![
                line_id.to_string(),
                i64::from(retry_count),
                sanitize_text(error, MAX_ERROR_CHARS),
                now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// `processing → done`. Returns `false` if the line was not processing.
    pub fn mark_line_done(
        &self,
        line_id: &LineId,
        internal_id: Option<EntityId>,
        was_update: bool,
    ) -> StoreResult<bool> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE sync_queue_line SET state = 'done', internal_id = COALESCE(?2, internal_id), \
             was_update = ?3, error_message = NULL, updated_at = ?4 \
             WHERE id = ?1 AND state = 'processing'",
            params![
                line_id.to_string(),
                internal_id.map(|id| id.to_string()),
                was_update,
                now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// `processing → failed`. Returns `false` if the line was not processing.
    pub fn mark_line_failed(
        &self,
        line_id: &LineId,
        error: &str,
        retry_count: u32,
    ) -> StoreResult<bool> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE sync_queue_line SET state = 'failed', error_message = ?2, retry_count = ?3, \
             updated_at = ?4 WHERE id = ?1 AND state = 'processing'",
            params![
                line_id.to_string(),
                sanitize_text(error, MAX_ERROR_CHARS),
                i64::from(retry_count),
                now(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Re-drafts failed lines whose process count is below `ceiling`, clearing
    /// the error and the per-run retry count.
    pub fn reset_failed_lines(&self, queue_id: &QueueId, ceiling: u32) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        Ok(conn.execute(
            "UPDATE sync_queue_line SET state = 'draft', error_message = NULL, retry_count = 0, \
             updated_at = ?3 WHERE queue_id = ?1 AND state = 'failed' AND process_count < ?2",
            params![queue_id.to_string(), i64::from(ceiling), now()],
        )?)
    }

    /// Returns lines left in `processing` by an interrupted run to `draft`.
    pub fn release_orphaned_lines(&self, queue_id: &QueueId) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        Ok(conn.execute(
            "UPDATE sync_queue_line SET state = 'draft', updated_at = ?2 \
             WHERE queue_id = ?1 AND state = 'processing'",
            params![queue_id.to_string(), now()],
        )?)
    }

    /// Moves every non-done line to `skipped`.
    pub fn skip_remaining_lines(&self, queue_id: &QueueId) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        Ok(conn.execute(
            "UPDATE sync_queue_line SET state = 'skipped', updated_at = ?2 \
             WHERE queue_id = ?1 AND state IN ('draft', 'processing', 'failed')",
            params![queue_id.to_string(), now()],
        )?)
    }

    /// Moves draft and failed lines to `skipped`, leaving lines a running
    /// batch has claimed to finish on their own.
    pub fn skip_unclaimed_lines(&self, queue_id: &QueueId) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        Ok(conn.execute(
            "UPDATE sync_queue_line SET state = 'skipped', updated_at = ?2 \
             WHERE queue_id = ?1 AND state IN ('draft', 'failed')",
            params![queue_id.to_string(), now()],
        )?)
    }

    /// Recomputes the queue counters from its line states and stores them.
    pub fn refresh_counts(&self, queue_id: &QueueId) -> StoreResult<QueueCounts> {
        let conn = lock(&self.conn)?;
        let counts = count_lines(&conn, queue_id)?;
        store_counts(&conn, queue_id, &counts)?;
        Ok(counts)
    }

    /// Marks the queue `processing` and bumps its process count.
    pub fn begin_processing(&self, queue_id: &QueueId) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        let now = now();
        let changed = conn.execute(
            "UPDATE sync_queue SET state = 'processing', process_count = process_count + 1, \
             last_process_date = ?2, updated_at = ?2 WHERE id = ?1",
            params![queue_id.to_string(), now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("queue {queue_id}")));
        }
        Ok(())
    }

    pub fn set_state(&self, queue_id: &QueueId, state: QueueState) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE sync_queue SET state = ?2, updated_at = ?3 WHERE id = ?1",
            params![queue_id.to_string(), state.as_str(), now()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("queue {queue_id}")));
        }
        Ok(())
    }

    /// Sets the action-required flag when `reason` is given, clears it otherwise.
    pub fn set_action_required(&self, queue_id: &QueueId, reason: Option<&str>) -> StoreResult<()> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "UPDATE sync_queue SET is_action_required = ?2, action_required_reason = ?3, \
             updated_at = ?4 WHERE id = ?1",
            params![
                queue_id.to_string(),
                reason.is_some(),
                reason.map(|r| sanitize_text(r, MAX_ERROR_CHARS)),
                now(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("queue {queue_id}")));
        }
        Ok(())
    }

    /// All lines of a queue in position order.
    pub fn lines(&self, queue_id: &QueueId) -> StoreResult<Vec<SyncQueueLine>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM sync_queue_line WHERE queue_id = ?1 ORDER BY position"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![queue_id.to_string()], line_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn lines_in_state(
        &self,
        queue_id: &QueueId,
        state: LineState,
    ) -> StoreResult<Vec<SyncQueueLine>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM sync_queue_line WHERE queue_id = ?1 AND state = ?2 \
             ORDER BY position"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![queue_id.to_string(), state.as_str()], line_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_line(&self, line_id: &LineId) -> StoreResult<Option<SyncQueueLine>> {
        let conn = lock(&self.conn)?;
        select_line(&conn, line_id)
    }

    /// Deletes finished queues (and their lines) last touched before
    /// `older_than`. Activity entries are kept.
    pub fn purge_finished_queues(
        &self,
        org_id: &OrgId,
        older_than: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE org_id = ?1 \
             AND state IN ('done', 'done_with_errors') AND updated_at < ?2",
            params![org_id.to_string(), ts(older_than)],
        )?;
        if removed > 0 {
            debug!("Purged {} finished queues for org {}", removed, org_id);
        }
        Ok(removed)
    }
}
