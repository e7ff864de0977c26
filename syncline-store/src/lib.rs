//! SQLite storage layer for syncline.
//!
//! One connection is shared by the typed handles:
//!
//! - [`QueueStore`]: sync queues and their lines
//! - [`MappingStore`]: internal id ↔ external id pairs per connector
//! - [`ActivityLog`]: append-only audit trail of sync operations
//! - [`PreviewCache`]: TTL-bound delta snapshots
//! - [`RecordStore`]: the local system of record
//!
//! The schema is created idempotently on open.

mod activity;
mod error;
mod mapping;
mod preview;
mod queue;
mod records;
mod schema;
mod sql;

pub use activity::{ActivityEntry, ActivityLog, ActivityStatus, NewActivity, Operation};
pub use error::{StoreError, StoreResult, UnknownVariant};
pub use mapping::{MappingOutcome, MappingRecord, MappingStatus, MappingStore, NewMapping};
pub use preview::{PreviewCache, PreviewKey};
pub use queue::{
    LineState, NewLine, NewQueue, QueueCounts, QueueCreation, QueueState, QueueStore,
    SyncQueue, SyncQueueLine,
};
pub use records::{LocalRecord, RecordStore};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Maximum length of names and idempotency keys.
pub const MAX_NAME_CHARS: usize = 255;
/// Maximum length of stored error messages.
pub const MAX_ERROR_CHARS: usize = 500;

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn lock(conn: &SharedConnection) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

/// Strips NUL bytes and truncates to `max_chars` characters.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    input.chars().filter(|c| *c != '\0').take(max_chars).collect()
}

/// Handle to the sync database.
///
/// Cloning is cheap; every clone and every typed handle shares the same
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: SharedConnection,
}

impl Database {
    /// Opens (or creates) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened sync database at {} ({} journal)", path.display(), mode);
        Self::from_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn queues(&self) -> QueueStore {
        QueueStore::new(self.conn.clone())
    }

    pub fn mappings(&self) -> MappingStore {
        MappingStore::new(self.conn.clone())
    }

    pub fn activity(&self) -> ActivityLog {
        ActivityLog::new(self.conn.clone())
    }

    pub fn previews(&self) -> PreviewCache {
        PreviewCache::new(self.conn.clone())
    }

    pub fn records(&self) -> RecordStore {
        RecordStore::new(self.conn.clone())
    }
}
