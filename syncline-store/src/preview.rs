//! Cached delta snapshots, one row per (org, system, entity type) with one
//! JSON column per direction.

use crate::error::StoreResult;
use crate::sql::{now, opt_json_col};
use crate::{SharedConnection, lock};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params, params_from_iter};
use syncline_types::{DeltaSnapshot, Direction, EntityType, ExternalSystem, OrgId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewKey {
    pub org_id: OrgId,
    pub system: ExternalSystem,
    pub entity_type: EntityType,
}

impl PreviewKey {
    pub fn new(org_id: OrgId, system: ExternalSystem, entity_type: EntityType) -> Self {
        Self {
            org_id,
            system,
            entity_type,
        }
    }
}

impl From<&DeltaSnapshot> for PreviewKey {
    fn from(snapshot: &DeltaSnapshot) -> Self {
        Self::new(snapshot.org_id, snapshot.system, snapshot.entity_type)
    }
}

fn column(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
    }
}

#[derive(Clone)]
pub struct PreviewCache {
    conn: SharedConnection,
}

impl PreviewCache {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Returns the cached snapshot for one direction, or `None` when absent
    /// or expired at `now`.
    pub fn get(
        &self,
        key: &PreviewKey,
        direction: Direction,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DeltaSnapshot>> {
        let conn = lock(&self.conn)?;
        let sql = format!(
            "SELECT {} FROM sync_preview_cache WHERE org_id = ?1 AND system = ?2 AND entity_type = ?3",
            column(direction)
        );
        let snapshot: Option<DeltaSnapshot> = conn
            .query_row(
                &sql,
                params![key.org_id.to_string(), key.system.as_str(), key.entity_type.as_str()],
                |row| opt_json_col(row, 0),
            )
            .optional()?
            .flatten();
        Ok(snapshot.filter(|s| !s.is_expired(now)))
    }

    /// Stores the snapshot in its direction's column, leaving the other
    /// direction untouched.
    pub fn put(&self, snapshot: &DeltaSnapshot) -> StoreResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let col = column(snapshot.direction);
        let sql = format!(
            "INSERT INTO sync_preview_cache (org_id, system, entity_type, {col}, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(org_id, system, entity_type) \
             DO UPDATE SET {col} = excluded.{col}, updated_at = excluded.updated_at"
        );
        let conn = lock(&self.conn)?;
        conn.execute(
            &sql,
            params![
                snapshot.org_id.to_string(),
                snapshot.system.as_str(),
                snapshot.entity_type.as_str(),
                json,
                now(),
            ],
        )?;
        Ok(())
    }

    /// Drops cached snapshots of an org, narrowed by system, entity type and
    /// direction when given. Returns the number of rows touched.
    pub fn invalidate(
        &self,
        org_id: &OrgId,
        system: Option<ExternalSystem>,
        entity_type: Option<EntityType>,
        direction: Option<Direction>,
    ) -> StoreResult<usize> {
        let mut filter = String::from("org_id = ?1");
        let mut args = vec![org_id.to_string()];
        if let Some(system) = system {
            args.push(system.as_str().to_string());
            filter.push_str(&format!(" AND system = ?{}", args.len()));
        }
        if let Some(entity_type) = entity_type {
            args.push(entity_type.as_str().to_string());
            filter.push_str(&format!(" AND entity_type = ?{}", args.len()));
        }

        let sql = match direction {
            Some(direction) => {
                let col = column(direction);
                format!(
                    "UPDATE sync_preview_cache SET {col} = NULL \
                     WHERE {filter} AND {col} IS NOT NULL"
                )
            }
            None => format!("DELETE FROM sync_preview_cache WHERE {filter}"),
        };

        let conn = lock(&self.conn)?;
        let touched = conn.execute(&sql, params_from_iter(args.iter()))?;
        debug!("Invalidated {} preview cache rows for org {}", touched, org_id);
        Ok(touched)
    }
}
