//! Delta detection between the local system of record and an external system.
//!
//! Both sides are keyed by natural key and fingerprinted with
//! [`content_hash`]. The side matching the direction is the source:
//! inbound reads the external listing as source, outbound the local records.
//!
//! Records keyed by their own id (orders, customers without email, products
//! without SKU) carry a different id on each side. A mapped local record of
//! that kind is keyed by its external id so both sides line up.

use crate::config::DeltaConfig;
use crate::connector::{ExternalConnector, Pager};
use crate::error::{SyncError, SyncResult};
use crate::event::{EventSink, SyncEvent};
use crate::hasher::content_hash;
use crate::worker::{inbound_line, outbound_line};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use syncline_store::{
    ActivityStatus, Database, NewActivity, NewLine, Operation, PreviewKey,
};
use syncline_types::{
    DeltaBucket, DeltaSnapshot, Direction, EntityId, EntityRecord, EntityType, ExternalId,
    ExternalSystem, OrgId, RecordSummary,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ── Partition ────────────────────────────────────────────────────

/// Keys of both sides split four ways. Source-side buckets keep source
/// iteration order, `deleted` keeps target order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.new.len() + self.updated.len() + self.deleted.len() + self.unchanged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `(key, hash)` pairs. A key repeated on one side counts once, with
/// its first hash.
pub fn partition(source: &[(String, String)], target: &[(String, String)]) -> Partition {
    let mut target_hashes: HashMap<&str, &str> = HashMap::with_capacity(target.len());
    for (key, hash) in target {
        target_hashes.entry(key.as_str()).or_insert(hash.as_str());
    }

    let mut out = Partition::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(source.len());
    for (key, hash) in source {
        if !seen.insert(key.as_str()) {
            continue;
        }
        match target_hashes.get(key.as_str()) {
            None => out.new.push(key.clone()),
            Some(other) if *other != hash.as_str() => out.updated.push(key.clone()),
            Some(_) => out.unchanged.push(key.clone()),
        }
    }

    let mut deleted_seen: HashSet<&str> = HashSet::new();
    for (key, _) in target {
        if !seen.contains(key.as_str()) && deleted_seen.insert(key.as_str()) {
            out.deleted.push(key.clone());
        }
    }
    out
}

// ── Keyed sides ──────────────────────────────────────────────────

/// One side's records by natural key, plus what a queue line needs to
/// sync each of them.
struct Side {
    pairs: Vec<(String, String)>,
    entries: HashMap<String, SideEntry>,
}

#[derive(Debug)]
struct SideEntry {
    summary: RecordSummary,
    line: NewLine,
}

impl Side {
    fn build(items: impl IntoIterator<Item = (String, NewLine)>) -> Self {
        let mut pairs = Vec::new();
        let mut entries = HashMap::new();
        for (key, line) in items {
            let hash = content_hash(&line.payload);
            if entries.contains_key(&key) {
                continue;
            }
            pairs.push((key.clone(), hash.clone()));
            entries.insert(
                key,
                SideEntry {
                    summary: line.payload.summary(hash),
                    line,
                },
            );
        }
        Self { pairs, entries }
    }

    fn bucket(&self, keys: &[String], limit: usize) -> DeltaBucket {
        DeltaBucket {
            count: keys.len(),
            records: keys
                .iter()
                .filter_map(|k| self.entries.get(k))
                .take(limit)
                .map(|e| e.summary.clone())
                .collect(),
        }
    }
}

/// A freshly computed delta: the cacheable snapshot plus the full key
/// lists and the source-side records behind them.
#[derive(Debug)]
pub struct DeltaComputation {
    pub snapshot: DeltaSnapshot,
    pub partition: Partition,
    source: HashMap<String, SideEntry>,
}

impl DeltaComputation {
    /// Queue lines for the selected buckets, new before updated.
    pub fn lines_for(&self, include_new: bool, include_updated: bool) -> Vec<NewLine> {
        let mut keys: Vec<&String> = Vec::new();
        if include_new {
            keys.extend(self.partition.new.iter());
        }
        if include_updated {
            keys.extend(self.partition.updated.iter());
        }
        keys.into_iter()
            .filter_map(|k| self.source.get(k))
            .map(|e| e.line.clone())
            .collect()
    }
}

/// A snapshot and whether it was served from the cache.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub snapshot: DeltaSnapshot,
    pub cache_hit: bool,
}

// ── Detector ─────────────────────────────────────────────────────

/// Computes deltas and manages the preview cache.
#[derive(Clone)]
pub struct DeltaDetector {
    db: Database,
    connector: Arc<dyn ExternalConnector>,
    config: DeltaConfig,
    events: EventSink,
}

impl DeltaDetector {
    pub fn new(
        db: Database,
        connector: Arc<dyn ExternalConnector>,
        config: DeltaConfig,
        events: EventSink,
    ) -> Self {
        Self {
            db,
            connector,
            config,
            events,
        }
    }

    pub fn system(&self) -> ExternalSystem {
        self.connector.system()
    }

    /// Serves a cached snapshot when one is fresh, otherwise computes and
    /// caches a new one. A cache read failure counts as a miss.
    pub async fn preview(
        &self,
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
        force_refresh: bool,
    ) -> SyncResult<PreviewResult> {
        if !force_refresh {
            let key = PreviewKey::new(org_id, self.system(), entity_type);
            match self.db.previews().get(&key, direction, Utc::now()) {
                Ok(Some(snapshot)) => {
                    debug!("Preview cache hit for {} {} {}", org_id, entity_type, direction);
                    return Ok(PreviewResult {
                        snapshot,
                        cache_hit: true,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Preview cache read failed, recomputing: {}", e),
            }
        }

        let computed = self.compute(org_id, entity_type, direction).await?;
        Ok(PreviewResult {
            snapshot: computed.snapshot,
            cache_hit: false,
        })
    }

    /// Computes a fresh delta and stores its snapshot. A failed computation
    /// leaves any cached snapshot in place.
    pub async fn compute(
        &self,
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
    ) -> SyncResult<DeltaComputation> {
        let started = Instant::now();
        let result = self.compute_uncached(org_id, entity_type, direction).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let entry = NewActivity::new(
            org_id,
            entity_type,
            Operation::DeltaComputed,
            match &result {
                Ok(_) => ActivityStatus::Success,
                Err(_) => ActivityStatus::Failed,
            },
        )
        .with_direction(direction)
        .with_duration(elapsed_ms);

        let entry = match &result {
            Ok(c) => entry
                .with_records(c.snapshot.total_changes() as u32)
                .with_message(format!(
                    "{} new, {} updated, {} deleted",
                    c.snapshot.new.count, c.snapshot.updated.count, c.snapshot.deleted.count
                )),
            Err(e) => entry.with_message(e.to_string()),
        };
        if let Err(e) = self.db.activity().append(&entry) {
            warn!("Failed to log delta computation: {}", e);
        }

        let computed = result?;
        if let Err(e) = self.db.previews().put(&computed.snapshot) {
            warn!("Failed to cache preview snapshot: {}", e);
        }
        self.events.emit(SyncEvent::DeltaComputed {
            org_id,
            entity_type,
            direction,
            new: computed.snapshot.new.count,
            updated: computed.snapshot.updated.count,
            deleted: computed.snapshot.deleted.count,
        });
        info!(
            "Delta for {} {} ({}): {} new, {} updated, {} deleted in {}ms",
            entity_type,
            direction,
            org_id,
            computed.snapshot.new.count,
            computed.snapshot.updated.count,
            computed.snapshot.deleted.count,
            elapsed_ms
        );
        Ok(computed)
    }

    /// Drops cached snapshots. Returns the number of cache rows touched.
    pub fn invalidate(
        &self,
        org_id: &OrgId,
        system: Option<ExternalSystem>,
        entity_type: Option<EntityType>,
        direction: Option<Direction>,
    ) -> SyncResult<usize> {
        Ok(self
            .db
            .previews()
            .invalidate(org_id, system, entity_type, direction)?)
    }

    /// The external listing, bounded by the fetch timeout and record cap.
    pub async fn fetch_external(&self, entity_type: EntityType) -> SyncResult<Vec<EntityRecord>> {
        let budget = Duration::from_millis(self.config.fetch_timeout_ms);
        let pager = Pager::new(self.connector.as_ref(), entity_type);
        match tokio::time::timeout(budget, pager.collect_all(self.config.max_external_records)).await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "listing {} from {} exceeded {}ms",
                entity_type,
                self.system(),
                self.config.fetch_timeout_ms
            ))),
        }
    }

    async fn compute_uncached(
        &self,
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
    ) -> SyncResult<DeltaComputation> {
        let external = self.fetch_external(entity_type).await?;
        let local = self.db.records().list(&org_id, entity_type)?;
        let mapped: HashMap<EntityId, ExternalId> = self
            .db
            .mappings()
            .list_active(&self.connector.connector_id(), entity_type)?
            .into_iter()
            .map(|m| (m.internal_id, m.external_id))
            .collect();

        let external_side = Side::build(external.into_iter().map(|record| {
            let line = inbound_line(record);
            (line.payload.natural_key(), line)
        }));
        let local_side = Side::build(local.into_iter().map(|local| {
            let key = match mapped.get(&local.id) {
                Some(external_id) if local.record.is_keyed_by_id() => {
                    external_id.as_str().to_string()
                }
                _ => local.natural_key.clone(),
            };
            (key, outbound_line(local))
        }));

        let (source, target) = match direction {
            Direction::Inbound => (external_side, local_side),
            Direction::Outbound => (local_side, external_side),
        };
        let partition = partition(&source.pairs, &target.pairs);

        let limit = self.config.sample_limit;
        let computed_at = Utc::now();
        let snapshot = DeltaSnapshot {
            org_id,
            system: self.system(),
            entity_type,
            direction,
            new: source.bucket(&partition.new, limit),
            updated: source.bucket(&partition.updated, limit),
            deleted: target.bucket(&partition.deleted, limit),
            computed_at,
            expires_at: computed_at + ChronoDuration::seconds(self.config.ttl_secs as i64),
        };

        Ok(DeltaComputation {
            snapshot,
            partition,
            source: source.entries,
        })
    }
}
