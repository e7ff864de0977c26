//! Top-level sync API.
//!
//! The orchestrator owns no global state: it is built explicitly from a
//! database, one connector and an [`EngineConfig`], and reports progress
//! through an optional event channel.

use crate::batch::BatchProcessor;
use crate::config::{BatchConfig, EngineConfig};
use crate::connector::{ExternalConnector, Pager};
use crate::delta::{DeltaDetector, PreviewResult};
use crate::error::{SyncError, SyncResult};
use crate::event::{EventSink, SyncEvent};
use crate::selector::SyncSelector;
use crate::worker::{inbound_line, outbound_line};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use syncline_store::{
    ActivityEntry, ActivityStatus, Database, NewActivity, NewLine, NewQueue, Operation,
    QueueState, SyncQueue,
};
use syncline_types::{Direction, EntityType, ExternalSystem, OrgId, QueueId, UserId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Parameters of a new sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSyncRequest {
    pub org_id: OrgId,
    pub entity_type: EntityType,
    pub direction: Direction,
    #[serde(default)]
    pub selector: SyncSelector,
    /// Binds the run; a repeated start with the same key returns the
    /// existing queue. A fresh key is generated when absent.
    pub idempotency_key: Option<String>,
    pub name: Option<String>,
    /// Overrides the configured batch size for this run.
    pub batch_size: Option<u32>,
    /// Overrides the configured batch delay for this run (ms).
    pub batch_delay_ms: Option<u64>,
    pub created_by: Option<UserId>,
}

impl StartSyncRequest {
    pub fn new(
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
        selector: SyncSelector,
    ) -> Self {
        Self {
            org_id,
            entity_type,
            direction,
            selector,
            idempotency_key: None,
            name: None,
            batch_size: None,
            batch_delay_ms: None,
            created_by: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_batching(mut self, batch_size: u32, batch_delay_ms: u64) -> Self {
        self.batch_size = Some(batch_size);
        self.batch_delay_ms = Some(batch_delay_ms);
        self
    }
}

/// Result of [`SyncOrchestrator::start_sync`].
#[derive(Debug, Clone, Serialize)]
pub struct StartSyncResponse {
    pub queue: SyncQueue,
    /// `false` when the idempotency key resolved to an existing queue.
    pub created: bool,
    pub lines_added: usize,
}

/// Progress of one queue, as returned by every queue operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncProgress {
    pub queue_id: QueueId,
    pub state: QueueState,
    pub total: u32,
    /// Lines in a terminal state (done, failed or skipped).
    pub processed: u32,
    pub done: u32,
    pub created: u32,
    pub updated: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
    /// Whole percent of lines processed.
    pub progress: u8,
    pub action_required: bool,
    pub action_required_reason: Option<String>,
    pub process_count: u32,
    pub last_process_date: Option<DateTime<Utc>>,
}

impl From<&SyncQueue> for SyncProgress {
    fn from(queue: &SyncQueue) -> Self {
        let counts = &queue.counts;
        Self {
            queue_id: queue.id,
            state: queue.state,
            total: counts.total,
            processed: counts.processed(),
            done: counts.done,
            created: counts.created,
            updated: counts.updated,
            failed: counts.failed,
            skipped: counts.skipped,
            pending: counts.draft + counts.processing,
            progress: counts.progress_percent(),
            action_required: queue.action_required,
            action_required_reason: queue.action_required_reason.clone(),
            process_count: queue.process_count,
            last_process_date: queue.last_process_date,
        }
    }
}

/// Composes delta detection, queues and batch processing for one connector.
pub struct SyncOrchestrator {
    db: Database,
    connector: Arc<dyn ExternalConnector>,
    config: EngineConfig,
    events: EventSink,
    delta: DeltaDetector,
    batches: BatchProcessor,
    /// One async mutex per queue id; held for the whole of a run. Entries
    /// are dropped with the last lease.
    locks: Mutex<HashMap<QueueId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive use of one queue. Dropping it releases the lock and forgets
/// the queue's entry once nobody else holds or awaits it.
struct QueueLease<'a> {
    locks: &'a Mutex<HashMap<QueueId, Arc<AsyncMutex<()>>>>,
    queue_id: QueueId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for QueueLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.queue_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.queue_id);
        }
    }
}

impl SyncOrchestrator {
    /// Validates the configuration and wires the components together.
    pub fn new(
        db: Database,
        connector: Arc<dyn ExternalConnector>,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::assemble(db, connector, config, EventSink::disabled()))
    }

    /// Routes progress events to `tx`.
    pub fn with_events(self, tx: UnboundedSender<SyncEvent>) -> Self {
        Self::assemble(self.db, self.connector, self.config, EventSink::new(tx))
    }

    fn assemble(
        db: Database,
        connector: Arc<dyn ExternalConnector>,
        config: EngineConfig,
        events: EventSink,
    ) -> Self {
        let delta = DeltaDetector::new(
            db.clone(),
            connector.clone(),
            config.delta.clone(),
            events.clone(),
        );
        let batches = BatchProcessor::new(
            db.clone(),
            connector.clone(),
            config.retry.clone(),
            events.clone(),
        );
        Self {
            db,
            connector,
            config,
            events,
            delta,
            batches,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn system(&self) -> ExternalSystem {
        self.connector.system()
    }

    // ── Queue lifecycle ──────────────────────────────────────────

    /// Seeds a queue with one line per selected entity.
    ///
    /// A known idempotency key short-circuits before anything is fetched:
    /// the existing queue is returned with `created == false`.
    pub async fn start_sync(&self, request: StartSyncRequest) -> SyncResult<StartSyncResponse> {
        request.selector.validate(request.direction)?;
        let batch = BatchConfig {
            batch_size: request.batch_size.unwrap_or(self.config.batch.batch_size),
            batch_delay_ms: request
                .batch_delay_ms
                .unwrap_or(self.config.batch.batch_delay_ms),
        };
        batch.validate()?;

        let queues = self.db.queues();
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = queues.find_by_idempotency_key(&request.org_id, key)? {
                info!("Idempotency key {} resolves to queue {}", key, existing.id);
                return Ok(StartSyncResponse {
                    queue: existing,
                    created: false,
                    lines_added: 0,
                });
            }
        }

        let lines = self.resolve_lines(&request).await?;
        let system = self.system();
        let idempotency_key = request.idempotency_key.clone().unwrap_or_else(|| {
            format!(
                "{}:{}:{}:{}",
                system,
                request.entity_type,
                request.direction,
                QueueId::new()
            )
        });
        let name = request.name.clone().unwrap_or_else(|| {
            format!(
                "{} {} {} sync ({})",
                system, request.direction, request.entity_type, request.selector
            )
        });

        let (creation, lines_added) = queues.create_queue_with_lines(
            NewQueue {
                org_id: request.org_id,
                name,
                connector_id: self.connector.connector_id(),
                system,
                entity_type: request.entity_type,
                direction: request.direction,
                idempotency_key,
                batch_size: batch.batch_size,
                batch_delay_ms: batch.batch_delay_ms,
                created_by: request.created_by,
            },
            &lines,
        )?;
        if !creation.was_created() {
            // Lost a race with a concurrent start for the same key.
            return Ok(StartSyncResponse {
                queue: creation.into_queue(),
                created: false,
                lines_added: 0,
            });
        }

        let queue = creation.into_queue();
        let queue_id = queue.id;

        self.events.emit(SyncEvent::QueueCreated {
            queue_id,
            org_id: queue.org_id,
            entity_type: queue.entity_type,
            direction: queue.direction,
            lines: lines_added,
        });
        info!(
            "Created queue {} for {} {} with {} lines ({})",
            queue_id, queue.direction, queue.entity_type, lines_added, request.selector
        );
        Ok(StartSyncResponse {
            queue,
            created: true,
            lines_added,
        })
    }

    /// Drains the queue's draft lines. Calls for the same queue are
    /// serialized; a finished queue without draft lines is returned as is.
    pub async fn process_queue(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        let _lease = self.lease_queue(queue_id).await;
        self.process_locked(queue_id).await
    }

    /// Current progress, without side effects.
    pub fn get_status(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        Ok(SyncProgress::from(&self.load_queue(queue_id)?))
    }

    /// Re-drafts failed lines that have been processed fewer than
    /// `max_process_attempts` times and runs the queue again.
    pub async fn retry_failed(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        let _lease = self.lease_queue(queue_id).await;

        let queue = self.load_queue(queue_id)?;
        let reset = self
            .db
            .queues()
            .reset_failed_lines(queue_id, self.config.max_process_attempts)?;
        self.log_queue_activity(
            &queue,
            Operation::Retry,
            reset as u32,
            format!("{reset} failed lines re-drafted"),
        );
        if reset == 0 {
            info!("No failed lines of queue {} are eligible for retry", queue_id);
            return self.check_queue_action_required(queue_id);
        }

        info!("Retrying {} failed lines of queue {}", reset, queue_id);
        self.process_locked(queue_id).await
    }

    /// Finishes the queue by operator decision: every line not done is
    /// skipped and the action-required flag is cleared.
    ///
    /// Does not wait for a running drain. Its in-flight batch completes and
    /// the run stops before claiming the next one; lines of that batch are
    /// left to finish and are not counted as skipped here.
    pub async fn force_done(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        let queue = self.load_queue(queue_id)?;
        let queues = self.db.queues();
        let idle = self.try_lease_queue(queue_id);
        let skipped = if idle.is_some() {
            queues.skip_remaining_lines(queue_id)?
        } else {
            queues.skip_unclaimed_lines(queue_id)?
        };
        let counts = queues.refresh_counts(queue_id)?;
        queues.set_state(queue_id, QueueState::Done)?;
        queues.set_action_required(queue_id, None)?;
        drop(idle);

        self.log_queue_activity(
            &queue,
            Operation::ForceDone,
            skipped as u32,
            format!("forced done, {skipped} lines skipped"),
        );
        self.events.emit(SyncEvent::QueueFinished {
            queue_id: *queue_id,
            state: QueueState::Done,
            counts,
        });
        warn!("Queue {} forced done, {} lines skipped", queue_id, skipped);
        self.get_status(queue_id)
    }

    /// Sets or clears the action-required flag from the queue's counters:
    /// any exhausted line, or more runs than `max_process_attempts`.
    pub fn check_queue_action_required(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        let queue = self.load_queue(queue_id)?;
        let reason = if queue.counts.failed > 0 {
            Some(format!(
                "{} lines failed after exhausting their retries",
                queue.counts.failed
            ))
        } else if queue.process_count > self.config.max_process_attempts {
            Some(format!(
                "queue processed {} times without completing",
                queue.process_count
            ))
        } else {
            None
        };
        self.db.queues().set_action_required(queue_id, reason.as_deref())?;
        self.get_status(queue_id)
    }

    /// Queues of an org, newest first.
    pub fn list_queues(&self, org_id: &OrgId, limit: usize) -> SyncResult<Vec<SyncProgress>> {
        Ok(self
            .db
            .queues()
            .list_queues(org_id, limit)?
            .iter()
            .map(SyncProgress::from)
            .collect())
    }

    /// Deletes finished queues last touched before `older_than`.
    pub fn purge_finished_queues(
        &self,
        org_id: &OrgId,
        older_than: DateTime<Utc>,
    ) -> SyncResult<usize> {
        Ok(self.db.queues().purge_finished_queues(org_id, older_than)?)
    }

    /// Activity of a queue, newest first.
    pub fn get_activity_log(
        &self,
        queue_id: &QueueId,
        limit: usize,
    ) -> SyncResult<Vec<ActivityEntry>> {
        self.load_queue(queue_id)?;
        Ok(self.db.activity().for_queue(queue_id, limit)?)
    }

    // ── Preview ──────────────────────────────────────────────────

    /// Delta preview, served from the cache while fresh.
    pub async fn get_preview_snapshot(
        &self,
        org_id: OrgId,
        system: ExternalSystem,
        entity_type: EntityType,
        direction: Direction,
        force_refresh: bool,
    ) -> SyncResult<PreviewResult> {
        if system != self.system() {
            return Err(SyncError::Config(format!(
                "no connector for {system}, this orchestrator serves {}",
                self.system()
            )));
        }
        self.delta
            .preview(org_id, entity_type, direction, force_refresh)
            .await
    }

    /// Drops cached previews; `None` filters match everything.
    pub fn invalidate_preview_cache(
        &self,
        org_id: &OrgId,
        system: Option<ExternalSystem>,
        entity_type: Option<EntityType>,
        direction: Option<Direction>,
    ) -> SyncResult<usize> {
        let removed = self.delta.invalidate(org_id, system, entity_type, direction)?;
        debug!("Invalidated {} preview cache rows for org {}", removed, org_id);
        Ok(removed)
    }

    // ── Internals ────────────────────────────────────────────────

    /// Number of queues with a lock entry, held or awaited.
    pub fn tracked_queue_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn queue_lock(&self, queue_id: &QueueId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(*queue_id).or_default().clone()
    }

    /// Waits for exclusive use of the queue.
    async fn lease_queue(&self, queue_id: &QueueId) -> QueueLease<'_> {
        let guard = self.queue_lock(queue_id).lock_owned().await;
        QueueLease {
            locks: &self.locks,
            queue_id: *queue_id,
            guard: Some(guard),
        }
    }

    /// The queue's lease if no run holds it right now.
    fn try_lease_queue(&self, queue_id: &QueueId) -> Option<QueueLease<'_>> {
        let guard = self.queue_lock(queue_id).try_lock_owned().ok();
        let lease = QueueLease {
            locks: &self.locks,
            queue_id: *queue_id,
            guard,
        };
        lease.guard.is_some().then_some(lease)
    }

    fn load_queue(&self, queue_id: &QueueId) -> SyncResult<SyncQueue> {
        self.db
            .queues()
            .get_queue(queue_id)?
            .ok_or(SyncError::QueueNotFound(*queue_id))
    }

    /// One run of a queue. The caller holds the queue's lock.
    async fn process_locked(&self, queue_id: &QueueId) -> SyncResult<SyncProgress> {
        let queues = self.db.queues();
        let queue = self.load_queue(queue_id)?;

        let released = queues.release_orphaned_lines(queue_id)?;
        if released > 0 {
            warn!(
                "Released {} lines of queue {} left processing by an interrupted run",
                released, queue_id
            );
        }
        let counts = queues.refresh_counts(queue_id)?;
        if queue.state.is_finished() && counts.draft == 0 {
            debug!("Queue {} is {} with nothing to process", queue_id, queue.state);
            return self.get_status(queue_id);
        }

        queues.begin_processing(queue_id)?;
        let queue = self.load_queue(queue_id)?;
        info!(
            "Processing queue {} (run {}, {} lines pending)",
            queue_id, queue.process_count, counts.draft
        );

        let summary = match self.batches.run(&queue).await {
            Ok(summary) => summary,
            Err(e) => {
                // Lines still processing are released by the next run.
                error!("Run of queue {} aborted: {}", queue_id, e);
                return Err(e);
            }
        };

        if summary.stopped {
            // Lines of the last batch that failed after the stop are skipped
            // like the rest; the queue stays done.
            queues.skip_unclaimed_lines(queue_id)?;
            queues.refresh_counts(queue_id)?;
            queues.set_state(queue_id, QueueState::Done)?;
            queues.set_action_required(queue_id, None)?;
            if summary.succeeded > 0 {
                self.invalidate_after_run(&queue);
            }
            info!(
                "Run of queue {} stopped after {} batches by force done",
                queue_id, summary.batches
            );
            return self.get_status(queue_id);
        }

        let counts = queues.refresh_counts(queue_id)?;
        let state = if counts.draft + counts.processing > 0 {
            warn!(
                "Queue {} still has {} unfinished lines after its run",
                queue_id,
                counts.draft + counts.processing
            );
            QueueState::Processing
        } else if counts.failed > 0 {
            QueueState::DoneWithErrors
        } else {
            QueueState::Done
        };
        queues.set_state(queue_id, state)?;
        let progress = self.check_queue_action_required(queue_id)?;

        if summary.succeeded > 0 {
            self.invalidate_after_run(&queue);
        }

        self.events.emit(SyncEvent::QueueFinished {
            queue_id: *queue_id,
            state,
            counts,
        });
        info!(
            "Queue {} is {}: {}/{} processed, {} failed",
            queue_id, state, progress.processed, progress.total, progress.failed
        );
        Ok(progress)
    }

    /// Both directions compare the same two sides, so a run that wrote
    /// anything stales both.
    fn invalidate_after_run(&self, queue: &SyncQueue) {
        if let Err(e) = self.delta.invalidate(
            &queue.org_id,
            Some(queue.system),
            Some(queue.entity_type),
            None,
        ) {
            warn!("Failed to invalidate previews after queue {}: {}", queue.id, e);
        }
    }

    /// Lines for the selector, in source order.
    async fn resolve_lines(&self, request: &StartSyncRequest) -> SyncResult<Vec<NewLine>> {
        let org_id = request.org_id;
        let entity_type = request.entity_type;
        let direction = request.direction;
        let records = self.db.records();

        let lines = match &request.selector {
            SyncSelector::All => match direction {
                Direction::Inbound => {
                    Pager::new(self.connector.as_ref(), entity_type)
                        .collect_all(self.config.delta.max_external_records)
                        .await?
                        .into_iter()
                        .map(inbound_line)
                        .collect()
                }
                Direction::Outbound => records
                    .list(&org_id, entity_type)?
                    .into_iter()
                    .map(outbound_line)
                    .collect(),
            },
            SyncSelector::ExternalId { id } => {
                let record = self
                    .connector
                    .get(entity_type, id)
                    .await?
                    .ok_or_else(|| SyncError::NotFound(format!("{entity_type} {id}")))?;
                vec![inbound_line(record)]
            }
            SyncSelector::ExternalIds { ids } => {
                let mut lines = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.connector.get(entity_type, id).await? {
                        Some(record) => lines.push(inbound_line(record)),
                        None => warn!("Skipping unknown {} {} on {}", entity_type, id, self.system()),
                    }
                }
                lines
            }
            SyncSelector::NaturalKey { key } => match direction {
                Direction::Inbound => {
                    let record = self
                        .connector
                        .find_by_natural_key(entity_type, key)
                        .await?
                        .ok_or_else(|| SyncError::NotFound(format!("{entity_type} {key}")))?;
                    vec![inbound_line(record)]
                }
                Direction::Outbound => {
                    let local = records
                        .find_by_natural_key(&org_id, entity_type, key)?
                        .ok_or_else(|| SyncError::NotFound(format!("local {entity_type} {key}")))?;
                    vec![outbound_line(local)]
                }
            },
            SyncSelector::LocalIds { ids } => {
                let mut lines = Vec::with_capacity(ids.len());
                for id in ids {
                    match records.get(id)? {
                        Some(local) if local.org_id == org_id && local.entity_type == entity_type => {
                            lines.push(outbound_line(local))
                        }
                        _ => warn!("Skipping unknown local {} {}", entity_type, id),
                    }
                }
                lines
            }
            SyncSelector::Delta {
                include_new,
                include_updated,
            } => self
                .delta
                .compute(org_id, entity_type, direction)
                .await?
                .lines_for(*include_new, *include_updated),
        };
        Ok(lines)
    }

    fn log_queue_activity(&self, queue: &SyncQueue, operation: Operation, records: u32, message: String) {
        let entry = NewActivity::new(
            queue.org_id,
            queue.entity_type,
            operation,
            ActivityStatus::Success,
        )
        .with_queue(queue.id)
        .with_direction(queue.direction)
        .with_records(records)
        .with_message(message);
        if let Err(e) = self.db.activity().append(&entry) {
            warn!("Failed to log {} for queue {}: {}", operation, queue.id, e);
        }
    }
}
