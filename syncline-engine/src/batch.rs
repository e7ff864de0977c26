//! Batched draining of a queue.
//!
//! Lines are claimed in position order, `batch_size` at a time, and run one
//! after another through the [`RetryController`]. Execution within a batch is
//! sequential so the external system sees a steady request rate; the pause
//! after each full batch exists only for its rate limits.
//!
//! The queue state is re-read before every claim. A queue found finished
//! was forced done mid-run, and the run stops there.

use crate::connector::ExternalConnector;
use crate::error::{SyncError, SyncResult};
use crate::event::{EventSink, SyncEvent};
use crate::retry::{AttemptOutcome, RetryController, RetryPolicy};
use crate::worker::{LineContext, LineSuccess, sync_line};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use syncline_store::{
    ActivityStatus, Database, NewActivity, Operation, SyncQueue, SyncQueueLine,
};
use syncline_types::{Direction, ExternalId};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What one drain of a queue did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunSummary {
    pub batches: u32,
    /// Lines claimed per batch, in order.
    pub batch_sizes: Vec<usize>,
    pub succeeded: u32,
    pub failed: u32,
    /// The queue was finished by someone else between batches.
    pub stopped: bool,
}

impl BatchRunSummary {
    pub fn lines(&self) -> u32 {
        self.succeeded + self.failed
    }
}

/// Drains queues batch by batch.
#[derive(Clone)]
pub struct BatchProcessor {
    db: Database,
    connector: Arc<dyn ExternalConnector>,
    retry: RetryController,
    events: EventSink,
}

impl BatchProcessor {
    pub fn new(
        db: Database,
        connector: Arc<dyn ExternalConnector>,
        policy: RetryPolicy,
        events: EventSink,
    ) -> Self {
        let retry = RetryController::new(policy, db.queues());
        Self {
            db,
            connector,
            retry,
            events,
        }
    }

    /// Claims and runs draft lines until none are left. Counters are
    /// refreshed from line states after every batch.
    pub async fn run(&self, queue: &SyncQueue) -> SyncResult<BatchRunSummary> {
        let queues = self.db.queues();
        let ctx = LineContext {
            org_id: queue.org_id,
            entity_type: queue.entity_type,
            direction: queue.direction,
            connector: self.connector.as_ref(),
            db: &self.db,
        };
        let delay = Duration::from_millis(queue.batch_delay_ms);
        let mut summary = BatchRunSummary::default();

        loop {
            let current = queues
                .get_queue(&queue.id)?
                .ok_or(SyncError::QueueNotFound(queue.id))?;
            if current.state.is_finished() {
                info!(
                    "Queue {} is {}, stopping after {} batches",
                    queue.id, current.state, summary.batches
                );
                summary.stopped = true;
                break;
            }

            let batch = queues.claim_next_batch(&queue.id, queue.batch_size)?;
            if batch.is_empty() {
                break;
            }
            summary.batches += 1;
            summary.batch_sizes.push(batch.len());
            self.events.emit(SyncEvent::BatchStarted {
                queue_id: queue.id,
                batch: summary.batches,
                size: batch.len(),
            });
            debug!(
                "Queue {} batch {}: {} lines",
                queue.id,
                summary.batches,
                batch.len()
            );

            for line in &batch {
                if self.run_line(queue, &ctx, line).await {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
            }

            let counts = queues.refresh_counts(&queue.id)?;
            debug!(
                "Queue {} after batch {}: {}/{} processed",
                queue.id,
                summary.batches,
                counts.processed(),
                counts.total
            );

            let full = batch.len() as u32 >= queue.batch_size;
            if full && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if summary.stopped {
            return Ok(summary);
        }
        info!(
            "Queue {} drained in {} batches: {} succeeded, {} failed",
            queue.id, summary.batches, summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    /// Runs one line to its terminal outcome. Returns whether it succeeded.
    async fn run_line(&self, queue: &SyncQueue, ctx: &LineContext<'_>, line: &SyncQueueLine) -> bool {
        let started = Instant::now();
        let outcome = self.retry.run(line, move || sync_line(ctx, line)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            AttemptOutcome::Succeeded { value, attempts } => {
                self.complete_line(queue, line, &value, attempts, elapsed_ms);
                true
            }
            AttemptOutcome::Exhausted { error, attempts } => {
                let message = error.to_string();
                let external_id = (queue.direction == Direction::Inbound)
                    .then(|| ExternalId::new(line.external_key.clone()));
                let entry = NewActivity::new(
                    queue.org_id,
                    queue.entity_type,
                    Operation::Sync,
                    ActivityStatus::Failed,
                )
                .with_queue(queue.id)
                .with_line(line.id)
                .with_entity(line.internal_id, external_id)
                .with_direction(queue.direction)
                .with_duration(elapsed_ms)
                .with_message(message.clone())
                .with_payloads(serde_json::to_value(&line.payload).ok(), None);
                if let Err(e) = self.db.activity().append(&entry) {
                    warn!("Failed to log failure of line {}: {}", line.id, e);
                }
                self.events.emit(SyncEvent::LineFailed {
                    queue_id: queue.id,
                    line_id: line.id,
                    attempts,
                    error: message,
                });
                false
            }
        }
    }

    fn complete_line(
        &self,
        queue: &SyncQueue,
        line: &SyncQueueLine,
        success: &LineSuccess,
        attempts: u32,
        elapsed_ms: u64,
    ) {
        match self
            .db
            .queues()
            .mark_line_done(&line.id, Some(success.internal_id), success.was_update)
        {
            Ok(true) => {}
            Ok(false) => warn!("Line {} was no longer processing when it completed", line.id),
            Err(e) => error!("Failed to mark line {} done: {}", line.id, e),
        }

        let operation = if success.was_update {
            Operation::Update
        } else {
            Operation::Create
        };
        let entry = NewActivity::new(
            queue.org_id,
            queue.entity_type,
            operation,
            ActivityStatus::Success,
        )
        .with_queue(queue.id)
        .with_line(line.id)
        .with_entity(Some(success.internal_id), Some(success.external_id.clone()))
        .with_direction(queue.direction)
        .with_records(1)
        .with_duration(elapsed_ms)
        .with_message(format!("synced in {attempts} attempt(s)"))
        .with_payloads(serde_json::to_value(&line.payload).ok(), None);
        if let Err(e) = self.db.activity().append(&entry) {
            warn!("Failed to log completion of line {}: {}", line.id, e);
        }

        self.events.emit(SyncEvent::LineCompleted {
            queue_id: queue.id,
            line_id: line.id,
            internal_id: success.internal_id,
            external_id: success.external_id.clone(),
            was_update: success.was_update,
        });
    }
}
