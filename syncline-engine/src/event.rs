//! Progress events emitted by the orchestrator.

use serde::Serialize;
use syncline_store::{QueueCounts, QueueState};
use syncline_types::{Direction, EntityId, EntityType, ExternalId, LineId, OrgId, QueueId};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    QueueCreated {
        queue_id: QueueId,
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
        lines: usize,
    },
    BatchStarted {
        queue_id: QueueId,
        batch: u32,
        size: usize,
    },
    LineCompleted {
        queue_id: QueueId,
        line_id: LineId,
        internal_id: EntityId,
        external_id: ExternalId,
        was_update: bool,
    },
    LineFailed {
        queue_id: QueueId,
        line_id: LineId,
        attempts: u32,
        error: String,
    },
    QueueFinished {
        queue_id: QueueId,
        state: QueueState,
        counts: QueueCounts,
    },
    DeltaComputed {
        org_id: OrgId,
        entity_type: EntityType,
        direction: Direction,
        new: usize,
        updated: usize,
        deleted: usize,
    },
}

/// Where events go. A sink without a sender, or whose receiver was dropped,
/// discards events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<SyncEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<SyncEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
