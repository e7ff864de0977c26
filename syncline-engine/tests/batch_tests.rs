mod common;

use common::customer;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use syncline_engine::mock::{MockConnector, MockFailure, MockOp};
use syncline_engine::worker::outbound_line;
use syncline_engine::{BatchProcessor, EventSink, RetryPolicy, SyncEvent};
use syncline_store::{ActivityStatus, Database, LineState, NewLine, NewQueue, Operation, SyncQueue};
use syncline_types::{ConnectorId, Direction, EntityType, ExternalSystem, OrgId};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn seeded_queue(db: &Database, lines: usize, batch_size: u32, batch_delay_ms: u64) -> SyncQueue {
    let queue = db
        .queues()
        .create_queue(NewQueue {
            org_id: OrgId::new(),
            name: "customers".into(),
            connector_id: ConnectorId::new(),
            system: ExternalSystem::WooCommerce,
            entity_type: EntityType::Customer,
            direction: Direction::Inbound,
            idempotency_key: "batch".into(),
            batch_size,
            batch_delay_ms,
            created_by: None,
        })
        .unwrap()
        .into_queue();
    let new_lines: Vec<NewLine> = (1..=lines)
        .map(|i| NewLine {
            external_key: i.to_string(),
            internal_id: None,
            payload: customer(&i.to_string(), &format!("c{i}@example.com"), &format!("C{i}")),
        })
        .collect();
    db.queues().add_lines(&queue.id, &new_lines).unwrap();
    db.queues().refresh_counts(&queue.id).unwrap();
    queue
}

fn processor(db: &Database, connector: Arc<MockConnector>, events: EventSink) -> BatchProcessor {
    let policy = RetryPolicy {
        initial_backoff_ms: 0,
        ..Default::default()
    };
    BatchProcessor::new(db.clone(), connector, policy, events)
}

#[tokio::test]
async fn drains_in_full_batches_then_remainder() {
    let db = Database::open_in_memory().unwrap();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let queue = seeded_queue(&db, 120, 50, 0);

    let summary = processor(&db, connector, EventSink::disabled())
        .run(&queue)
        .await
        .unwrap();

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.batch_sizes, vec![50, 50, 20]);
    assert_eq!(summary.succeeded, 120);
    assert_eq!(summary.failed, 0);

    let counts = db.queues().get_queue(&queue.id).unwrap().unwrap().counts;
    assert_eq!(counts.total, 120);
    assert_eq!(counts.done, 120);
    assert_eq!(counts.created, 120);
    assert_eq!(db.records().count(&queue.org_id, EntityType::Customer).unwrap(), 120);
}

#[tokio::test(start_paused = true)]
async fn pauses_only_after_full_batches() {
    let db = Database::open_in_memory().unwrap();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let queue = seeded_queue(&db, 5, 2, 1000);

    let started = Instant::now();
    let summary = processor(&db, connector, EventSink::disabled())
        .run(&queue)
        .await
        .unwrap();

    assert_eq!(summary.batch_sizes, vec![2, 2, 1]);
    assert_eq!(started.elapsed(), Duration::from_millis(2000));
}

#[tokio::test]
async fn enrichment_failure_does_not_fail_line() {
    let db = Database::open_in_memory().unwrap();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let queue = seeded_queue(&db, 3, 10, 0);
    connector.fail_always(MockOp::Orders, MockFailure::Network);

    let summary = processor(&db, connector.clone(), EventSink::disabled())
        .run(&queue)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 3);
    let log = db.activity().for_queue(&queue.id, 10).unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|e| e.operation == Operation::Create));
    assert!(log.iter().all(|e| e.status == ActivityStatus::Success));
}

#[tokio::test]
async fn natural_key_match_updates_local_record() {
    let db = Database::open_in_memory().unwrap();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let queue = seeded_queue(&db, 2, 10, 0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let existing = db
        .records()
        .insert(&queue.org_id, &customer("", "c2@example.com", "Local"))
        .unwrap();

    let summary = processor(&db, connector, EventSink::new(tx))
        .run(&queue)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);

    let lines = db.queues().lines(&queue.id).unwrap();
    assert!(lines.iter().all(|l| l.state == LineState::Done));
    assert_eq!(lines[0].was_update, Some(false));
    assert_eq!(lines[1].was_update, Some(true));
    assert_eq!(lines[1].internal_id, Some(existing.id));

    let mut completed = 0;
    let mut batches = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            SyncEvent::BatchStarted { size, .. } => {
                batches += 1;
                assert_eq!(size, 2);
            }
            SyncEvent::LineCompleted { .. } => completed += 1,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!((batches, completed), (1, 2));
}

#[tokio::test]
async fn exhausted_line_gets_one_failure_entry() {
    let db = Database::open_in_memory().unwrap();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let org = OrgId::new();
    let good = db
        .records()
        .insert(&org, &customer("", "good@example.com", "Good"))
        .unwrap();
    let bad = db
        .records()
        .insert(&org, &customer("", "bad@example.com", "Bad"))
        .unwrap();
    connector.poison_key("bad@example.com");

    let queue = db
        .queues()
        .create_queue(NewQueue {
            org_id: org,
            name: "customers outbound".into(),
            connector_id: ConnectorId::new(),
            system: ExternalSystem::WooCommerce,
            entity_type: EntityType::Customer,
            direction: Direction::Outbound,
            idempotency_key: "out".into(),
            batch_size: 10,
            batch_delay_ms: 0,
            created_by: None,
        })
        .unwrap()
        .into_queue();
    db.queues()
        .add_lines(&queue.id, &[outbound_line(good), outbound_line(bad)])
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let summary = processor(&db, connector.clone(), EventSink::new(tx))
        .run(&queue)
        .await
        .unwrap();
    assert_eq!((summary.succeeded, summary.failed), (1, 1));
    assert_eq!(connector.calls(MockOp::Create), 4);

    let failed = db.queues().lines_in_state(&queue.id, LineState::Failed).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 3);

    let log = db.activity().for_queue(&queue.id, 10).unwrap();
    assert_eq!(log.len(), 2);
    let failure = log.iter().find(|e| e.status == ActivityStatus::Failed).unwrap();
    assert_eq!(failure.operation, Operation::Sync);
    assert!(failure.message.as_deref().unwrap().contains("bad@example.com"));

    let attempts: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            SyncEvent::LineFailed { attempts, .. } => Some(attempts),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![3]);
}
