mod common;

use chrono::{Duration, Utc};
use common::{customer, date, fast_config, order, seed_customers, setup, setup_with};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use syncline_engine::mock::{MockConnector, MockOp};
use syncline_engine::{
    BatchConfig, EngineConfig, StartSyncRequest, SyncError, SyncEvent, SyncOrchestrator, SyncSelector,
};
use syncline_store::{Database, LineState, Operation, QueueState};
use syncline_types::{
    CustomerSegment, Direction, EntityType, ExternalId, ExternalSystem, OrgId,
    QueueId,
};
use tokio::sync::mpsc;

fn inbound(org: OrgId, selector: SyncSelector) -> StartSyncRequest {
    StartSyncRequest::new(org, EntityType::Customer, Direction::Inbound, selector)
}

fn outbound(org: OrgId, selector: SyncSelector) -> StartSyncRequest {
    StartSyncRequest::new(org, EntityType::Customer, Direction::Outbound, selector)
}

fn seed_local(orchestrator: &SyncOrchestrator, org: OrgId, emails: &[&str]) {
    for email in emails {
        orchestrator
            .database()
            .records()
            .insert(&org, &customer("", email, &email.to_uppercase()))
            .unwrap();
    }
}

// ── Start ────────────────────────────────────────────────────────

#[tokio::test]
async fn start_seeds_one_line_per_record() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 3);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();

    assert!(started.created);
    assert_eq!(started.lines_added, 3);
    assert_eq!(started.queue.state, QueueState::Draft);
    assert_eq!(started.queue.counts.total, 3);
    assert_eq!(started.queue.counts.draft, 3);
    assert_eq!(started.queue.system, ExternalSystem::WooCommerce);
}

#[tokio::test]
async fn idempotent_start_returns_existing_queue() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 3);
    let org = OrgId::new();

    let first = orchestrator
        .start_sync(inbound(org, SyncSelector::All).with_idempotency_key("nightly"))
        .await
        .unwrap();
    connector.insert(customer("4", "c4@example.com", "C4"));
    let second = orchestrator
        .start_sync(inbound(org, SyncSelector::All).with_idempotency_key("nightly"))
        .await
        .unwrap();

    assert!(!second.created);
    assert_eq!(second.queue.id, first.queue.id);
    assert_eq!(second.lines_added, 0);
    let lines = orchestrator.database().queues().lines(&first.queue.id).unwrap();
    assert_eq!(lines.len(), 3);
    // The repeat never touched the external system.
    assert_eq!(connector.calls(MockOp::List), 1);
}

#[tokio::test]
async fn selectors_must_match_direction() {
    let (_connector, orchestrator) = setup();
    let org = OrgId::new();

    let err = orchestrator
        .start_sync(inbound(org, SyncSelector::LocalIds { ids: vec![syncline_types::EntityId::new()] }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSelector(_)));

    let err = orchestrator
        .start_sync(outbound(org, SyncSelector::ExternalId { id: ExternalId::from(1u64) }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSelector(_)));

    let err = orchestrator
        .start_sync(inbound(
            org,
            SyncSelector::Delta {
                include_new: false,
                include_updated: false,
            },
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSelector(_)));
}

#[tokio::test]
async fn single_external_id_must_exist() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 1);
    let org = OrgId::new();

    let started = orchestrator
        .start_sync(inbound(org, SyncSelector::ExternalId { id: "1".into() }))
        .await
        .unwrap();
    assert_eq!(started.lines_added, 1);

    let err = orchestrator
        .start_sync(inbound(org, SyncSelector::ExternalId { id: "404".into() }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn id_lists_skip_unknown_ids() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 2);
    let started = orchestrator
        .start_sync(inbound(
            OrgId::new(),
            SyncSelector::ExternalIds {
                ids: vec!["2".into(), "99".into(), "1".into()],
            },
        ))
        .await
        .unwrap();
    let lines = orchestrator.database().queues().lines(&started.queue.id).unwrap();
    let keys: Vec<&str> = lines.iter().map(|l| l.external_key.as_str()).collect();
    assert_eq!(keys, vec!["2", "1"]);
}

#[tokio::test]
async fn natural_key_selects_by_email() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 3);
    let started = orchestrator
        .start_sync(inbound(
            OrgId::new(),
            SyncSelector::NaturalKey {
                key: "c2@example.com".into(),
            },
        ))
        .await
        .unwrap();
    let lines = orchestrator.database().queues().lines(&started.queue.id).unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].external_key, "2");
}

#[tokio::test]
async fn delta_selector_seeds_only_selected_buckets() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    seed_customers(&connector, 3);
    seed_local(&orchestrator, org, &["c1@example.com"]);

    let started = orchestrator
        .start_sync(inbound(
            org,
            SyncSelector::Delta {
                include_new: true,
                include_updated: false,
            },
        ))
        .await
        .unwrap();
    let lines = orchestrator.database().queues().lines(&started.queue.id).unwrap();
    let keys: Vec<&str> = lines.iter().map(|l| l.external_key.as_str()).collect();
    // c1 differs by name only, so it is updated rather than new.
    assert_eq!(keys, vec!["2", "3"]);
}

#[tokio::test]
async fn batch_override_is_validated() {
    let (_connector, orchestrator) = setup();
    let err = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All).with_batching(0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

// ── Process ──────────────────────────────────────────────────────

#[tokio::test]
async fn process_drains_queue_to_done() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 120);
    let org = OrgId::new();
    let started = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();

    let progress = orchestrator.process_queue(&started.queue.id).await.unwrap();
    assert_eq!(progress.state, QueueState::Done);
    assert_eq!(progress.total, 120);
    assert_eq!(progress.done, 120);
    assert_eq!(progress.created, 120);
    assert_eq!(progress.processed, 120);
    assert_eq!(progress.progress, 100);
    assert_eq!(progress.process_count, 1);
    assert!(!progress.action_required);

    let mappings = orchestrator
        .database()
        .mappings()
        .list_active(&connector_id(&orchestrator, &started.queue.id), EntityType::Customer)
        .unwrap();
    assert_eq!(mappings.len(), 120);
}

fn connector_id(orchestrator: &SyncOrchestrator, queue_id: &QueueId) -> syncline_types::ConnectorId {
    orchestrator
        .database()
        .queues()
        .get_queue(queue_id)
        .unwrap()
        .unwrap()
        .connector_id
}

#[tokio::test]
async fn processing_finished_queue_changes_nothing() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 2);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let first = orchestrator.process_queue(&started.queue.id).await.unwrap();
    let second = orchestrator.process_queue(&started.queue.id).await.unwrap();

    assert_eq!(second.process_count, 1);
    assert_eq!(second.done, first.done);
    assert!(second.done + second.failed <= second.total);
    assert_eq!(connector.calls(MockOp::Orders), 2);
}

#[tokio::test]
async fn concurrent_process_calls_run_each_line_once() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 10);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let id = started.queue.id;

    let (a, b) = tokio::join!(orchestrator.process_queue(&id), orchestrator.process_queue(&id));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.done, 10);
    assert_eq!(b.done, 10);
    assert_eq!(connector.calls(MockOp::Orders), 10);
    assert_eq!(orchestrator.get_status(&id).unwrap().process_count, 1);
}

#[tokio::test]
async fn interrupted_lines_are_released_and_processed() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 4);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let queues = orchestrator.database().queues();
    // Simulate a crash after claiming a batch.
    queues.claim_next_batch(&started.queue.id, 2).unwrap();

    let progress = orchestrator.process_queue(&started.queue.id).await.unwrap();
    assert_eq!(progress.done, 4);
    assert_eq!(progress.state, QueueState::Done);
}

#[tokio::test]
async fn queue_resumes_after_reopening_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    seed_customers(&connector, 3);

    let queue_id = {
        let db = Database::open(&path).unwrap();
        let orchestrator = SyncOrchestrator::new(db, connector.clone(), fast_config()).unwrap();
        let started = orchestrator
            .start_sync(inbound(OrgId::new(), SyncSelector::All))
            .await
            .unwrap();
        // Claimed but never finished before the process went away.
        orchestrator
            .database()
            .queues()
            .claim_next_batch(&started.queue.id, 1)
            .unwrap();
        started.queue.id
    };

    let db = Database::open(&path).unwrap();
    let orchestrator = SyncOrchestrator::new(db, connector.clone(), fast_config()).unwrap();
    let progress = orchestrator.process_queue(&queue_id).await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.created, 3);
    assert_eq!(progress.state, QueueState::Done);
}

#[tokio::test]
async fn inbound_customers_are_enriched_from_orders() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    connector.insert(customer("7", "ada@example.com", "Ada"));
    connector.insert_orders(
        "7",
        vec![
            order("100", "completed", 120.0, 3),
            order("101", "processing", 30.5, 9),
            order("102", "completed", 10.0, 1),
        ],
    );

    let started = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    let local = orchestrator
        .database()
        .records()
        .find_by_natural_key(&org, EntityType::Customer, "ada@example.com")
        .unwrap()
        .unwrap();
    let insights = local.record.as_customer().unwrap().insights.clone().unwrap();
    assert_eq!(insights.order_count, 3);
    assert_eq!(insights.completed_orders, 2);
    assert_eq!(insights.lifetime_value, 160.5);
    assert_eq!(insights.segment, CustomerSegment::Individual);
    assert_eq!(insights.acquisition_date, Some(date(1)));
    assert_eq!(insights.last_interaction_date, Some(date(9)));
}

#[tokio::test]
async fn repeated_inbound_sync_updates_through_mapping() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    connector.insert(customer("1", "old@example.com", "Old"));

    let first = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&first.queue.id).await.unwrap();

    // The email changes upstream; the mapping still links the records.
    connector.replace(customer("1", "new@example.com", "New"));
    let second = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&second.queue.id).await.unwrap();

    assert_eq!(progress.updated, 1);
    assert_eq!(progress.created, 0);
    let records = orchestrator
        .database()
        .records()
        .list(&org, EntityType::Customer)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].natural_key, "new@example.com");
}

#[tokio::test]
async fn inbound_email_match_moves_mapping_to_new_external_id() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    connector.insert(customer("1", "a@example.com", "First"));
    let first = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&first.queue.id).await.unwrap();

    // The remote record was recreated under a new id with the same email.
    connector.insert(customer("2", "a@example.com", "Second"));
    let second = orchestrator
        .start_sync(inbound(org, SyncSelector::ExternalId { id: "2".into() }))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&second.queue.id).await.unwrap();
    assert_eq!(progress.updated, 1);

    let line = &orchestrator.database().queues().lines(&second.queue.id).unwrap()[0];
    assert_eq!(line.state, LineState::Done);
    let local_id = line.internal_id.unwrap();

    let mappings = orchestrator.database().mappings();
    let connector_id = connector_id(&orchestrator, &second.queue.id);
    let current = mappings
        .get_by_external(&connector_id, EntityType::Customer, &ExternalId::from("2"))
        .unwrap()
        .unwrap();
    assert_eq!(current.internal_id, local_id);
    assert!(mappings
        .get_by_external(&connector_id, EntityType::Customer, &ExternalId::from("1"))
        .unwrap()
        .is_none());
    assert_eq!(mappings.list_active(&connector_id, EntityType::Customer).unwrap().len(), 1);
}

#[tokio::test]
async fn outbound_creates_then_updates_through_mapping() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    seed_local(&orchestrator, org, &["a@example.com", "b@example.com"]);

    let first = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&first.queue.id).await.unwrap();
    assert_eq!(progress.created, 2);
    assert_eq!(connector.records(EntityType::Customer).len(), 2);

    let second = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&second.queue.id).await.unwrap();
    assert_eq!(progress.updated, 2);
    assert_eq!(connector.calls(MockOp::Create), 2);
    assert_eq!(connector.calls(MockOp::Update), 2);
    assert_eq!(connector.records(EntityType::Customer).len(), 2);

    let mappings = orchestrator
        .database()
        .mappings()
        .list_active(&connector_id(&orchestrator, &second.queue.id), EntityType::Customer)
        .unwrap();
    assert_eq!(mappings.len(), 2);
}

#[tokio::test]
async fn outbound_adopts_unmapped_remote_record() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    connector.insert(customer("55", "a@example.com", "Remote"));
    seed_local(&orchestrator, org, &["a@example.com"]);

    let started = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&started.queue.id).await.unwrap();
    assert_eq!(progress.updated, 1);
    assert_eq!(connector.calls(MockOp::Create), 0);

    let mappings = orchestrator
        .database()
        .mappings()
        .list_active(&connector_id(&orchestrator, &started.queue.id), EntityType::Customer)
        .unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].external_id, ExternalId::from("55"));
}

// ── Failures and recovery ────────────────────────────────────────

#[tokio::test]
async fn exhausted_lines_flag_queue_for_attention() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    seed_local(&orchestrator, org, &["a@example.com", "bad@example.com", "c@example.com"]);
    connector.poison_key("bad@example.com");

    let started = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&started.queue.id).await.unwrap();

    assert_eq!(progress.state, QueueState::DoneWithErrors);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.done, 2);
    assert_eq!(progress.done + progress.failed, progress.total);
    assert!(progress.action_required);
    assert!(progress.action_required_reason.is_some());

    let failed = orchestrator
        .database()
        .queues()
        .lines_in_state(&started.queue.id, LineState::Failed)
        .unwrap();
    assert_eq!(failed[0].retry_count, 3);
}

#[tokio::test]
async fn retry_failed_reprocesses_and_clears_flag() {
    let (connector, orchestrator) = setup();
    let org = OrgId::new();
    seed_local(&orchestrator, org, &["a@example.com", "bad@example.com"]);
    connector.poison_key("bad@example.com");
    let started = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    connector.clear_failures();
    let progress = orchestrator.retry_failed(&started.queue.id).await.unwrap();
    assert_eq!(progress.state, QueueState::Done);
    assert_eq!(progress.failed, 0);
    assert_eq!(progress.done, 2);
    assert_eq!(progress.process_count, 2);
    assert!(!progress.action_required);

    let log = orchestrator.get_activity_log(&started.queue.id, 50).unwrap();
    assert!(log.iter().any(|e| e.operation == Operation::Retry));
}

#[tokio::test]
async fn retry_respects_process_attempt_ceiling() {
    let config = EngineConfig {
        max_process_attempts: 1,
        ..fast_config()
    };
    let (connector, orchestrator) = setup_with(config);
    let org = OrgId::new();
    seed_local(&orchestrator, org, &["bad@example.com"]);
    connector.poison_key("bad@example.com");
    let started = orchestrator
        .start_sync(outbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();
    connector.clear_failures();

    let progress = orchestrator.retry_failed(&started.queue.id).await.unwrap();
    assert_eq!(progress.state, QueueState::DoneWithErrors);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.process_count, 1);
    assert!(progress.action_required);
}

#[tokio::test]
async fn force_done_skips_remaining_lines() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 3);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();

    let progress = orchestrator.force_done(&started.queue.id).await.unwrap();
    assert_eq!(progress.state, QueueState::Done);
    assert_eq!(progress.skipped, 3);
    assert_eq!(progress.processed, 3);
    assert_eq!(progress.progress, 100);
    assert!(!progress.action_required);

    let log = orchestrator.get_activity_log(&started.queue.id, 10).unwrap();
    assert_eq!(log[0].operation, Operation::ForceDone);
    assert_eq!(log[0].records_affected, 3);

    // A forced queue has nothing left to run.
    let again = orchestrator.process_queue(&started.queue.id).await.unwrap();
    assert_eq!(again.process_count, 0);
    assert_eq!(connector.calls(MockOp::Orders), 0);
}

#[tokio::test(start_paused = true)]
async fn force_done_stops_a_running_queue_between_batches() {
    let config = EngineConfig {
        batch: BatchConfig {
            batch_size: 1,
            batch_delay_ms: 10_000,
        },
        ..fast_config()
    };
    let (connector, orchestrator) = setup_with(config);
    seed_customers(&connector, 5);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let id = started.queue.id;

    let (run, forced) = tokio::join!(orchestrator.process_queue(&id), async {
        tokio::time::sleep(std::time::Duration::from_secs(15)).await;
        let at = tokio::time::Instant::now();
        let forced = orchestrator.force_done(&id).await.unwrap();
        // Returned without waiting out the running drain.
        assert_eq!(at.elapsed(), std::time::Duration::ZERO);
        forced
    });

    assert_eq!(forced.state, QueueState::Done);
    assert_eq!(forced.done, 2);
    assert_eq!(forced.skipped, 3);

    let run = run.unwrap();
    assert_eq!(run.state, QueueState::Done);
    assert_eq!(run.done, 2);
    assert_eq!(run.skipped, 3);
    assert_eq!(run.pending, 0);
    assert!(!run.action_required);
    assert_eq!(connector.calls(MockOp::Orders), 2);
}

#[tokio::test]
async fn queue_locks_are_released_after_use() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 2);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let id = started.queue.id;

    let (a, b) = tokio::join!(orchestrator.process_queue(&id), orchestrator.retry_failed(&id));
    a.unwrap();
    b.unwrap();
    orchestrator.force_done(&id).await.unwrap();
    assert_eq!(orchestrator.tracked_queue_locks(), 0);
}

#[tokio::test]
async fn unknown_queue_is_reported() {
    let (_connector, orchestrator) = setup();
    let id = QueueId::new();
    assert!(matches!(
        orchestrator.get_status(&id),
        Err(SyncError::QueueNotFound(missing)) if missing == id
    ));
    assert!(matches!(
        orchestrator.process_queue(&id).await,
        Err(SyncError::QueueNotFound(_))
    ));
    assert!(matches!(
        orchestrator.get_activity_log(&id, 10),
        Err(SyncError::QueueNotFound(_))
    ));
}

#[tokio::test]
async fn activity_log_is_newest_first_and_limited() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 5);
    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    let log = orchestrator.get_activity_log(&started.queue.id, 3).unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.windows(2).all(|w| w[0].id > w[1].id));
    assert!(log.iter().all(|e| e.operation == Operation::Create));
}

#[tokio::test]
async fn purge_removes_finished_queues() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 1);
    let org = OrgId::new();
    let started = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    let removed = orchestrator
        .purge_finished_queues(&org, Utc::now() + Duration::hours(1))
        .unwrap();
    assert_eq!(removed, 1);
    assert!(orchestrator.list_queues(&org, 10).unwrap().is_empty());
}

// ── Preview ──────────────────────────────────────────────────────

#[tokio::test]
async fn preview_hits_cache_and_is_invalidated_by_sync() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 2);
    let org = OrgId::new();
    let system = ExternalSystem::WooCommerce;

    let first = orchestrator
        .get_preview_snapshot(org, system, EntityType::Customer, Direction::Inbound, false)
        .await
        .unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.snapshot.new.count, 2);

    let cached = orchestrator
        .get_preview_snapshot(org, system, EntityType::Customer, Direction::Inbound, false)
        .await
        .unwrap();
    assert!(cached.cache_hit);
    assert_eq!(cached.snapshot.new, first.snapshot.new);

    let started = orchestrator
        .start_sync(inbound(org, SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    let after = orchestrator
        .get_preview_snapshot(org, system, EntityType::Customer, Direction::Inbound, false)
        .await
        .unwrap();
    assert!(!after.cache_hit);
    assert_eq!(after.snapshot.total_changes(), 0);
}

#[tokio::test]
async fn preview_for_other_system_is_rejected() {
    let (_connector, orchestrator) = setup();
    let err = orchestrator
        .get_preview_snapshot(
            OrgId::new(),
            ExternalSystem::Odoo,
            EntityType::Product,
            Direction::Inbound,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[tokio::test]
async fn explicit_invalidation_by_direction() {
    let (connector, orchestrator) = setup();
    seed_customers(&connector, 1);
    let org = OrgId::new();
    let system = ExternalSystem::WooCommerce;
    for direction in Direction::BOTH {
        orchestrator
            .get_preview_snapshot(org, system, EntityType::Customer, direction, false)
            .await
            .unwrap();
    }

    orchestrator
        .invalidate_preview_cache(&org, None, None, Some(Direction::Outbound))
        .unwrap();

    let inbound = orchestrator
        .get_preview_snapshot(org, system, EntityType::Customer, Direction::Inbound, false)
        .await
        .unwrap();
    let outbound = orchestrator
        .get_preview_snapshot(org, system, EntityType::Customer, Direction::Outbound, false)
        .await
        .unwrap();
    assert!(inbound.cache_hit);
    assert!(!outbound.cache_hit);
}

// ── Events ───────────────────────────────────────────────────────

#[tokio::test]
async fn events_trace_the_run() {
    let (connector, orchestrator) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator.with_events(tx);
    seed_customers(&connector, 3);

    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    orchestrator.process_queue(&started.queue.id).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(SyncEvent::QueueCreated { lines: 3, .. })));
    assert!(matches!(
        events.last(),
        Some(SyncEvent::QueueFinished {
            state: QueueState::Done,
            ..
        })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::LineCompleted { was_update: false, .. }))
        .count();
    assert_eq!(completed, 3);
}

#[tokio::test]
async fn dropped_receiver_does_not_break_sync() {
    let (connector, orchestrator) = setup();
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let orchestrator = orchestrator.with_events(tx);
    seed_customers(&connector, 1);

    let started = orchestrator
        .start_sync(inbound(OrgId::new(), SyncSelector::All))
        .await
        .unwrap();
    let progress = orchestrator.process_queue(&started.queue.id).await.unwrap();
    assert_eq!(progress.done, 1);
}

#[test]
fn invalid_config_is_rejected() {
    let db = syncline_store::Database::open_in_memory().unwrap();
    let connector = std::sync::Arc::new(syncline_engine::mock::MockConnector::new(
        ExternalSystem::WooCommerce,
    ));
    let mut config = EngineConfig::default();
    config.batch.batch_size = 5000;
    assert!(matches!(
        SyncOrchestrator::new(db, connector, config),
        Err(SyncError::Config(_))
    ));
}
