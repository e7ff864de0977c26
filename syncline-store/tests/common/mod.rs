#![allow(dead_code)]

use std::collections::BTreeMap;
use syncline_store::{Database, NewLine, NewQueue, SyncQueue};
use syncline_types::{
    ConnectorId, CustomerRecord, Direction, EntityRecord, EntityType, ExternalSystem, OrgId,
};

pub fn customer(id: &str, email: &str, name: &str) -> EntityRecord {
    EntityRecord::Customer(CustomerRecord {
        id: id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        phone: None,
        company: None,
        tags: vec![],
        metadata: BTreeMap::new(),
        insights: None,
    })
}

pub fn new_queue(org_id: OrgId, key: &str) -> NewQueue {
    NewQueue {
        org_id,
        name: "Customers inbound".into(),
        connector_id: ConnectorId::new(),
        system: ExternalSystem::WooCommerce,
        entity_type: EntityType::Customer,
        direction: Direction::Inbound,
        idempotency_key: key.into(),
        batch_size: 50,
        batch_delay_ms: 0,
        created_by: None,
    }
}

pub fn inbound_lines(n: usize) -> Vec<NewLine> {
    (1..=n)
        .map(|i| NewLine {
            external_key: i.to_string(),
            internal_id: None,
            payload: customer(&i.to_string(), &format!("c{i}@example.com"), &format!("C{i}")),
        })
        .collect()
}

pub fn queue_with_lines(db: &Database, n: usize) -> SyncQueue {
    let queue = db
        .queues()
        .create_queue(new_queue(OrgId::new(), "run-1"))
        .unwrap()
        .into_queue();
    db.queues().add_lines(&queue.id, &inbound_lines(n)).unwrap();
    queue
}
