use chrono::{Duration, Utc};
use syncline_store::{Database, PreviewKey};
use syncline_types::{
    DeltaBucket, DeltaSnapshot, Direction, EntityType, ExternalSystem, OrgId,
};

fn snapshot(org: OrgId, entity_type: EntityType, direction: Direction, new: usize) -> DeltaSnapshot {
    let now = Utc::now();
    DeltaSnapshot {
        org_id: org,
        system: ExternalSystem::WooCommerce,
        entity_type,
        direction,
        new: DeltaBucket {
            count: new,
            records: vec![],
        },
        updated: DeltaBucket::default(),
        deleted: DeltaBucket::default(),
        computed_at: now,
        expires_at: now + Duration::hours(1),
    }
}

fn key(org: OrgId, entity_type: EntityType) -> PreviewKey {
    PreviewKey::new(org, ExternalSystem::WooCommerce, entity_type)
}

#[test]
fn put_then_get_fresh_snapshot() {
    let db = Database::open_in_memory().unwrap();
    let cache = db.previews();
    let org = OrgId::new();
    let snap = snapshot(org, EntityType::Customer, Direction::Inbound, 4);
    cache.put(&snap).unwrap();

    let hit = cache
        .get(&key(org, EntityType::Customer), Direction::Inbound, Utc::now())
        .unwrap();
    assert_eq!(hit, Some(snap));
    assert!(cache
        .get(&key(org, EntityType::Customer), Direction::Outbound, Utc::now())
        .unwrap()
        .is_none());
}

#[test]
fn expired_snapshot_is_a_miss() {
    let db = Database::open_in_memory().unwrap();
    let cache = db.previews();
    let org = OrgId::new();
    let snap = snapshot(org, EntityType::Customer, Direction::Inbound, 1);
    cache.put(&snap).unwrap();

    let k = key(org, EntityType::Customer);
    assert!(cache.get(&k, Direction::Inbound, snap.expires_at).unwrap().is_none());
    assert!(cache
        .get(&k, Direction::Inbound, snap.expires_at - Duration::seconds(1))
        .unwrap()
        .is_some());
}

#[test]
fn put_replaces_one_direction_only() {
    let db = Database::open_in_memory().unwrap();
    let cache = db.previews();
    let org = OrgId::new();
    cache.put(&snapshot(org, EntityType::Product, Direction::Inbound, 1)).unwrap();
    cache.put(&snapshot(org, EntityType::Product, Direction::Outbound, 2)).unwrap();
    cache.put(&snapshot(org, EntityType::Product, Direction::Inbound, 3)).unwrap();

    let k = key(org, EntityType::Product);
    let inbound = cache.get(&k, Direction::Inbound, Utc::now()).unwrap().unwrap();
    let outbound = cache.get(&k, Direction::Outbound, Utc::now()).unwrap().unwrap();
    assert_eq!(inbound.new.count, 3);
    assert_eq!(outbound.new.count, 2);
}

#[test]
fn invalidate_narrows_by_entity_type_and_direction() {
    let db = Database::open_in_memory().unwrap();
    let cache = db.previews();
    let org = OrgId::new();
    cache.put(&snapshot(org, EntityType::Customer, Direction::Inbound, 1)).unwrap();
    cache.put(&snapshot(org, EntityType::Customer, Direction::Outbound, 1)).unwrap();
    cache.put(&snapshot(org, EntityType::Product, Direction::Inbound, 1)).unwrap();

    cache
        .invalidate(&org, None, Some(EntityType::Customer), Some(Direction::Inbound))
        .unwrap();
    let customers = key(org, EntityType::Customer);
    assert!(cache.get(&customers, Direction::Inbound, Utc::now()).unwrap().is_none());
    assert!(cache.get(&customers, Direction::Outbound, Utc::now()).unwrap().is_some());

    assert_eq!(cache.invalidate(&org, None, None, None).unwrap(), 2);
    let products = key(org, EntityType::Product);
    assert!(cache.get(&products, Direction::Inbound, Utc::now()).unwrap().is_none());
}

#[test]
fn invalidate_other_org_is_noop() {
    let db = Database::open_in_memory().unwrap();
    let cache = db.previews();
    let org = OrgId::new();
    cache.put(&snapshot(org, EntityType::Order, Direction::Inbound, 1)).unwrap();
    assert_eq!(
        cache
            .invalidate(&OrgId::new(), Some(ExternalSystem::WooCommerce), None, None)
            .unwrap(),
        0
    );
    assert!(cache
        .get(&key(org, EntityType::Order), Direction::Inbound, Utc::now())
        .unwrap()
        .is_some());
}
