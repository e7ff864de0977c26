#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use syncline_engine::mock::MockConnector;
use syncline_engine::{BatchConfig, EngineConfig, RetryPolicy, SyncOrchestrator};
use syncline_store::Database;
use syncline_types::{
    CustomerRecord, EntityRecord, ExternalSystem, OrderRecord, ProductRecord,
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

pub fn product(id: &str, sku: &str, price: f64) -> EntityRecord {
    EntityRecord::Product(ProductRecord {
        id: id.to_string(),
        sku: sku.to_string(),
        name: format!("Product {sku}"),
        price: Some(price),
        stock_quantity: Some(10),
        description: None,
    })
}

pub fn order(id: &str, status: &str, total: f64, day: u32) -> OrderRecord {
    OrderRecord {
        id: id.to_string(),
        status: status.to_string(),
        total,
        customer_id: None,
        billing_email: None,
        date_created: Some(date(day)),
    }
}

pub fn date(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
}

/// Customers `c1@example.com` .. `cN@example.com` with external ids 1..=N.
pub fn seed_customers(connector: &MockConnector, n: usize) {
    for i in 1..=n {
        connector.insert(customer(&i.to_string(), &format!("c{i}@example.com"), &format!("C{i}")));
    }
}

/// No pacing and no backoff, so runs complete instantly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        batch: BatchConfig {
            batch_size: 50,
            batch_delay_ms: 0,
        },
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 0,
            multiplier: 2.0,
            fail_fast_on_validation: false,
        },
        ..Default::default()
    }
}

pub fn setup() -> (Arc<MockConnector>, SyncOrchestrator) {
    setup_with(fast_config())
}

/// Routes engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn setup_with(config: EngineConfig) -> (Arc<MockConnector>, SyncOrchestrator) {
    init_tracing();
    let connector = Arc::new(MockConnector::new(ExternalSystem::WooCommerce));
    let db = Database::open_in_memory().unwrap();
    let orchestrator = SyncOrchestrator::new(db, connector.clone(), config).unwrap();
    (connector, orchestrator)
}
