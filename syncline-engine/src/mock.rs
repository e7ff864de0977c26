//! In-memory connector for tests.
//!
//! Holds records per entity type in insertion order, counts calls per
//! operation and can be scripted to fail.

use crate::connector::{ExternalConnector, Page, PageCursor};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use syncline_types::{
    ConnectorId, EntityRecord, EntityType, ExternalId, ExternalSystem, OrderRecord,
};

/// Connector operations, for call counting and failure scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    List,
    Get,
    Find,
    Create,
    Update,
    Orders,
}

/// The kind of error a scripted failure produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Network,
    Timeout,
    RateLimited,
    Validation,
    Auth,
}

impl MockFailure {
    fn to_error(self, op: MockOp) -> SyncError {
        let what = format!("scripted {op:?} failure");
        match self {
            MockFailure::Network => SyncError::Network(what),
            MockFailure::Timeout => SyncError::Timeout(what),
            MockFailure::RateLimited => SyncError::RateLimited(what),
            MockFailure::Validation => SyncError::Validation(what),
            MockFailure::Auth => SyncError::Auth(what),
        }
    }
}

#[derive(Default)]
struct MockState {
    records: HashMap<EntityType, Vec<EntityRecord>>,
    orders_by_customer: HashMap<String, Vec<OrderRecord>>,
    calls: HashMap<MockOp, usize>,
    fail_next: HashMap<MockOp, (usize, MockFailure)>,
    fail_always: HashMap<MockOp, MockFailure>,
    /// Natural keys whose create/update always fail.
    poisoned_keys: HashSet<String>,
    next_id: u64,
}

/// A mock external system.
pub struct MockConnector {
    system: ExternalSystem,
    connector_id: ConnectorId,
    page_size: u32,
    report_total_pages: bool,
    state: Mutex<MockState>,
}

impl MockConnector {
    pub fn new(system: ExternalSystem) -> Self {
        Self {
            system,
            connector_id: ConnectorId::new(),
            page_size: 100,
            report_total_pages: true,
            state: Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// When off, listings end on a short page instead of a page count.
    pub fn with_total_pages(mut self, report: bool) -> Self {
        self.report_total_pages = report;
        self
    }

    /// Adds a record as it exists on the external side.
    pub fn insert(&self, record: EntityRecord) {
        let mut state = self.state.lock().unwrap();
        state.records.entry(record.entity_type()).or_default().push(record);
    }

    /// Overwrites the external record with the same type and id.
    pub fn replace(&self, record: EntityRecord) {
        let mut state = self.state.lock().unwrap();
        let all = state.records.entry(record.entity_type()).or_default();
        match all.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => all.push(record),
        }
    }

    pub fn insert_orders(&self, customer_id: &str, orders: Vec<OrderRecord>) {
        let mut state = self.state.lock().unwrap();
        state
            .orders_by_customer
            .entry(customer_id.to_string())
            .or_default()
            .extend(orders);
    }

    /// Snapshot of the external records of one type.
    pub fn records(&self, entity_type: EntityType) -> Vec<EntityRecord> {
        let state = self.state.lock().unwrap();
        state.records.get(&entity_type).cloned().unwrap_or_default()
    }

    pub fn calls(&self, op: MockOp) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// The next `times` calls of `op` fail.
    pub fn fail_next(&self, op: MockOp, times: usize, failure: MockFailure) {
        let mut state = self.state.lock().unwrap();
        state.fail_next.insert(op, (times, failure));
    }

    /// Every call of `op` fails until [`MockConnector::clear_failures`].
    pub fn fail_always(&self, op: MockOp, failure: MockFailure) {
        let mut state = self.state.lock().unwrap();
        state.fail_always.insert(op, failure);
    }

    /// Creates and updates of the record with this natural key always fail.
    pub fn poison_key(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.poisoned_keys.insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_next.clear();
        state.fail_always.clear();
        state.poisoned_keys.clear();
    }

    fn enter(&self, op: MockOp, key: Option<&str>) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(failure) = state.fail_always.get(&op) {
            return Err(failure.to_error(op));
        }
        if let Some((remaining, failure)) = state.fail_next.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failure.to_error(op));
            }
        }
        if let Some(key) = key {
            if state.poisoned_keys.contains(key) {
                return Err(SyncError::Validation(format!("rejected record {key}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalConnector for MockConnector {
    fn system(&self) -> ExternalSystem {
        self.system
    }

    fn connector_id(&self) -> ConnectorId {
        self.connector_id
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }

    async fn list_page(&self, entity_type: EntityType, cursor: PageCursor) -> SyncResult<Page> {
        self.enter(MockOp::List, None)?;
        let state = self.state.lock().unwrap();
        let all = state.records.get(&entity_type).map(Vec::as_slice).unwrap_or(&[]);
        let per_page = cursor.per_page.max(1) as usize;
        let start = (cursor.page.saturating_sub(1) as usize).saturating_mul(per_page);
        let records = all.iter().skip(start).take(per_page).cloned().collect();
        let total_pages = self
            .report_total_pages
            .then(|| all.len().div_ceil(per_page) as u32);
        Ok(Page {
            records,
            cursor,
            total_pages,
        })
    }

    async fn get(
        &self,
        entity_type: EntityType,
        id: &ExternalId,
    ) -> SyncResult<Option<EntityRecord>> {
        self.enter(MockOp::Get, None)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .get(&entity_type)
            .and_then(|all| all.iter().find(|r| r.id() == id.as_str()))
            .cloned())
    }

    async fn find_by_natural_key(
        &self,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<EntityRecord>> {
        self.enter(MockOp::Find, None)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .get(&entity_type)
            .and_then(|all| all.iter().find(|r| r.natural_key() == key))
            .cloned())
    }

    async fn create(&self, record: &EntityRecord) -> SyncResult<ExternalId> {
        self.enter(MockOp::Create, Some(&record.natural_key()))?;
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        let mut stored = record.clone();
        stored.set_id(id.clone());
        state.records.entry(record.entity_type()).or_default().push(stored);
        Ok(ExternalId::new(id))
    }

    async fn update(&self, id: &ExternalId, record: &EntityRecord) -> SyncResult<()> {
        self.enter(MockOp::Update, Some(&record.natural_key()))?;
        let mut state = self.state.lock().unwrap();
        let existing = state
            .records
            .get_mut(&record.entity_type())
            .and_then(|all| all.iter_mut().find(|r| r.id() == id.as_str()))
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", record.entity_type(), id)))?;
        let mut stored = record.clone();
        stored.set_id(id.as_str());
        *existing = stored;
        Ok(())
    }

    async fn list_customer_orders(&self, customer_id: &ExternalId) -> SyncResult<Vec<OrderRecord>> {
        self.enter(MockOp::Orders, None)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .orders_by_customer
            .get(customer_id.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
