//! External system abstraction.
//!
//! A connector exposes the handful of operations the engine needs from a
//! commerce or ERP system: a paged listing, point reads, create and update.
//! [`Pager`] turns the paged listing into a lazy sequence whose position is
//! an explicit [`PageCursor`], so a failed fetch can be resumed from the
//! page it failed on.

use crate::error::SyncResult;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use syncline_types::{ConnectorId, EntityRecord, EntityType, ExternalId, ExternalSystem, OrderRecord};
use tracing::debug;

/// Position in a paged listing. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub page: u32,
    pub per_page: u32,
}

impl PageCursor {
    pub fn first(per_page: u32) -> Self {
        Self {
            page: 1,
            per_page: per_page.max(1),
        }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            per_page: self.per_page,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<EntityRecord>,
    /// The cursor this page was fetched with.
    pub cursor: PageCursor,
    /// Total page count, when the external system reports it.
    pub total_pages: Option<u32>,
}

impl Page {
    /// The listing is exhausted after this page: either the reported page
    /// count is reached or the page came back short.
    pub fn is_last(&self) -> bool {
        match self.total_pages {
            Some(total) => self.cursor.page >= total,
            None => (self.records.len() as u32) < self.cursor.per_page,
        }
    }
}

/// A client for one external system.
#[async_trait]
pub trait ExternalConnector: Send + Sync {
    /// Which system this connector talks to.
    fn system(&self) -> ExternalSystem;

    /// Scope of the mappings written through this connector.
    fn connector_id(&self) -> ConnectorId;

    /// Page size used for full listings.
    fn page_size(&self) -> u32 {
        100
    }

    /// Model name of an entity type on the external side.
    fn external_model(&self, entity_type: EntityType) -> &'static str {
        match (self.system(), entity_type) {
            (ExternalSystem::Odoo, EntityType::Customer) => "res.partner",
            (ExternalSystem::Odoo, EntityType::Product) => "product.product",
            (ExternalSystem::Odoo, EntityType::Order) => "sale.order",
            (ExternalSystem::WooCommerce, EntityType::Customer) => "customer",
            (ExternalSystem::WooCommerce, EntityType::Product) => "product",
            (ExternalSystem::WooCommerce, EntityType::Order) => "order",
        }
    }

    /// Fetches one page of a listing.
    async fn list_page(&self, entity_type: EntityType, cursor: PageCursor) -> SyncResult<Page>;

    /// Reads one record, `None` if it does not exist.
    async fn get(&self, entity_type: EntityType, id: &ExternalId)
    -> SyncResult<Option<EntityRecord>>;

    /// Looks a record up by its natural key (email, SKU, order id).
    async fn find_by_natural_key(
        &self,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<EntityRecord>>;

    /// Creates a record and returns its external id. Not assumed idempotent.
    async fn create(&self, record: &EntityRecord) -> SyncResult<ExternalId>;

    /// Overwrites the record with the given external id.
    async fn update(&self, id: &ExternalId, record: &EntityRecord) -> SyncResult<()>;

    /// All orders placed by a customer.
    async fn list_customer_orders(&self, customer_id: &ExternalId) -> SyncResult<Vec<OrderRecord>>;
}

/// Lazy, restartable sequence of pages.
pub struct Pager<'a> {
    connector: &'a dyn ExternalConnector,
    entity_type: EntityType,
    cursor: PageCursor,
    exhausted: bool,
}

impl<'a> Pager<'a> {
    /// Starts at the first page.
    pub fn new(connector: &'a dyn ExternalConnector, entity_type: EntityType) -> Self {
        Self::resume(connector, entity_type, PageCursor::first(connector.page_size()))
    }

    /// Starts at a known page.
    pub fn resume(
        connector: &'a dyn ExternalConnector,
        entity_type: EntityType,
        cursor: PageCursor,
    ) -> Self {
        Self {
            connector,
            entity_type,
            cursor,
            exhausted: false,
        }
    }

    /// The page the next call to [`Pager::next_page`] will fetch.
    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next page, `None` once the listing is exhausted. On error
    /// the cursor is left in place, so calling again retries the same page.
    pub async fn next_page(&mut self) -> SyncResult<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.connector.list_page(self.entity_type, self.cursor).await?;
        debug!(
            "Fetched page {} of {} ({} records)",
            page.cursor.page,
            self.entity_type,
            page.records.len()
        );
        if page.is_last() {
            self.exhausted = true;
        } else {
            self.cursor = self.cursor.next();
        }
        Ok(Some(page))
    }

    /// Adapts the pager to a stream of pages. The stream ends after the last
    /// page or after the first error.
    pub fn into_stream(self) -> impl Stream<Item = SyncResult<Page>> + Send + 'a {
        futures::stream::unfold(Some(self), |state| async move {
            let mut pager = state?;
            match pager.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(pager))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Drains the listing, stopping early once `cap` records were collected.
    pub async fn collect_all(mut self, cap: Option<usize>) -> SyncResult<Vec<EntityRecord>> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page.records);
            if let Some(cap) = cap {
                if records.len() >= cap {
                    records.truncate(cap);
                    break;
                }
            }
        }
        Ok(records)
    }
}
