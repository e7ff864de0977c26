//! Connector for paged JSON REST APIs in the WooCommerce style.
//!
//! - `GET  {base}/{collection}?page=N&per_page=M` lists, with the page count
//!   in `X-WP-TotalPages` when the server sends it
//! - `GET  {base}/{collection}/{id}` reads one record
//! - `POST {base}/{collection}` creates, answering with the new record
//! - `PUT  {base}/{collection}/{id}` updates

use crate::connector::{ExternalConnector, Page, PageCursor};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use syncline_types::{
    ConnectorId, EntityRecord, EntityType, ExternalId, ExternalSystem, OrderRecord,
};
use tracing::{debug, warn};

/// Response header carrying the total page count.
pub const TOTAL_PAGES_HEADER: &str = "X-WP-TotalPages";

/// Configuration for a [`RestConnector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// API root, e.g. `https://shop.example.com/wp-json/wc/v3`.
    pub base_url: String,
    /// Basic-auth user; requests are unauthenticated when empty.
    pub consumer_key: String,
    pub consumer_secret: String,
    pub per_page: u32,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
    pub system: ExternalSystem,
    /// Scope of the mappings written through this connector.
    pub connector_id: ConnectorId,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/wp-json/wc/v3".to_string(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            per_page: 100,
            timeout_ms: 30_000,
            system: ExternalSystem::WooCommerce,
            connector_id: ConnectorId::new(),
        }
    }
}

/// REST connector backed by reqwest.
pub struct RestConnector {
    config: RestConfig,
    client: Client,
}

impl RestConnector {
    pub fn new(config: RestConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn collection(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Customer => "customers",
            EntityType::Product => "products",
            EntityType::Order => "orders",
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.consumer_key.is_empty() {
            request
        } else {
            request.basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> SyncResult<Response> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    async fn fetch_page(
        &self,
        entity_type: EntityType,
        cursor: PageCursor,
        extra: &[(&str, &str)],
    ) -> SyncResult<(Vec<Value>, Option<u32>)> {
        let what = format!("list {} page {}", Self::collection(entity_type), cursor.page);
        let request = self
            .client
            .get(self.url(Self::collection(entity_type)))
            .query(&[
                ("page", cursor.page.to_string()),
                ("per_page", cursor.per_page.to_string()),
            ])
            .query(extra);
        let response = self.send(request, &what).await?;
        let total_pages = response
            .headers()
            .get(TOTAL_PAGES_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());
        let items: Vec<Value> = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("{what}: unexpected body: {e}")))?;
        Ok((items, total_pages))
    }
}

#[async_trait]
impl ExternalConnector for RestConnector {
    fn system(&self) -> ExternalSystem {
        self.config.system
    }

    fn connector_id(&self) -> ConnectorId {
        self.config.connector_id
    }

    fn page_size(&self) -> u32 {
        self.config.per_page
    }

    async fn list_page(&self, entity_type: EntityType, cursor: PageCursor) -> SyncResult<Page> {
        let (items, total_pages) = self.fetch_page(entity_type, cursor, &[]).await?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match decode_record(entity_type, item) {
                Ok(record) => records.push(record),
                // One malformed record must not hide the rest of the listing.
                Err(e) => warn!("Skipping undecodable {} on page {}: {}", entity_type, cursor.page, e),
            }
        }
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
        let what = format!("get {} {}", entity_type, id);
        let request = self
            .client
            .get(self.url(&format!("{}/{}", Self::collection(entity_type), id)));
        match self.send(request, &what).await {
            Ok(response) => {
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| SyncError::Validation(format!("{what}: unexpected body: {e}")))?;
                Ok(Some(decode_record(entity_type, value)?))
            }
            Err(SyncError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_by_natural_key(
        &self,
        entity_type: EntityType,
        key: &str,
    ) -> SyncResult<Option<EntityRecord>> {
        let filter = match entity_type {
            EntityType::Customer => "email",
            EntityType::Product => "sku",
            EntityType::Order => return self.get(entity_type, &ExternalId::from(key)).await,
        };
        let (items, _) = self
            .fetch_page(entity_type, PageCursor::first(1), &[(filter, key)])
            .await?;
        items
            .into_iter()
            .next()
            .map(|item| decode_record(entity_type, item))
            .transpose()
    }

    async fn create(&self, record: &EntityRecord) -> SyncResult<ExternalId> {
        let entity_type = record.entity_type();
        let what = format!("create {}", entity_type);
        let request = self
            .client
            .post(self.url(Self::collection(entity_type)))
            .json(&encode_record(record)?);
        let response = self.send(request, &what).await?;
        let created: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("{what}: unexpected body: {e}")))?;
        let id = created
            .get("id")
            .cloned()
            .map(serde_json::from_value::<ExternalId>)
            .transpose()?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::Validation(format!("{what}: response carried no id")))?;
        debug!("Created {} {} on {}", entity_type, id, self.config.system);
        Ok(id)
    }

    async fn update(&self, id: &ExternalId, record: &EntityRecord) -> SyncResult<()> {
        let entity_type = record.entity_type();
        let what = format!("update {} {}", entity_type, id);
        let request = self
            .client
            .put(self.url(&format!("{}/{}", Self::collection(entity_type), id)))
            .json(&encode_record(record)?);
        self.send(request, &what).await?;
        Ok(())
    }

    async fn list_customer_orders(&self, customer_id: &ExternalId) -> SyncResult<Vec<OrderRecord>> {
        let mut orders = Vec::new();
        let mut cursor = PageCursor::first(self.config.per_page);
        loop {
            let (items, total_pages) = self
                .fetch_page(EntityType::Order, cursor, &[("customer", customer_id.as_str())])
                .await?;
            let count = items.len() as u32;
            for item in items {
                if let EntityRecord::Order(order) = decode_record(EntityType::Order, item)? {
                    orders.push(order);
                }
            }
            let page = Page {
                records: Vec::new(),
                cursor,
                total_pages,
            };
            let last = match total_pages {
                Some(_) => page.is_last(),
                None => count < cursor.per_page,
            };
            if last {
                break;
            }
            cursor = cursor.next();
        }
        Ok(orders)
    }
}

// ── Wire mapping ─────────────────────────────────────────────────

/// Decodes one JSON object of a collection into the entity envelope.
///
/// Customers without a `name` get one from `first_name`/`last_name`, and
/// timestamps without an offset are read as UTC.
pub fn decode_record(entity_type: EntityType, value: Value) -> SyncResult<EntityRecord> {
    let Value::Object(mut obj) = value else {
        return Err(SyncError::Validation(format!(
            "expected a JSON object for {entity_type}"
        )));
    };

    if entity_type == EntityType::Customer && !obj.contains_key("name") {
        let first = obj.get("first_name").and_then(Value::as_str).unwrap_or("");
        let last = obj.get("last_name").and_then(Value::as_str).unwrap_or("");
        let name = format!("{first} {last}").trim().to_string();
        obj.insert("name".into(), Value::String(name));
    }
    if entity_type == EntityType::Order {
        normalize_timestamp(&mut obj, "date_created");
    }

    obj.insert(
        "entity_type".into(),
        Value::String(entity_type.as_str().to_string()),
    );
    serde_json::from_value(Value::Object(obj))
        .map_err(|e| SyncError::Validation(format!("malformed {entity_type}: {e}")))
}

/// The request body for create/update: the record without its tag or id.
pub fn encode_record(record: &EntityRecord) -> SyncResult<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(obj) = &mut value {
        obj.remove("entity_type");
        obj.remove("id");
        obj.remove("insights");
    }
    Ok(value)
}

fn normalize_timestamp(obj: &mut Map<String, Value>, field: &str) {
    let gmt_field = format!("{field}_gmt");
    let raw = obj
        .get(&gmt_field)
        .or_else(|| obj.get(field))
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(raw) = raw {
        let has_offset = raw.ends_with('Z') || raw.rfind(['+', '-']).is_some_and(|i| i > 10);
        let fixed = if has_offset { raw } else { format!("{raw}Z") };
        obj.insert(field.to_string(), Value::String(fixed));
    }
}

// ── Error mapping ────────────────────────────────────────────────

fn transport_error(what: &str, e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(format!("{what}: {e}"))
    } else {
        SyncError::Network(format!("{what}: {e}"))
    }
}

/// Maps a non-success status onto the error taxonomy.
pub fn status_error(status: StatusCode, what: &str, body: &str) -> SyncError {
    let detail = format!("{what}: HTTP {} {}", status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => SyncError::Auth(detail),
        404 => SyncError::NotFound(detail),
        409 => SyncError::Conflict(detail),
        400 | 422 => SyncError::Validation(detail),
        408 | 504 => SyncError::Timeout(detail),
        429 => SyncError::RateLimited(detail),
        _ => SyncError::Network(detail),
    }
}
