//! The entity envelope carried through queues, mappers and delta detection.
//!
//! Every record is one of a closed set of variants. Each variant knows its
//! natural key (how the same logical entity is matched across systems) and
//! which of its fields take part in change detection.

use crate::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A customer, keyed by email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    /// Identifier on the side the record was read from.
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Derived from the customer's orders during inbound sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<CustomerInsights>,
}

/// Order-derived figures attached to a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerInsights {
    pub order_count: u32,
    pub completed_orders: u32,
    pub lifetime_value: f64,
    pub segment: CustomerSegment,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub last_interaction_date: Option<DateTime<Utc>>,
}

/// Coarse customer size bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSegment {
    Individual,
    Startup,
    Smb,
    MidMarket,
    Enterprise,
}

impl CustomerSegment {
    /// Buckets a customer by lifetime value and completed order count.
    pub fn classify(lifetime_value: f64, completed_orders: u32) -> Self {
        if lifetime_value > 50_000.0 {
            CustomerSegment::Enterprise
        } else if lifetime_value > 20_000.0 || completed_orders > 50 {
            CustomerSegment::MidMarket
        } else if lifetime_value > 5_000.0 || completed_orders > 10 {
            CustomerSegment::Smb
        } else if completed_orders > 2 {
            CustomerSegment::Startup
        } else {
            CustomerSegment::Individual
        }
    }
}

/// A product, keyed by SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default)]
    pub sku: String,
    pub name: String,
    #[serde(default, deserialize_with = "opt_decimal_from_any")]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// An order, keyed by its external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub status: String,
    #[serde(deserialize_with = "decimal_from_any")]
    pub total: f64,
    #[serde(default, deserialize_with = "opt_id_from_any")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub billing_email: Option<String>,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
}

/// Tagged envelope over all entity variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityRecord {
    Customer(CustomerRecord),
    Product(ProductRecord),
    Order(OrderRecord),
}

impl EntityRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityRecord::Customer(_) => EntityType::Customer,
            EntityRecord::Product(_) => EntityType::Product,
            EntityRecord::Order(_) => EntityType::Order,
        }
    }

    /// Identifier on the side this record was read from.
    pub fn id(&self) -> &str {
        match self {
            EntityRecord::Customer(c) => &c.id,
            EntityRecord::Product(p) => &p.id,
            EntityRecord::Order(o) => &o.id,
        }
    }

    /// Replaces the side-specific identifier, e.g. after a local insert.
    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match self {
            EntityRecord::Customer(c) => c.id = id,
            EntityRecord::Product(p) => p.id = id,
            EntityRecord::Order(o) => o.id = id,
        }
    }

    /// The key used to match this record against the other system.
    ///
    /// Customers match on lower-cased email and products on SKU; both fall
    /// back to the record id when the key field is blank. Orders always
    /// match on id.
    pub fn natural_key(&self) -> String {
        match self {
            EntityRecord::Customer(c) => {
                let email = c.email.trim();
                if email.is_empty() {
                    c.id.clone()
                } else {
                    email.to_lowercase()
                }
            }
            EntityRecord::Product(p) => {
                let sku = p.sku.trim();
                if sku.is_empty() {
                    p.id.clone()
                } else {
                    sku.to_string()
                }
            }
            EntityRecord::Order(o) => o.id.clone(),
        }
    }

    /// Whether [`natural_key`](Self::natural_key) is the side-specific id,
    /// so the same record carries a different key on each side.
    pub fn is_keyed_by_id(&self) -> bool {
        match self {
            EntityRecord::Customer(c) => c.email.trim().is_empty(),
            EntityRecord::Product(p) => p.sku.trim().is_empty(),
            EntityRecord::Order(_) => true,
        }
    }

    /// Projection over the fields that take part in change detection.
    ///
    /// Identifiers, timestamps and derived insights are excluded so the same
    /// logical record hashes identically on both sides.
    pub fn comparable_fields(&self) -> Value {
        match self {
            EntityRecord::Customer(c) => json!({
                "email": c.email.trim().to_lowercase(),
                "name": c.name,
                "phone": c.phone,
                "company": c.company,
                "tags": c.tags,
                "metadata": c.metadata,
            }),
            EntityRecord::Product(p) => json!({
                "name": p.name,
                "sku": p.sku,
                "price": p.price,
                "stock_quantity": p.stock_quantity,
                "description": p.description,
            }),
            EntityRecord::Order(o) => json!({
                "status": o.status,
                "total": o.total,
                "customer_id": o.customer_id,
                "billing_email": o.billing_email,
            }),
        }
    }

    /// Short description used in preview samples.
    pub fn summary(&self, hash: impl Into<String>) -> RecordSummary {
        let (label, detail) = match self {
            EntityRecord::Customer(c) => (c.name.clone(), Some(c.email.clone())),
            EntityRecord::Product(p) => (p.name.clone(), Some(p.sku.clone())),
            EntityRecord::Order(o) => (o.status.clone(), Some(format!("{:.2}", o.total))),
        };
        RecordSummary {
            id: self.id().to_string(),
            key: self.natural_key(),
            label,
            detail,
            hash: hash.into(),
        }
    }

    pub fn as_customer(&self) -> Option<&CustomerRecord> {
        match self {
            EntityRecord::Customer(c) => Some(c),
            _ => None,
        }
    }
}

impl From<CustomerRecord> for EntityRecord {
    fn from(c: CustomerRecord) -> Self {
        EntityRecord::Customer(c)
    }
}

impl From<ProductRecord> for EntityRecord {
    fn from(p: ProductRecord) -> Self {
        EntityRecord::Product(p)
    }
}

impl From<OrderRecord> for EntityRecord {
    fn from(o: OrderRecord) -> Self {
        EntityRecord::Order(o)
    }
}

/// A bounded preview entry for one changed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: String,
    pub key: String,
    pub label: String,
    pub detail: Option<String>,
    /// Content hash of the record's comparable fields.
    pub hash: String,
}

// ── Lenient field decoding ───────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl Scalar {
    fn into_id(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
        }
    }

    fn into_decimal<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Scalar::Text(s) if s.trim().is_empty() => Ok(0.0),
            Scalar::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("invalid decimal: {s}"))),
            Scalar::Unsigned(n) => Ok(n as f64),
            Scalar::Signed(n) => Ok(n as f64),
            Scalar::Float(n) => Ok(n),
        }
    }
}

fn id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Scalar::deserialize(deserializer)?.into_id())
}

fn opt_id_from_any<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_id))
}

fn decimal_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Scalar::deserialize(deserializer)?.into_decimal()
}

fn opt_decimal_from_any<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    match Option::<Scalar>::deserialize(deserializer)? {
        Some(Scalar::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => v.into_decimal().map(Some),
        None => Ok(None),
    }
}
