//! Small closed vocabularies: entity types, sync directions, external systems.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of entity the engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customer,
    Product,
    Order,
}

impl EntityType {
    /// All entity types, in a stable order.
    pub const ALL: [EntityType; 3] = [EntityType::Customer, EntityType::Product, EntityType::Order];

    /// The lowercase wire name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customer => "customer",
            EntityType::Product => "product",
            EntityType::Order => "order",
        }
    }

    /// Name of the natural key used to match records across systems.
    pub const fn natural_key_name(&self) -> &'static str {
        match self {
            EntityType::Customer => "email",
            EntityType::Product => "sku",
            EntityType::Order => "external_id",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" | "customers" => Ok(EntityType::Customer),
            "product" | "products" => Ok(EntityType::Product),
            "order" | "orders" => Ok(EntityType::Order),
            other => Err(Error::UnknownEntityType(other.to_string())),
        }
    }
}

/// Which side is authoritative for a comparison or a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// External system is the source, local system the target.
    Inbound,
    /// Local system is the source, external system the target.
    Outbound,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Inbound, Direction::Outbound];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }

    /// Whether the external system is the source side.
    pub const fn source_is_external(&self) -> bool {
        matches!(self, Direction::Inbound)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(Error::UnknownDirection(other.to_string())),
        }
    }
}

/// External systems the engine has connectors for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalSystem {
    /// Commerce REST API.
    #[serde(rename = "woocommerce")]
    WooCommerce,
    /// ERP RPC API.
    Odoo,
}

impl ExternalSystem {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExternalSystem::WooCommerce => "woocommerce",
            ExternalSystem::Odoo => "odoo",
        }
    }
}

impl fmt::Display for ExternalSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "woocommerce" => Ok(ExternalSystem::WooCommerce),
            "odoo" => Ok(ExternalSystem::Odoo),
            other => Err(Error::UnknownSystem(other.to_string())),
        }
    }
}
