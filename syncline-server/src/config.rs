//! Server configuration, read from a TOML file.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! database = "/var/lib/syncline/sync.db"
//!
//! [engine.batch]
//! batch_size = 50
//! batch_delay_ms = 2000
//!
//! [connector]
//! base_url = "https://shop.example.com/wp-json/wc/v3"
//! consumer_key = "ck_..."
//! consumer_secret = "cs_..."
//! connector_id = "0190c0de-0000-7000-8000-000000000001"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use syncline_engine::{EngineConfig, RestConfig};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address of the HTTP API.
    pub listen: String,
    /// SQLite file holding queues, mappings, activity and previews.
    pub database: PathBuf,
    pub engine: EngineConfig,
    pub connector: RestConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            database: PathBuf::from("syncline.db"),
            engine: EngineConfig::default(),
            connector: RestConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let table: toml::Table = raw.parse().context("Failed to parse TOML")?;
        let has_connector_id = table
            .get("connector")
            .and_then(|c| c.get("connector_id"))
            .is_some();
        if !has_connector_id {
            warn!("connector.connector_id is not set, mappings will not carry over to the next start");
        }
        let config: ServerConfig = toml::Value::Table(table)
            .try_into()
            .context("Invalid config")?;
        config.engine.validate()?;
        Ok(config)
    }
}
