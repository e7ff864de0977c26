//! Syncline sync server
//!
//! Runs the incremental sync engine against one REST connector and exposes
//! queue control and delta previews over HTTP.
//!
//! Usage:
//!   syncline-server --config syncline.toml --port 8080

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use syncline_engine::{RestConnector, SyncEvent, SyncOrchestrator};
use syncline_server::{AppState, ServerConfig, build_router};
use syncline_store::Database;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "syncline-server")]
#[command(about = "Incremental sync engine HTTP server")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configured address
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path, overriding the configured one
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => {
            warn!("No config file given, using defaults");
            ServerConfig::default()
        }
    };
    if let Some(port) = args.port {
        config.listen = format!("0.0.0.0:{}", port);
    }
    if let Some(database) = args.database {
        config.database = database;
    }

    info!("Syncline server starting...");
    let db = Database::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    let connector = RestConnector::new(config.connector.clone())
        .context("Failed to create REST connector")?;
    info!(
        "Connector: {} at {}",
        config.connector.system, config.connector.base_url
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = SyncOrchestrator::new(db, Arc::new(connector), config.engine.clone())
        .context("Invalid engine configuration")?
        .with_events(tx);
    tokio::spawn(log_events(rx));

    let app = build_router(AppState::new(orchestrator));
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("HTTP API listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Syncline server stopped");
    Ok(())
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SyncEvent::QueueFinished { queue_id, state, counts } => {
                info!(
                    "Queue {} finished as {}: {}/{} processed",
                    queue_id,
                    state.as_str(),
                    counts.processed(),
                    counts.total
                );
            }
            SyncEvent::LineFailed { queue_id, line_id, attempts, error } => {
                warn!(
                    "Queue {} line {} failed after {} attempts: {}",
                    queue_id, line_id, attempts, error
                );
            }
            other => debug!("Sync event: {:?}", other),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
