//! Incremental sync engine for syncline.
//!
//! Reconciles customers, products and orders between the local record store
//! and an external commerce or ERP system reachable only through paged,
//! rate-limited APIs.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Hasher**: content fingerprint over each entity's comparable fields
//! - **DeltaDetector**: new / updated / deleted partition of both sides, with
//!   a TTL-bound preview cache
//! - **RetryController**: per-line retry with exponential backoff
//! - **BatchProcessor**: drains a queue in paced batches
//! - **SyncOrchestrator**: the public API composing the above
//!
//! ## Sync Process
//!
//! 1. **Preview** (optional): compute the delta and inspect bounded samples
//! 2. **Start**: seed a queue with one line per selected entity
//! 3. **Process**: claim batches of draft lines and run each to a terminal state
//! 4. **Recover**: retry failed lines or force the queue done
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use syncline_engine::{
//!     EngineConfig, RestConfig, RestConnector, StartSyncRequest, SyncOrchestrator, SyncSelector,
//! };
//! use syncline_store::Database;
//! use syncline_types::{Direction, EntityType, OrgId};
//!
//! # async fn run() -> syncline_engine::SyncResult<()> {
//! let db = Database::open("sync.db")?;
//! let connector = Arc::new(RestConnector::new(RestConfig::default())?);
//! let orchestrator = SyncOrchestrator::new(db, connector, EngineConfig::default())?;
//!
//! let request = StartSyncRequest::new(
//!     OrgId::new(),
//!     EntityType::Customer,
//!     Direction::Inbound,
//!     SyncSelector::All,
//! );
//! let started = orchestrator.start_sync(request).await?;
//! let progress = orchestrator.process_queue(&started.queue.id).await?;
//! println!("{}% done", progress.progress);
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
pub mod connector;
pub mod delta;
mod error;
mod event;
pub mod hasher;
pub mod mock;
mod orchestrator;
pub mod rest;
pub mod retry;
mod selector;
pub mod worker;

pub use batch::{BatchProcessor, BatchRunSummary};
pub use config::{
    BatchConfig, DeltaConfig, EngineConfig, MAX_BATCH_DELAY_MS, MAX_BATCH_SIZE,
    MAX_PREVIEW_TTL_SECS,
};
pub use connector::{ExternalConnector, Page, PageCursor, Pager};
pub use delta::{DeltaComputation, DeltaDetector, Partition, PreviewResult, partition};
pub use error::{SyncError, SyncResult};
pub use event::{EventSink, SyncEvent};
pub use hasher::{content_hash, has_changed};
pub use orchestrator::{StartSyncRequest, StartSyncResponse, SyncOrchestrator, SyncProgress};
pub use rest::{RestConfig, RestConnector};
pub use retry::{AttemptOutcome, RetryController, RetryPolicy};
pub use selector::SyncSelector;
