//! HTTP API over a [`SyncOrchestrator`].
//!
//! Every queue operation answers with the queue's [`SyncProgress`]. Errors
//! are returned as `{"error": "..."}` with a status derived from the
//! [`SyncError`] variant.

pub mod config;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use syncline_engine::{
    PreviewResult, StartSyncRequest, StartSyncResponse, SyncError, SyncOrchestrator, SyncProgress,
};
use syncline_store::ActivityEntry;
use syncline_types::{Direction, EntityType, ExternalSystem, OrgId, QueueId};
use tracing::{error, warn};

pub use config::ServerConfig;

/// Default page size of list endpoints.
pub const DEFAULT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Build the HTTP API router over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route(
            "/api/v1/sync/queues",
            post(start_sync_handler)
                .get(list_queues_handler)
                .delete(purge_queues_handler),
        )
        .route("/api/v1/sync/queues/{id}", get(status_handler))
        .route("/api/v1/sync/queues/{id}/process", post(process_handler))
        .route("/api/v1/sync/queues/{id}/retry", post(retry_handler))
        .route("/api/v1/sync/queues/{id}/force-done", post(force_done_handler))
        .route("/api/v1/sync/queues/{id}/check", post(check_handler))
        .route("/api/v1/sync/queues/{id}/activity", get(activity_handler))
        .route(
            "/api/v1/sync/preview",
            get(preview_handler).delete(invalidate_preview_handler),
        )
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    /// A malformed path or query parameter.
    BadRequest(String),
    Sync(SyncError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::QueueNotFound(_) | SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::InvalidSelector(_) | SyncError::Validation(_) | SyncError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Sync(e) => {
                let status = status_for(&e);
                if status.is_server_error() {
                    error!("Request failed: {}", e);
                } else {
                    warn!("Request rejected: {}", e);
                }
                (status, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ApiError::BadRequest(format!("invalid {name} '{raw}': {e}")))
}

fn parse_opt<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ApiError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|r| parse(name, r)).transpose()
}

// ── Handlers ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub system: ExternalSystem,
    pub version: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        system: state.orchestrator.system(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `201` for a new queue, `200` when the idempotency key matched.
async fn start_sync_handler(
    State(state): State<AppState>,
    Json(request): Json<StartSyncRequest>,
) -> Result<(StatusCode, Json<StartSyncResponse>), ApiError> {
    let response = state.orchestrator.start_sync(request).await?;
    let status = if response.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

#[derive(Debug, Deserialize)]
struct ListQueuesQuery {
    org_id: String,
    limit: Option<usize>,
}

async fn list_queues_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQueuesQuery>,
) -> ApiResult<Vec<SyncProgress>> {
    let org_id: OrgId = parse("org_id", &query.org_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.orchestrator.list_queues(&org_id, limit)?))
}

#[derive(Debug, Deserialize)]
struct PurgeQuery {
    org_id: String,
    older_than_days: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

async fn purge_queues_handler(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> ApiResult<PurgeResponse> {
    let org_id: OrgId = parse("org_id", &query.org_id)?;
    if query.older_than_days < 0 {
        return Err(ApiError::BadRequest(
            "older_than_days must not be negative".into(),
        ));
    }
    let cutoff = Utc::now() - Duration::days(query.older_than_days);
    let purged = state.orchestrator.purge_finished_queues(&org_id, cutoff)?;
    Ok(Json(PurgeResponse { purged }))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SyncProgress> {
    let queue_id: QueueId = parse("queue id", &id)?;
    Ok(Json(state.orchestrator.get_status(&queue_id)?))
}

async fn process_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SyncProgress> {
    let queue_id: QueueId = parse("queue id", &id)?;
    Ok(Json(state.orchestrator.process_queue(&queue_id).await?))
}

async fn retry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SyncProgress> {
    let queue_id: QueueId = parse("queue id", &id)?;
    Ok(Json(state.orchestrator.retry_failed(&queue_id).await?))
}

async fn force_done_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SyncProgress> {
    let queue_id: QueueId = parse("queue id", &id)?;
    Ok(Json(state.orchestrator.force_done(&queue_id).await?))
}

async fn check_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SyncProgress> {
    let queue_id: QueueId = parse("queue id", &id)?;
    Ok(Json(state.orchestrator.check_queue_action_required(&queue_id)?))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn activity_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ActivityEntry>> {
    let queue_id: QueueId = parse("queue id", &id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.orchestrator.get_activity_log(&queue_id, limit)?))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    org_id: String,
    system: String,
    entity_type: String,
    direction: String,
    #[serde(default)]
    force_refresh: bool,
}

async fn preview_handler(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<PreviewResult> {
    let org_id: OrgId = parse("org_id", &query.org_id)?;
    let system: ExternalSystem = parse("system", &query.system)?;
    let entity_type: EntityType = parse("entity_type", &query.entity_type)?;
    let direction: Direction = parse("direction", &query.direction)?;
    let preview = state
        .orchestrator
        .get_preview_snapshot(org_id, system, entity_type, direction, query.force_refresh)
        .await?;
    Ok(Json(preview))
}

#[derive(Debug, Deserialize)]
struct InvalidateQuery {
    org_id: String,
    system: Option<String>,
    entity_type: Option<String>,
    direction: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

async fn invalidate_preview_handler(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> ApiResult<InvalidateResponse> {
    let org_id: OrgId = parse("org_id", &query.org_id)?;
    let system = parse_opt("system", query.system.as_deref())?;
    let entity_type = parse_opt("entity_type", query.entity_type.as_deref())?;
    let direction = parse_opt("direction", query.direction.as_deref())?;
    let removed = state
        .orchestrator
        .invalidate_preview_cache(&org_id, system, entity_type, direction)?;
    Ok(Json(InvalidateResponse { removed }))
}
