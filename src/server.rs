//! HTTP surface.
//!
//! A small JSON API over [`Relay`] for writers, searchers and operators.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/events` | Save a record (enriched and indexed) |
//! | `GET`    | `/events/{id}` | Fetch one record from the primary store |
//! | `DELETE` | `/events/{id}` | Delete a record from both stores |
//! | `POST`   | `/query` | Run a filter (with optional `search`) |
//! | `POST`   | `/admin/reset-search-index` | Start a background rebuild |
//! | `GET`    | `/admin/indexing-status` | Poll the rebuild job |
//! | `GET`    | `/admin/inspect-search` | Show how a search compiles and what the index returns |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "indexing already in progress" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use relay_search_core::models::{Filter, Record};

use crate::config::Config;
use crate::error::ReindexError;
use crate::get::{get_record, RecordResponse};
use crate::reindex::ReindexStatus;
use crate::relay::{Inspection, Relay};

const DEFAULT_INSPECT_LIMIT: usize = 20;

/// Shared state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
}

/// Opens the relay and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let relay = Arc::new(Relay::open(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "relay search listening");
    println!("Relay search listening on http://{}", bind_addr);

    axum::serve(listener, router(relay)).await?;
    Ok(())
}

/// Builds the router over an already opened relay.
pub fn router(relay: Arc<Relay>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/events", post(handle_save))
        .route("/events/{id}", get(handle_get).delete(handle_delete))
        .route("/query", post(handle_query))
        .route("/admin/reset-search-index", post(handle_reset_index))
        .route("/admin/indexing-status", get(handle_indexing_status))
        .route("/admin/inspect-search", get(handle_inspect))
        .layer(cors)
        .with_state(AppState { relay })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"conflict"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{err:#}"), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{err:#}"),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /events ============

#[derive(Serialize)]
struct SaveResponse {
    id: String,
    saved: bool,
}

/// `POST /events`. A missing id is computed; a duplicate id is not an
/// error and reports `saved: false`.
async fn handle_save(
    State(state): State<AppState>,
    Json(mut record): Json<Record>,
) -> Result<Json<SaveResponse>, AppError> {
    if record.author.trim().is_empty() {
        return Err(bad_request("pubkey must not be empty"));
    }
    if record.id.is_empty() {
        record.id = record.compute_id();
    }
    let id = record.id.clone();
    let saved = state.relay.save_event(record).await.map_err(internal)?;
    Ok(Json(SaveResponse { id, saved }))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>, AppError> {
    match get_record(state.relay.store().as_ref(), &id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(not_found(format!("record not found: {}", id))),
        Err(e) => Err(internal(e)),
    }
}

#[derive(Serialize)]
struct DeleteResponse {
    id: String,
    deleted: bool,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.relay.delete_event(&id).await.map_err(internal)?;
    if !deleted {
        return Err(not_found(format!("record not found: {}", id)));
    }
    Ok(Json(DeleteResponse { id, deleted }))
}

// ============ POST /query ============

#[derive(Serialize)]
struct QueryResponse {
    events: Vec<Record>,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(filter): Json<Filter>,
) -> Result<Json<QueryResponse>, AppError> {
    let stream = state.relay.query(&filter).await.map_err(internal)?;
    Ok(Json(QueryResponse {
        events: stream.collect_all().await,
    }))
}

// ============ /admin ============

#[derive(Serialize)]
struct AcceptedResponse {
    status: String,
}

/// `POST /admin/reset-search-index`: 202 when admitted, 409 while a
/// rebuild is already running.
async fn handle_reset_index(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AcceptedResponse>), AppError> {
    match state.relay.start_reindex() {
        Ok(()) => {
            info!("search index rebuild accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(AcceptedResponse {
                    status: "accepted".to_string(),
                }),
            ))
        }
        Err(e @ ReindexError::AlreadyRunning) => Err(conflict(e.to_string())),
        Err(e) => Err(internal(e.into())),
    }
}

async fn handle_indexing_status(State(state): State<AppState>) -> Json<ReindexStatus> {
    Json(state.relay.indexing_status())
}

#[derive(Deserialize)]
struct InspectParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn handle_inspect(
    State(state): State<AppState>,
    Query(params): Query<InspectParams>,
) -> Result<Json<Inspection>, AppError> {
    let q = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("q must not be empty"))?;
    let limit = params.limit.unwrap_or(DEFAULT_INSPECT_LIMIT);
    state
        .relay
        .inspect(&q, limit)
        .await
        .map(Json)
        .map_err(internal)
}
