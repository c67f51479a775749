//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET`  | `/status` | Store size, dimension, metric, generation chain |
//! | `POST` | `/query` | `{query, k?}` → answer with evidence |
//! | `POST` | `/ingest` | `{doc_id, content}` → chunks indexed |
//! | `POST` | `/ingest/raw/{doc_id}` | Raw request body as document content |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_query", "message": "query must not be empty" } }
//! ```
//!
//! `code` is the error kind. Validation kinds (`empty_query`,
//! `empty_document`, `binary_content`, `bad_request`) are 400,
//! `dimension_mismatch` and `incompatible_index` are 409,
//! `embedding_unavailable` is 503, and every other storage kind is 500.
//! Generation failures never produce an error response: they show up as
//! `generation_error` on an otherwise successful answer.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{IngestError, QueryError, StoreError};
use crate::ingest::IngestPipeline;
use crate::models::Answer;
use crate::rag::QueryEngine;
use crate::store::StoreStats;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub pipeline: Arc<IngestPipeline>,
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/query", post(handle_query))
        .route("/ingest", post(handle_ingest))
        .route("/ingest/raw/{doc_id}", post(handle_ingest_raw))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn from_kind(kind: &str, message: String) -> Self {
        let status = match kind {
            "empty_query" | "empty_document" | "binary_content" | "bad_request" => {
                StatusCode::BAD_REQUEST
            }
            "dimension_mismatch" | "incompatible_index" => StatusCode::CONFLICT,
            "embedding_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: kind.to_string(),
            message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        AppError::from_kind(e.kind(), e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::from_kind(e.kind(), e.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        AppError::from_kind(e.kind(), e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::from_kind("bad_request", e.body_text())
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::from_kind("internal", message.into())
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

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    store: StoreStats,
    embedding_model: String,
    generation_chain: Vec<String>,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let store = state.engine.store();
    Ok(Json(StatusResponse {
        store: store.stats().await?,
        embedding_model: store.embedder().model_name().to_string(),
        generation_chain: state.engine.router().chain(),
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(req) = payload?;
    let query = req.query.unwrap_or_default();
    let answer = state.engine.answer(&query, req.k).await?;
    Ok(Json(answer))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    doc_id: String,
    content: String,
}

#[derive(Serialize)]
struct IngestResponse {
    doc_id: String,
    chunks_indexed: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(IngestRequest { doc_id, content }) = payload?;
    if doc_id.trim().is_empty() {
        return Err(AppError::from_kind(
            "bad_request",
            "doc_id must not be empty".to_string(),
        ));
    }

    // Detached so a client disconnect cannot cancel the write half-way.
    let pipeline = state.pipeline.clone();
    let id = doc_id.clone();
    let chunks_indexed = tokio::spawn(async move { pipeline.ingest(&id, &content).await })
        .await
        .map_err(|e| internal(format!("ingest task failed: {}", e)))??;

    Ok(Json(IngestResponse {
        doc_id,
        chunks_indexed,
    }))
}

// ============ POST /ingest/raw/{doc_id} ============

async fn handle_ingest_raw(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    body: Bytes,
) -> Result<Json<IngestResponse>, AppError> {
    let pipeline = state.pipeline.clone();
    let id = doc_id.clone();
    let chunks_indexed = tokio::spawn(async move { pipeline.ingest_bytes(&id, &body).await })
        .await
        .map_err(|e| internal(format!("ingest task failed: {}", e)))??;

    Ok(Json(IngestResponse {
        doc_id,
        chunks_indexed,
    }))
}
