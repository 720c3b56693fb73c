//! HTTP API for chat sessions, retrieval-augmented answers and indexing.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/session/create` | Start a session |
//! | `POST` | `/api/session/clear` | Clear a session's history |
//! | `POST` | `/api/session/end` | Delete a session |
//! | `POST` | `/api/chat` | Answer a query within a session |
//! | `GET`  | `/api/history/{session_id}` | Chat history of a session |
//! | `GET`  | `/api/stats` | Sessions, index size and settings |
//! | `POST` | `/api/reindex` | Rebuild the index from the documents directory |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "session_not_found", "message": "session 42 not found or expired" }, "success": false }
//! ```
//!
//! Error codes: `bad_request` (400), `ingestion_error` (400),
//! `session_not_found` (404), `upstream_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::agent::QueryOptions;
use crate::error::RagError;
use crate::service::RagService;

type AppState = Arc<RagService>;

/// Build the router with all routes and CORS applied.
pub fn router(service: Arc<RagService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/session/create", post(handle_create_session))
        .route("/api/session/clear", post(handle_clear_session))
        .route("/api/session/end", post(handle_end_session))
        .route("/api/chat", post(handle_chat))
        .route("/api/history/{session_id}", get(handle_history))
        .route("/api/stats", get(handle_stats))
        .route("/api/reindex", post(handle_reindex))
        .layer(cors)
        .with_state(service)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(service: Arc<RagService>) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP server listening");
    println!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    success: bool,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
            success: false,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            RagError::Ingestion(_) => (StatusCode::BAD_REQUEST, "ingestion_error"),
            RagError::Upstream(_) => {
                tracing::error!(error = %err, "upstream failure");
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

/// A required, non-blank string field.
fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(bad_request(format!("{} is required", field))),
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

// ============ Sessions ============

#[derive(Deserialize)]
struct SessionRequest {
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_create_session(State(service): State<AppState>) -> Json<Value> {
    let session_id = service.agent().create_session();
    Json(json!({ "session_id": session_id, "success": true }))
}

async fn handle_clear_session(
    State(service): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = required(req.session_id, "session_id")?;
    service.agent().clear_session_history(&session_id)?;
    Ok(Json(json!({ "success": true, "message": "Chat history cleared" })))
}

async fn handle_end_session(
    State(service): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = required(req.session_id, "session_id")?;
    service.agent().end_session(&session_id);
    Ok(Json(json!({ "success": true })))
}

async fn handle_history(
    State(service): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let history = service.agent().session_history(&session_id);
    Json(json!({ "history": history, "success": true }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    use_rag: Option<bool>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    source: Option<String>,
}

async fn handle_chat(
    State(service): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = required(req.session_id, "session_id")?;
    let query = required(req.query, "query")?;
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let options = QueryOptions {
        use_rag: req.use_rag.unwrap_or(true),
        top_k: req.top_k,
        source_filter: req.source,
    };
    let answer = service
        .agent()
        .process_query(&session_id, query.trim(), &options)
        .await?;

    Ok(Json(json!({
        "response": answer.response,
        "sources": answer.sources,
        "context_found": answer.context_found,
        "success": true,
    })))
}

// ============ GET /api/stats ============

async fn handle_stats(State(service): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = service.stats().await?;
    Ok(Json(json!({
        "active_sessions": stats.active_sessions,
        "indexed_documents": stats.indexed_chunks,
        "collection": stats.collection,
        "config": {
            "model": stats.model,
            "temperature": stats.temperature,
            "chunk_size": stats.chunk_size,
            "top_k": stats.top_k,
        },
        "success": true,
    })))
}

// ============ POST /api/reindex ============

async fn handle_reindex(State(service): State<AppState>) -> Result<Json<Value>, AppError> {
    let report = service.reindex().await?;
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Reindexed {} chunks from {} PDF files",
            report.chunks_indexed, report.files_indexed
        ),
        "documents_indexed": report.chunks_indexed,
        "files_failed": report.files_failed,
    })))
}
