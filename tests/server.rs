//! HTTP API tests driven through the router without binding a socket.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use rag_agent::config::Config;
use rag_agent::embedding::Embedder;
use rag_agent::llm::CompletionProvider;
use rag_agent::models::PromptMessage;
use rag_agent::server::router;
use rag_agent::service::RagService;
use rag_agent::store::{DistanceMetric, MemoryStore};

struct ConstantEmbedder;

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct FixedLlm;

#[async_trait]
impl CompletionProvider for FixedLlm {
    fn model_name(&self) -> &str {
        "fixed"
    }
    async fn complete(&self, _messages: &[PromptMessage], _max_tokens: u32) -> anyhow::Result<String> {
        Ok("fixed answer".to_string())
    }
}

/// Single-page PDF showing `phrase`.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn app(docs: &TempDir) -> axum::Router {
    let mut config = Config::default();
    config.documents.dir = docs.path().to_path_buf();
    let store = Arc::new(MemoryStore::new(
        "pdf_documents",
        Arc::new(ConstantEmbedder),
        DistanceMetric::L2,
    ));
    router(Arc::new(RagService::new(config, store, Arc::new(FixedLlm))))
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_session(app: &axum::Router) -> String {
    let (status, body) = send(app, "POST", "/api/session/create", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_version() {
    let docs = TempDir::new().unwrap();
    let (status, body) = send(&app(&docs), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_without_documents_reports_no_context() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);
    let session_id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": session_id, "query": "What is covered?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["context_found"], false);
    assert_eq!(body["sources"], json!([]));

    let (status, body) = send(&app, "GET", &format!("/api/history/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[0]["content"], "What is covered?");
    assert_eq!(history[1]["role"], "assistant");
}

#[tokio::test]
async fn chat_without_rag_uses_model() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);
    let session_id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": session_id, "query": "hello", "use_rag": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "fixed answer");
    assert_eq!(body["context_found"], true);
}

#[tokio::test]
async fn unknown_session_is_404() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);

    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": "nope", "query": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "session_not_found");

    let (status, _) = send(
        &app,
        "POST",
        "/api/session/clear",
        Some(json!({ "session_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_fields_are_400() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);
    let session_id = create_session(&app).await;

    let (status, body) = send(&app, "POST", "/api/chat", Some(json!({ "session_id": session_id }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = send(&app, "POST", "/api/chat", Some(json!({ "query": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/api/session/end", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clear_and_end_session() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);
    let session_id = create_session(&app).await;
    send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({ "session_id": session_id, "query": "hello", "use_rag": false })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/session/clear",
        Some(json!({ "session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app, "GET", &format!("/api/history/{}", session_id), None).await;
    assert_eq!(body["history"], json!([]));

    for _ in 0..2 {
        let (status, body) = send(
            &app,
            "POST",
            "/api/session/end",
            Some(json!({ "session_id": session_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }
}

#[tokio::test]
async fn stats_report_sessions_and_config() {
    let docs = TempDir::new().unwrap();
    let app = app(&docs);
    create_session(&app).await;
    create_session(&app).await;

    let (status, body) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_sessions"], 2);
    assert_eq!(body["indexed_documents"], 0);
    assert_eq!(body["config"]["model"], "gpt-3.5-turbo");
    assert_eq!(body["config"]["chunk_size"], 800);
    assert_eq!(body["config"]["top_k"], 4);
}

#[tokio::test]
async fn reindex_without_pdfs_is_400() {
    let docs = TempDir::new().unwrap();
    let (status, body) = send(&app(&docs), "POST", "/api/reindex", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "ingestion_error");
}

#[tokio::test]
async fn reindex_indexes_readable_pdfs() {
    let docs = TempDir::new().unwrap();
    std::fs::write(docs.path().join("spec.pdf"), minimal_pdf_with_phrase("reindex phrase")).unwrap();
    std::fs::write(docs.path().join("bad.pdf"), b"not a valid pdf").unwrap();
    let app = app(&docs);

    let (status, body) = send(&app, "POST", "/api/reindex", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["documents_indexed"], 1);
    assert_eq!(body["files_failed"], 1);

    let (_, body) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(body["indexed_documents"], 1);
}

#[tokio::test]
async fn reindex_of_unreadable_pdfs_is_400_and_keeps_index() {
    let docs = TempDir::new().unwrap();
    let good = docs.path().join("spec.pdf");
    std::fs::write(&good, minimal_pdf_with_phrase("reindex phrase")).unwrap();
    let app = app(&docs);
    let (status, _) = send(&app, "POST", "/api/reindex", None).await;
    assert_eq!(status, StatusCode::OK);

    std::fs::remove_file(&good).unwrap();
    std::fs::write(docs.path().join("bad.pdf"), b"not a valid pdf").unwrap();
    let (status, body) = send(&app, "POST", "/api/reindex", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "ingestion_error");

    let (_, body) = send(&app, "GET", "/api/stats", None).await;
    assert_eq!(body["indexed_documents"], 1);
}
