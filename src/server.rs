//! HTTP server for the assistant.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/chat` | Run one chat turn: `{session_id?, message}` → response |
//! | `GET`  | `/kb/stats` | Knowledge base statistics |
//! | `GET`  | `/kb/documents/{id}` | Fetch one document |
//! | `POST` | `/kb/documents` | Add a manual document: `{title, body, tags?}` |
//! | `POST` | `/speak` | Text-to-speech: `{text}` → `audio/mpeg` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 2106.12345" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `external_service` (502), `store_read` / `store_write` (500).
//!
//! Chat turns never produce an HTTP error: a failed turn is a normal
//! response with `is_error: true`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends
//! can talk to a local instance.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use penelope_core::error::TurnError;
use penelope_core::models::{Document, KbStats};

use crate::config::Config;
use crate::orchestrator::{self, Assistant};
use crate::session::{SessionManager, DEFAULT_SESSION};
use crate::sqlite_store::SqliteStore;

#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
}

impl AppState {
    fn assistant(&self) -> &Arc<Assistant> {
        self.sessions.assistant()
    }
}

/// Build the router over an existing session manager.
///
/// Split from [`run_server`] so tests can serve it on an ephemeral port
/// with fake collaborators.
pub fn router(sessions: Arc<SessionManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/kb/stats", get(handle_stats))
        .route("/kb/documents", post(handle_add_document))
        .route("/kb/documents/{id}", get(handle_get_document))
        .route("/speak", post(handle_speak))
        .layer(cors)
        .with_state(AppState { sessions })
}

/// Open the store, wire the real collaborators, and serve on `[server].bind`
/// until Ctrl-C. The store is closed on the way out.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let assistant = Assistant::from_config(config, store.clone())?;
    let sessions = Arc::new(SessionManager::new(Arc::new(assistant)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("Penelope listening on http://{}", config.server.bind);

    axum::serve(listener, router(sessions))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("server shutting down");
    store.close().await;
    Ok(())
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

impl From<TurnError> for AppError {
    fn from(err: TurnError) -> Self {
        let status = match err.code() {
            "timeout" => StatusCode::REQUEST_TIMEOUT,
            "external_service" => StatusCode::BAD_GATEWAY,
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(code = err.code(), error = %err, "request failed");
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
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

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: Option<String>,
    message: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Json<orchestrator::Response> {
    let session = req
        .session_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_SESSION);
    Json(state.sessions.handle(session, &req.message).await)
}

// ============ /kb ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<KbStats>, AppError> {
    let stats = state
        .assistant()
        .store()
        .stats()
        .await
        .map_err(|e| TurnError::StoreRead(e.to_string()))?;
    Ok(Json(stats))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let doc = state
        .assistant()
        .store()
        .get(&id)
        .await
        .map_err(|e| TurnError::StoreRead(e.to_string()))?;
    doc.map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

#[derive(Deserialize)]
struct AddDocumentRequest {
    title: String,
    body: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn handle_add_document(
    State(state): State<AppState>,
    Json(req): Json<AddDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let title = req.title.trim();
    let body = req.body.trim();
    if title.is_empty() || body.is_empty() {
        return Err(bad_request("title and body must not be empty"));
    }
    let tags: BTreeSet<String> = req
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let store = state.assistant().store();
    let doc = Document::manual(title, body, tags, chrono::Utc::now().timestamp());
    store
        .put(&doc)
        .await
        .map_err(|e| TurnError::StoreWrite(e.to_string()))?;
    info!(id = %doc.id, "manual document added over HTTP");

    // re-read so a repeated upload reports the original created_at
    let stored = store
        .get(&doc.id)
        .await
        .map_err(|e| TurnError::StoreRead(e.to_string()))?
        .unwrap_or(doc);
    Ok((StatusCode::CREATED, Json(stored)))
}

// ============ POST /speak ============

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

async fn handle_speak(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Response, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let audio = state.assistant().pipeline().speak(&req.text).await?;
    Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}
