//! HTTP API.
//!
//! A thin JSON surface over [`Library`] and [`SessionStore`], for browser
//! front-ends.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Liveness message |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/upload` | Multipart upload; files are indexed in the background |
//! | `POST`   | `/chat` | One chat turn: `{message, session_id?}` |
//! | `GET`    | `/documents` | Indexed file statistics |
//! | `DELETE` | `/documents/{filename}` | Remove a document everywhere |
//! | `GET`    | `/chat/history/{session_id}` | Turns of a session |
//! | `DELETE` | `/chat/history/{session_id}` | Forget a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no indexed document named 'x.txt'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400), `not_found` (404),
//! `chat_failed` (500), and the [`FolioError::code`] of library failures.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::FolioError;
use crate::llm::create_generator;
use crate::scan::{is_supported, SUPPORTED_EXTENSIONS};
use crate::sessions::{ChatReply, HistoryEntry, SessionStore};
use crate::sync::{Library, LibraryStats};

/// Largest accepted upload request body.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    library: Arc<Library>,
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(library: Arc<Library>, sessions: Arc<SessionStore>) -> Self {
        Self { library, sessions }
    }
}

/// Build the providers, open the library and serve until Ctrl-C / SIGTERM.
/// The index is persisted once more on the way out.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let library = Arc::new(Library::open(config, embedder).await?);
    let sessions = Arc::new(SessionStore::new(
        library.retriever(generator, config.retrieval.params()),
    ));

    let app = router(
        AppState::new(Arc::clone(&library), sessions),
        &config.server.allowed_origins,
    )?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("Folio listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    library.flush().await?;
    tracing::info!("index flushed; server stopped");
    Ok(())
}

/// The API router with CORS applied. An empty `allowed_origins` allows any origin.
pub fn router(state: AppState, allowed_origins: &[String]) -> anyhow::Result<Router> {
    let origins = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed = allowed_origins
            .iter()
            .map(|o| HeaderValue::from_str(o))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("invalid server.allowed_origins entry: {}", e))?;
        AllowOrigin::list(parsed)
    };
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/chat", post(handle_chat))
        .route("/documents", get(handle_documents))
        .route("/documents/{*filename}", axum::routing::delete(handle_delete))
        .route(
            "/chat/history/{session_id}",
            get(handle_history).delete(handle_clear_history),
        )
        .layer(cors)
        .with_state(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
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

impl From<FolioError> for AppError {
    fn from(err: FolioError) -> Self {
        let status = match &err {
            FolioError::NotFound(_) => StatusCode::NOT_FOUND,
            FolioError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            FolioError::LoadFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Paths and provider responses stay in the log.
        let message = match &err {
            FolioError::NotFound(_) | FolioError::UnsupportedFormat(_) => err.to_string(),
            FolioError::LoadFailure { .. } => "the document could not be read".to_string(),
            FolioError::IndexFailure(_) => "updating the index failed".to_string(),
            FolioError::PersistenceFailure(_) => "saving library state failed".to_string(),
            FolioError::Io(_) => "a filesystem operation failed".to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, "request rejected");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
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

// ============ GET / and /health ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Folio document chat API".to_string(),
    })
}

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

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    files_processed: usize,
    files: Vec<String>,
}

/// Save every file part into the watched root as `<uuid>_<name>`, then
/// index them in a background task. Nothing is kept if any part has an
/// unsupported extension or cannot be written.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut parts: Vec<(String, axum::body::Bytes)> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let Some(original) = field.file_name().map(str::to_string) else {
            continue;
        };
        // Keep only the final path component.
        let name = std::path::Path::new(&original)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return Err(bad_request("uploaded file has no name"));
        }
        if !is_supported(&name) {
            return Err(FolioError::UnsupportedFormat(format!(
                "{} (allowed: {})",
                name,
                SUPPORTED_EXTENSIONS.join(", ")
            ))
            .into());
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        parts.push((name, bytes));
    }

    if parts.is_empty() {
        return Err(bad_request("no files in upload"));
    }

    let mut saved_names = Vec::with_capacity(parts.len());
    let mut saved_paths: Vec<PathBuf> = Vec::with_capacity(parts.len());
    for (name, bytes) in parts {
        let saved = format!("{}_{}", Uuid::new_v4().simple(), name);
        let path = state.library.root().join(&saved);
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            saved_paths.push(path);
            remove_saved(&saved_paths).await;
            return Err(FolioError::Io(e).into());
        }
        saved_names.push(saved);
        saved_paths.push(path);
    }

    let library = Arc::clone(&state.library);
    tokio::spawn(async move {
        match library.ingest_files(&saved_paths).await {
            Ok(summary) => tracing::info!(
                processed = summary.files_processed,
                skipped = summary.skipped.len(),
                "background ingest complete"
            ),
            Err(e) => tracing::error!(error = %e, "background ingest failed"),
        }
    });

    Ok(Json(UploadResponse {
        message: format!("{} file(s) uploaded and queued for processing", saved_names.len()),
        files_processed: saved_names.len(),
        files: saved_names,
    }))
}

async fn remove_saved(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove partial upload"),
        }
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let reply = state
        .sessions
        .chat(req.session_id, &req.message)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "chat failed");
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "chat_failed".to_string(),
                message: "the assistant could not produce an answer".to_string(),
            }
        })?;
    Ok(Json(reply))
}

// ============ /documents ============

async fn handle_documents(State(state): State<AppState>) -> Result<Json<LibraryStats>, AppError> {
    Ok(Json(state.library.stats().await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
    path: String,
    chunks_removed: usize,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let outcome = state.library.delete(&filename).await?;
    Ok(Json(DeleteResponse {
        message: format!("Document {} deleted", outcome.path),
        path: outcome.path,
        chunks_removed: outcome.chunks_removed,
    }))
}

// ============ /chat/history ============

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    history: Vec<HistoryEntry>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let history = state
        .sessions
        .history(&session_id)
        .await
        .ok_or_else(|| not_found(format!("unknown session: {}", session_id)))?;
    Ok(Json(HistoryResponse {
        session_id,
        history,
    }))
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    if !state.sessions.clear(&session_id).await {
        return Err(not_found(format!("unknown session: {}", session_id)));
    }
    Ok(Json(MessageResponse {
        message: format!("Chat history cleared for session {}", session_id),
    }))
}
