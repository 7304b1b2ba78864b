//! HTTP API.
//!
//! Every route lives under `/api/document-qa` and maps onto one
//! [`RagService`] operation. `GET /health` at the root is a cheap liveness
//! probe; `GET /api/document-qa/health` runs the full component check.
//!
//! # Endpoints
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `POST` | `/upload?filename=…` | Upload raw file bytes (`Content-Type` header names the type) |
//! | `GET` | `/documents` | List documents |
//! | `GET` | `/documents/{id}` | One document |
//! | `DELETE` | `/documents/{id}` | Delete a document and everything derived from it |
//! | `POST` | `/question` | Ask a question |
//! | `POST` | `/sessions` | Create or fetch a session |
//! | `GET` | `/sessions` | List sessions |
//! | `POST` | `/sessions/{sid}/documents/{id}` | Add a document to a session |
//! | `DELETE` | `/sessions/{sid}/documents/{id}` | Remove a document from a session |
//! | `GET` | `/sessions/{sid}/documents` | A session's documents |
//! | `POST` | `/summary` | Summarize a session (or the whole corpus) |
//! | `POST` | `/quiz` | Generate a multiple-choice quiz |
//! | `GET` | `/health` | Component health (503 unless healthy) |
//! | `GET` | `/stats` | Index, document and token statistics |
//! | `POST` | `/reset` | Delete everything |
//! | `POST` | `/source-content` | Indexed text of one file, capped |
//! | `POST` | `/expand-source` | Full indexed text of one file, highlighted |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: document 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_content_type` (400),
//! `not_found` (404), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use docqa_core::models::{
    Document, QueryResult, QuizResult, Session, SessionSummary, SummaryResult,
};
use docqa_core::RagError;

use crate::config::Config;
use crate::service::{
    ExpandedSource, HealthReport, HealthStatus, RagService, ResetReport, ResetStatus, SessionDocument,
    SourceContent, SystemStats, DEFAULT_QUIZ_QUESTIONS,
};

pub const API_PREFIX: &str = "/api/document-qa";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
}

/// Build the service from `config` and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config.clone()).await?);
    serve(service, &config.server.bind).await
}

/// Serve an already-built service on `bind`.
pub async fn serve(service: Arc<RagService>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %bind, "document QA server listening");
    println!("Document QA server listening on http://{}{}", bind, API_PREFIX);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

pub fn router(service: Arc<RagService>) -> Router {
    let max_upload = service.config().server.max_upload_mb * 1024 * 1024;
    let state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/question", post(handle_question))
        .route("/sessions", post(handle_create_session).get(handle_list_sessions))
        .route(
            "/sessions/{sid}/documents/{id}",
            post(handle_add_to_session).delete(handle_remove_from_session),
        )
        .route("/sessions/{sid}/documents", get(handle_session_documents))
        .route("/summary", post(handle_summary))
        .route("/quiz", post(handle_quiz))
        .route("/health", get(handle_deep_health))
        .route("/stats", get(handle_stats))
        .route("/reset", post(handle_reset))
        .route("/source-content", post(handle_source_content))
        .route("/expand-source", post(handle_expand_source));

    Router::new()
        .route("/health", get(handle_liveness))
        .nest(API_PREFIX, api)
        .layer(cors)
        .with_state(state)
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

/// Internal error type that converts into an Axum HTTP response.
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        match err {
            RagError::NotFound(_) => not_found(message),
            RagError::InvalidRequest(_) => bad_request(message),
            RagError::UnsupportedContentType(_) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: err.code().to_string(),
                message,
            },
            _ => {
                tracing::error!(code = err.code(), error = %message, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message,
                }
            }
        }
    }
}

fn require(value: &str, field: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(bad_request(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============ Liveness ============

#[derive(Serialize)]
struct LivenessResponse {
    status: String,
    version: String,
}

async fn handle_liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Document>, AppError> {
    require(&params.filename, "filename")?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let doc = state
        .service
        .add_document(&body, &params.filename, content_type)
        .await?;
    Ok(Json(doc))
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.service.list_documents().await)
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    Ok(Json(state.service.get_document(&id).await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
    document_id: String,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.service.delete_document(&id).await? {
        return Err(not_found(format!("document {} does not exist", id)));
    }
    Ok(Json(DeleteResponse {
        deleted: true,
        document_id: id,
    }))
}

// ============ Question answering ============

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_question(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<QueryResult>, AppError> {
    require(&req.question, "question")?;
    let result = state
        .service
        .query(&req.question, req.session_id.as_deref(), req.k)
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize, Default)]
struct ScopeRequest {
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_summary(
    State(state): State<AppState>,
    req: Option<Json<ScopeRequest>>,
) -> Result<Json<SummaryResult>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .service
            .generate_summary(req.session_id.as_deref())
            .await?,
    ))
}

#[derive(Deserialize, Default)]
struct QuizRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    num_questions: Option<usize>,
}

async fn handle_quiz(
    State(state): State<AppState>,
    req: Option<Json<QuizRequest>>,
) -> Result<Json<QuizResult>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let n = req.num_questions.unwrap_or(DEFAULT_QUIZ_QUESTIONS);
    Ok(Json(
        state
            .service
            .generate_quiz(req.session_id.as_deref(), n)
            .await?,
    ))
}

// ============ Sessions ============

async fn handle_create_session(
    State(state): State<AppState>,
    req: Option<Json<ScopeRequest>>,
) -> Result<Json<Session>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .service
            .create_session(req.session_id.as_deref())
            .await?,
    ))
}

async fn handle_list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.service.list_sessions().await)
}

async fn handle_add_to_session(
    State(state): State<AppState>,
    Path((sid, id)): Path<(String, String)>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.service.add_document_to_session(&sid, &id).await?))
}

#[derive(Serialize)]
struct SessionMembershipResponse {
    session_id: String,
    session_exists: bool,
    active_docs: Vec<String>,
}

async fn handle_remove_from_session(
    State(state): State<AppState>,
    Path((sid, id)): Path<(String, String)>,
) -> Result<Json<SessionMembershipResponse>, AppError> {
    let session_exists = state
        .service
        .remove_document_from_session(&sid, &id)
        .await?;
    let active_docs = state.service.get_session_documents(&sid).await;
    Ok(Json(SessionMembershipResponse {
        session_id: sid,
        session_exists,
        active_docs,
    }))
}

#[derive(Serialize)]
struct SessionDocumentsResponse {
    session_id: String,
    documents: Vec<SessionDocument>,
}

async fn handle_session_documents(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Json<SessionDocumentsResponse> {
    let documents = state.service.session_document_details(&sid).await;
    Json(SessionDocumentsResponse {
        session_id: sid,
        documents,
    })
}

// ============ Operations ============

async fn handle_deep_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.service.health_check().await;
    let status = if report.status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<SystemStats>, AppError> {
    Ok(Json(state.service.get_vector_store_stats().await?))
}

async fn handle_reset(State(state): State<AppState>) -> (StatusCode, Json<ResetReport>) {
    let report = state.service.reset_system().await;
    let status = match report.status {
        ResetStatus::Success => StatusCode::OK,
        ResetStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(report))
}

// ============ Sources ============

#[derive(Deserialize)]
struct SourceContentRequest {
    file_name: String,
    #[serde(default)]
    chunk_id: Option<String>,
}

async fn handle_source_content(
    State(state): State<AppState>,
    Json(req): Json<SourceContentRequest>,
) -> Result<Json<SourceContent>, AppError> {
    require(&req.file_name, "file_name")?;
    Ok(Json(
        state
            .service
            .get_source_content(&req.file_name, req.chunk_id.as_deref())
            .await?,
    ))
}

#[derive(Deserialize)]
struct ExpandSourceRequest {
    file_name: String,
    #[serde(default)]
    query: Option<String>,
}

async fn handle_expand_source(
    State(state): State<AppState>,
    Json(req): Json<ExpandSourceRequest>,
) -> Result<Json<ExpandedSource>, AppError> {
    require(&req.file_name, "file_name")?;
    Ok(Json(
        state
            .service
            .expand_source(&req.file_name, req.query.as_deref())
            .await?,
    ))
}
