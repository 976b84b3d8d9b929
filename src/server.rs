//! JSON HTTP API.
//!
//! Thin axum layer over [`AnnotationService`]: each handler decodes its
//! request, calls one service method and returns the JSON result.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/api/upload?filename=NAME` | Upload a PDF (raw body) |
//! | `GET`    | `/api/pdf/{filename}` | Stored upload, by stored filename |
//! | `POST`   | `/api/documents` | Import pre-extracted page layouts |
//! | `GET`    | `/api/documents` | List documents |
//! | `DELETE` | `/api/documents/{id}` | Delete a document |
//! | `GET`    | `/api/blocks/{document_id}` | Current snapshot |
//! | `GET`    | `/api/sentences/{document_id}` | Sentences with labels |
//! | `POST`   | `/api/activate-block` | Activate or deactivate a block |
//! | `POST`   | `/api/toggle-sentence-starter` | Flip a word's starter flag |
//! | `POST`   | `/api/renumber` | Recompute sentence numbers |
//! | `POST`   | `/api/process-text` | Label all sentences |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "conflicting update: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `extraction_failed` (422), `upstream` (502), `internal` (500).

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AnnotateError;
use crate::models::{
    ActivateRequest, ActivationOutcome, DocumentRequest, DocumentSummary, ImportLayoutRequest,
    LabelsResponse, SentencesResponse, Snapshot, ToggleRequest,
};
use crate::service::AnnotationService;

pub type AppState = Arc<AnnotationService>;

/// Build the router. Split out from [`serve`] so tests can drive it with
/// `tower::ServiceExt::oneshot`.
pub fn create_router(service: AppState) -> Router {
    let upload_limit = service.config().server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/upload", post(handle_upload))
        .route("/api/pdf/{filename}", get(handle_get_pdf))
        .route(
            "/api/documents",
            get(handle_list_documents).post(handle_import_layout),
        )
        .route("/api/documents/{id}", delete(handle_delete_document))
        .route("/api/blocks/{document_id}", get(handle_get_blocks))
        .route("/api/sentences/{document_id}", get(handle_get_sentences))
        .route("/api/activate-block", post(handle_activate_block))
        .route(
            "/api/toggle-sentence-starter",
            post(handle_toggle_sentence_starter),
        )
        .route("/api/renumber", post(handle_renumber))
        .route("/api/process-text", post(handle_process_text))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(service: AppState) -> anyhow::Result<()> {
    let bind_addr = service.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Annotation server listening on http://{}", bind_addr);
    serve(listener, service).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, service: AppState) -> anyhow::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "serving annotation API");
    axum::serve(listener, create_router(service)).await?;
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

pub struct AppError {
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

impl From<AnnotateError> for AppError {
    fn from(err: AnnotateError) -> Self {
        let (status, code) = match &err {
            AnnotateError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AnnotateError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AnnotateError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AnnotateError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream"),
            AnnotateError::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
            AnnotateError::Invariant(_) | AnnotateError::Storage(_) | AnnotateError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        } else {
            tracing::debug!(error = %err, "request rejected");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Handlers ============

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

#[derive(Deserialize)]
struct UploadQuery {
    filename: Option<String>,
}

async fn handle_upload(
    State(service): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<DocumentSummary> {
    let filename = query
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(bad_request("only PDF uploads are accepted"));
    }
    let summary = service.import_pdf(&filename, body.to_vec()).await?;
    Ok(Json(summary))
}

async fn handle_get_pdf(
    State(service): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let bytes = service.read_upload(&filename).await?;
    Ok(([(header::CONTENT_TYPE, crate::extract::MIME_PDF)], bytes).into_response())
}

async fn handle_import_layout(
    State(service): State<AppState>,
    payload: Result<Json<ImportLayoutRequest>, JsonRejection>,
) -> ApiResult<DocumentSummary> {
    let Json(request) = payload?;
    let summary = service
        .import_layout(&request.filename, &request.pages)
        .await?;
    Ok(Json(summary))
}

async fn handle_list_documents(State(service): State<AppState>) -> ApiResult<Vec<DocumentSummary>> {
    Ok(Json(service.list_documents().await?))
}

async fn handle_delete_document(
    State(service): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    service.delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_get_blocks(
    State(service): State<AppState>,
    Path(document_id): Path<i64>,
) -> ApiResult<Snapshot> {
    Ok(Json(service.get_blocks(document_id).await?))
}

async fn handle_get_sentences(
    State(service): State<AppState>,
    Path(document_id): Path<i64>,
) -> ApiResult<SentencesResponse> {
    Ok(Json(service.get_sentences(document_id).await?))
}

async fn handle_activate_block(
    State(service): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> ApiResult<ActivationOutcome> {
    let Json(request) = payload?;
    let outcome = service
        .activate_block(request.document_id, &request.block, request.is_activating)
        .await?;
    Ok(Json(outcome))
}

async fn handle_toggle_sentence_starter(
    State(service): State<AppState>,
    payload: Result<Json<ToggleRequest>, JsonRejection>,
) -> ApiResult<Snapshot> {
    let Json(request) = payload?;
    let snapshot = service
        .toggle_sentence_starter(request.document_id, &request.block, request.word_number)
        .await?;
    Ok(Json(snapshot))
}

async fn handle_renumber(
    State(service): State<AppState>,
    payload: Result<Json<DocumentRequest>, JsonRejection>,
) -> ApiResult<Snapshot> {
    let Json(request) = payload?;
    Ok(Json(service.renumber(request.document_id).await?))
}

async fn handle_process_text(
    State(service): State<AppState>,
    payload: Result<Json<DocumentRequest>, JsonRejection>,
) -> ApiResult<LabelsResponse> {
    let Json(request) = payload?;
    Ok(Json(service.process_labels(request.document_id).await?))
}
