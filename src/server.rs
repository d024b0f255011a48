//! HTTP surface for the CRM collaborator.
//!
//! | Method | Path                  | Body                                  |
//! |--------|-----------------------|---------------------------------------|
//! | GET    | `/health`             | -                                     |
//! | POST   | `/extract-sow`        | multipart, `file` field               |
//! | POST   | `/extract-sow/base64` | JSON `{filename, file_content}`       |
//!
//! Both extraction routes accept `?sync=true`. Success returns the
//! [`ExtractionResult`] JSON; any failure returns
//! `{status: "failed", error, category, stage}` with a status code chosen
//! from the error category. Extractor rejections (bad JSON, bad query,
//! malformed multipart, oversized body) use the same body with category
//! `input`.

use crate::error::{ErrorCategory, PipelineFailure, SowError};
use crate::orchestrator::{SowExtractor, Stage};
use crate::output::ExtractionResult;
use crate::pipeline::input::{has_pdf_extension, Document};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body. Base64 payloads are a third larger than
/// the PDF they carry.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const SERVICE_NAME: &str = "SOW AI Extraction";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<SowExtractor>,
}

impl AppState {
    pub fn new(extractor: Arc<SowExtractor>) -> Self {
        Self { extractor }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExtractQuery {
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Deserialize)]
pub struct Base64Request {
    pub filename: String,
    pub file_content: String,
}

/// A failed request, rendered as the failure body.
#[derive(Debug)]
pub struct ApiError(pub PipelineFailure);

impl ApiError {
    fn rejected(error: &SowError) -> Self {
        Self(PipelineFailure::new(Stage::Ingested, error))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self(PipelineFailure {
            stage: Stage::Ingested,
            category: ErrorCategory::Input,
            message: message.into(),
        })
    }

    pub fn status_code(&self) -> StatusCode {
        match self.0.category {
            ErrorCategory::Input => StatusCode::BAD_REQUEST,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::Oracle => StatusCode::BAD_GATEWAY,
            ErrorCategory::Config | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineFailure> for ApiError {
    fn from(failure: PipelineFailure) -> Self {
        Self(failure)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(format!("invalid query string: {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(format!("invalid multipart request: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "status": "failed",
            "error": self.0.message,
            "category": self.0.category,
            "stage": self.0.stage,
        }));
        (status, body).into_response()
    }
}

/// Build the router with CORS, request tracing and the body limit applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract-sow", post(extract_upload))
        .route("/extract-sow/base64", post(extract_base64))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), SowError> {
    let app = build_router(state);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SowError::Internal(format!("Failed to bind to {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SowError::Internal(format!("HTTP server error: {e}")))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn extract_upload(
    State(state): State<AppState>,
    query: Result<Query<ExtractQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let Query(query) = query?;
    let mut multipart = multipart?;
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("reading upload: {e}")))?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request("missing multipart field 'file'"));
    };
    let doc = accept(&filename, || Document::from_bytes(filename.clone(), bytes.to_vec()))?;
    run(&state, doc, query.sync).await
}

async fn extract_base64(
    State(state): State<AppState>,
    query: Result<Query<ExtractQuery>, QueryRejection>,
    request: Result<Json<Base64Request>, JsonRejection>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let Query(query) = query?;
    let Json(request) = request?;
    let doc = accept(&request.filename, || {
        Document::from_base64(request.filename.clone(), &request.file_content)
    })?;
    run(&state, doc, query.sync).await
}

/// Reject non-PDF names before decoding anything.
fn accept(
    filename: &str,
    decode: impl FnOnce() -> Result<Document, SowError>,
) -> Result<Document, ApiError> {
    if !has_pdf_extension(filename) {
        let err = SowError::UnsupportedFileType {
            filename: filename.to_string(),
        };
        warn!("Rejected upload: {}", err);
        return Err(ApiError::rejected(&err));
    }
    decode().map_err(|e| {
        warn!("Rejected upload '{}': {}", filename, e);
        ApiError::rejected(&e)
    })
}

async fn run(state: &AppState, doc: Document, sync: bool) -> Result<Json<ExtractionResult>, ApiError> {
    let result = state.extractor.run(doc, sync).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_category() {
        let timeout = ApiError(PipelineFailure {
            stage: Stage::Structured,
            category: ErrorCategory::Timeout,
            message: "slow".into(),
        });
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::bad_request("nope").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn non_pdf_names_are_rejected_before_decoding() {
        let err = accept("contract.docx", || unreachable!()).unwrap_err();
        assert_eq!(err.0.category, ErrorCategory::Input);
        assert!(err.0.message.contains("contract.docx"));
    }
}
