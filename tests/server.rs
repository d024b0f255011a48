//! HTTP layer tests, driven in-process with `tower::ServiceExt::oneshot`.

#![cfg(feature = "server")]

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sow_extract::model::PageBlock;
use sow_extract::server::{build_router, AppState};
use sow_extract::{SowExtractor, StaticPages};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(pages: Vec<PageBlock>) -> Router {
    let extractor = SowExtractor::new(
        fast_config(),
        Arc::new(ScriptedOracle::sow()),
        Arc::new(StaticPages(pages)),
    );
    build_router(AppState::new(Arc::new(extractor)))
}

fn app() -> Router {
    app_with(sow_pages())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn base64_request(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let body = json!({ "filename": filename, "file_content": STANDARD.encode(content) });
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    multipart_request_to("/extract-sow", field, filename, content)
}

fn multipart_request_to(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "sow-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_reports_service_and_version() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "SOW AI Extraction");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn base64_upload_returns_extraction_result() {
    let request = base64_request("/extract-sow/base64", "acme.pdf", FAKE_PDF);
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_terms"].as_array().unwrap().len(), 1);
    assert_eq!(body["payment_terms"][0]["amount"], "$5,000");
    assert_eq!(body["metadata"]["sync_status"], "not_requested");
}

#[tokio::test]
async fn multipart_upload_returns_extraction_result() {
    let (status, body) = send(app(), multipart_request("file", "acme.PDF", FAKE_PDF)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["milestones"][0]["name"], "Kickoff");
}

#[tokio::test]
async fn non_pdf_filename_is_rejected() {
    let (status, body) = send(app(), multipart_request("file", "notes.docx", FAKE_PDF)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["category"], "input");
    assert_eq!(body["stage"], "ingested");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Only PDF files are supported"));
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected() {
    let request = base64_request("/extract-sow/base64", "fake.pdf", b"PK\x03\x04 zip archive");
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["category"], "input");
}

#[tokio::test]
async fn bad_base64_is_rejected() {
    let body = json!({ "filename": "acme.pdf", "file_content": "@@not base64@@" });
    let request = Request::builder()
        .method("POST")
        .uri("/extract-sow/base64")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base64"));
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let (status, body) = send(app(), multipart_request("attachment", "acme.pdf", FAKE_PDF)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
}

#[tokio::test]
async fn pipeline_failure_maps_to_error_body() {
    let app = app_with(vec![PageBlock::unreadable(0)]);
    let request = base64_request("/extract-sow/base64", "scan.pdf", FAKE_PDF);
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["stage"], "extracted");
    assert_eq!(body["category"], "input");
}

#[tokio::test]
async fn sync_query_without_sink_is_skipped() {
    let request = base64_request("/extract-sow/base64?sync=true", "acme.pdf", FAKE_PDF);
    let (status, body) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["sync_status"], "skipped");
}

#[tokio::test]
async fn failed_sync_is_reported_with_success_status() {
    let extractor = SowExtractor::new(
        fast_config(),
        Arc::new(ScriptedOracle::sow()),
        Arc::new(StaticPages(sow_pages())),
    )
    .with_sink(Arc::new(RejectingSink::default()));
    let app = build_router(AppState::new(Arc::new(extractor)));

    let request = base64_request("/extract-sow/base64?sync=true", "acme.pdf", FAKE_PDF);
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["sync_status"], "failed");
    assert_eq!(body["metadata"]["milestones_synced"], 0);
    let errors = body["metadata"]["sync_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["milestone"], "Kickoff");
    assert!(errors[0]["error"].as_str().unwrap().contains("503"));
}

/// Extractor rejections come back as the JSON failure body, not plain text.
async fn assert_json_rejection(request: Request<Body>, needle: &str) {
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/json"), "got {content_type}");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["category"], "input");
    assert_eq!(body["stage"], "ingested");
    let error = body["error"].as_str().unwrap();
    assert!(error.contains(needle), "{error}");
}

#[tokio::test]
async fn missing_file_content_is_a_json_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/extract-sow/base64")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"filename":"a.pdf"}"#))
        .unwrap();
    assert_json_rejection(request, "file_content").await;
}

#[tokio::test]
async fn malformed_json_is_a_json_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/extract-sow/base64")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    assert_json_rejection(request, "invalid JSON body").await;
}

#[tokio::test]
async fn invalid_sync_flag_is_a_json_error() {
    let request = base64_request("/extract-sow/base64?sync=maybe", "acme.pdf", FAKE_PDF);
    assert_json_rejection(request, "invalid query string").await;

    let request = multipart_request_to("/extract-sow?sync=maybe", "file", "acme.pdf", FAKE_PDF);
    assert_json_rejection(request, "invalid query string").await;
}

#[tokio::test]
async fn upload_without_multipart_content_type_is_a_json_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/extract-sow")
        .header("content-type", "application/pdf")
        .body(Body::from(FAKE_PDF))
        .unwrap();
    assert_json_rejection(request, "invalid multipart request").await;
}
