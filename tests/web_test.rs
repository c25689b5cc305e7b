//! Drives the web router in-process over a temporary on-disk store.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{BrokenEmbedder, KeywordEmbedder, COLLECTION, TWO_SECTIONS};
use md_rag::config::{Config, StoreKind};
use md_rag::database::LocalStore;
use md_rag::embeddings::Embedder;
use md_rag::rag::RagEngine;
use md_rag::web::{app_router, AppState};
use std::path::Path;
use tower::ServiceExt;

const BOUNDARY: &str = "md-rag-test-boundary";

fn test_config(dir: &Path) -> Config {
    Config {
        db_path: dir.join("db"),
        collection: COLLECTION.to_string(),
        model_id: "keyword".to_string(),
        store: StoreKind::Local,
        qdrant: None,
        chunks_file: dir.join("chunks.txt"),
        document_path: dir.join("PLAN.md"),
        bind: "127.0.0.1:0".to_string(),
    }
}

fn app_with<E: Embedder + 'static>(embedder: E, dir: &Path) -> Router {
    let config = test_config(dir);
    let engine = RagEngine::new(embedder, LocalStore::new(&config.db_path), COLLECTION);
    app_router(AppState::new(engine, config))
}

fn app(dir: &Path) -> Router {
    app_with(KeywordEmbedder::new(), dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::post(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, form: &str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

/// Multipart upload; `file` is `(file name, content)`
fn post_upload(file: Option<(&str, &str)>, method: &str) -> Request<Body> {
    let mut body = String::new();
    if let Some((file_name, content)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"method\"\r\n\r\n{method}\r\n--{BOUNDARY}--\r\n"
    ));

    Request::post("/build")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(&app(dir.path()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""status":"ok""#));
}

#[tokio::test]
async fn test_index_before_build() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(&app(dir.path()), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("No vector database found"));
    assert!(!page.contains(r#"action="/query""#));
}

#[tokio::test]
async fn test_query_before_build_shows_banner() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(&app(dir.path()), post_form("/query", "question=one&k=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("No vector database found. Upload a document first."));
}

#[tokio::test]
async fn test_upload_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, page) = send(&app, post_upload(Some(("guide.md", TWO_SECTIONS)), "headings")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("guide.md split into 2 chunks (headings); vector database built"));
    assert!(page.contains("Vector database loaded"));

    let chunks = std::fs::read_to_string(dir.path().join("chunks.txt")).unwrap();
    assert!(chunks.contains("\n---\n"));

    let (status, page) = send(&app, post_form("/query", "question=one&k=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Found 1 relevant chunks:"));
    assert!(page.contains("text one here please"));
    assert!(!page.contains("Result 2"));
    assert!(page.contains(r#"<option value="1" selected>1</option>"#));
}

#[tokio::test]
async fn test_upload_without_file_shows_error() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(&app(dir.path()), post_upload(None, "headings")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(r#"<p class="notice error">Choose a markdown file to upload</p>"#));
    assert!(page.contains("No vector database found"));
}

#[tokio::test]
async fn test_upload_of_binary_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(
        &app(dir.path()),
        post_upload(Some(("photo.png", "not really a png")), "headings"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("unsupported document format"));
    assert!(page.contains("No vector database found"));
}

#[tokio::test]
async fn test_unknown_method_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(
        &app(dir.path()),
        post_upload(Some(("guide.md", TWO_SECTIONS)), "sentences"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(r#"class="notice error""#));
    assert!(page.contains("No vector database found"));
}

#[tokio::test]
async fn test_build_default_document() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PLAN.md"), TWO_SECTIONS).unwrap();
    let app = app(dir.path());

    let (_, page) = send(&app, get("/")).await;
    assert!(page.contains("/build/default"));

    let (status, page) = send(&app, post_empty("/build/default")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("PLAN.md split into 2 chunks (headings); vector database built"));
    assert!(page.contains("Vector database loaded"));
}

#[tokio::test]
async fn test_build_default_without_document() {
    let dir = tempfile::tempdir().unwrap();
    let (status, page) = send(&app(dir.path()), post_empty("/build/default")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains(r#"<p class="notice error">Error: document error"#));
}

#[tokio::test]
async fn test_invalid_result_count_shows_banner() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    send(&app, post_upload(Some(("guide.md", TWO_SECTIONS)), "headings")).await;

    let (status, page) = send(&app, post_form("/query", "question=one&k=many")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Invalid number of results: many"));
    assert!(!page.contains("Result 1"));
}

#[tokio::test]
async fn test_blank_question_shows_warning() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    send(&app, post_upload(Some(("guide.md", TWO_SECTIONS)), "headings")).await;

    let (status, page) = send(&app, post_form("/query", "question=+&k=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Please enter a question."));
}

#[tokio::test]
async fn test_model_failure_still_renders_page() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(BrokenEmbedder, dir.path());

    let (status, page) = send(&app, post_upload(Some(("guide.md", TWO_SECTIONS)), "headings")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("Error processing document: embedding model unavailable"));
    assert!(page.contains("No vector database found"));
}
