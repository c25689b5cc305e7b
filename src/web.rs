//! Browser front end: upload a document, build the index, ask questions.

use crate::chunking::{prepare_chunks, ChunkMethod};
use crate::config::Config;
use crate::database::{CollectionState, IndexStore};
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::rag::{Hit, QueryOutcome, RagEngine};
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Upper bound for uploaded documents
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_RESULTS: usize = 3;
const MAX_RESULTS: usize = 5;

pub struct AppState<E, S> {
    /// One build or query at a time
    engine: Arc<Mutex<RagEngine<E, S>>>,
    config: Arc<Config>,
}

impl<E, S> Clone for AppState<E, S> {
    fn clone(&self) -> Self {
        AppState {
            engine: Arc::clone(&self.engine),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E, S> AppState<E, S> {
    pub fn new(engine: RagEngine<E, S>, config: Config) -> Self {
        AppState {
            engine: Arc::new(Mutex::new(engine)),
            config: Arc::new(config),
        }
    }
}

pub fn app_router<E, S>(state: AppState<E, S>) -> Router
where
    E: Embedder + 'static,
    S: IndexStore + 'static,
{
    Router::new()
        .route("/", get(index::<E, S>))
        .route("/health", get(health))
        .route("/build", post(build_upload::<E, S>))
        .route("/build/default", post(build_default::<E, S>))
        .route("/query", post(query::<E, S>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn run_server<E, S>(state: AppState<E, S>) -> anyhow::Result<()>
where
    E: Embedder + 'static,
    S: IndexStore + 'static,
{
    let addr: SocketAddr = state
        .config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", state.config.bind))?;

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web UI listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoticeKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn success(message: impl Into<String>) -> Self {
        Notice {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Notice {
            kind: NoticeKind::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Notice {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

/// Everything the page needs to render
#[derive(Debug, Clone)]
pub struct PageView {
    pub built: bool,
    /// Name of the on-disk document that can be indexed with one click
    pub default_document: Option<String>,
    pub notice: Option<Notice>,
    pub question: String,
    pub k: usize,
    pub hits: Vec<Hit>,
}

impl Default for PageView {
    fn default() -> Self {
        PageView {
            built: false,
            default_document: None,
            notice: None,
            question: String::new(),
            k: DEFAULT_RESULTS,
            hits: Vec::new(),
        }
    }
}

async fn base_view<E: Embedder, S: IndexStore>(
    state: &AppState<E, S>,
    engine: &RagEngine<E, S>,
) -> PageView {
    let built = match engine.collection_state().await {
        Ok(state) => state == CollectionState::Found,
        Err(e) => {
            error!("Failed to check collection: {}", e);
            false
        }
    };

    let default_document = state
        .config
        .document_path
        .exists()
        .then(|| state.config.document_path.display().to_string());

    PageView {
        built,
        default_document,
        ..Default::default()
    }
}

async fn index<E: Embedder, S: IndexStore>(State(state): State<AppState<E, S>>) -> Html<String> {
    let engine = state.engine.lock().await;
    let view = base_view(&state, &engine).await;
    Html(render_page(&view))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Chunk a document, save the chunks file, and rebuild the collection
async fn build_document<E: Embedder, S: IndexStore>(
    state: &AppState<E, S>,
    engine: &RagEngine<E, S>,
    document: Document,
    method: ChunkMethod,
) -> Notice {
    let chunks = match prepare_chunks(&document.content, method, &state.config.chunks_file) {
        Ok(chunks) => chunks,
        Err(e) => return Notice::error(format!("Error processing document: {}", e)),
    };
    let chunk_count = chunks.len();

    let result = engine
        .build_from_chunks(chunks, |processed, total| {
            info!("Processing chunk {}/{}", processed, total);
        })
        .await;

    match result {
        Ok(stored) => Notice::success(format!(
            "{} split into {} chunks ({}); vector database built",
            document.document_id,
            stored,
            method.as_str()
        )),
        Err(e) => {
            error!(
                "Build of {} failed after chunking into {}: {}",
                document.document_id, chunk_count, e
            );
            Notice::error(format!("Error processing document: {}", e))
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<(Document, ChunkMethod), String> {
    let mut document = None;
    let mut method = ChunkMethod::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|name| !name.is_empty())
                    .ok_or("Choose a markdown file to upload")?;
                let bytes = field.bytes().await.map_err(|e| e.to_string())?;
                document = Some(
                    Document::from_bytes(&file_name, bytes.to_vec()).map_err(|e| e.to_string())?,
                );
            }
            Some("method") => {
                method = field.text().await.map_err(|e| e.to_string())?.parse()?;
            }
            _ => {}
        }
    }

    let document = document.ok_or("Choose a markdown file to upload")?;
    Ok((document, method))
}

async fn build_upload<E: Embedder, S: IndexStore>(
    State(state): State<AppState<E, S>>,
    multipart: Multipart,
) -> Html<String> {
    let upload = read_upload(multipart).await;

    let engine = state.engine.lock().await;
    let notice = match upload {
        Ok((document, method)) => {
            info!("Uploaded file: {}", document.document_id);
            build_document(&state, &engine, document, method).await
        }
        Err(message) => Notice::error(message),
    };

    let mut view = base_view(&state, &engine).await;
    view.notice = Some(notice);
    Html(render_page(&view))
}

async fn build_default<E: Embedder, S: IndexStore>(
    State(state): State<AppState<E, S>>,
) -> Html<String> {
    let engine = state.engine.lock().await;

    let notice = match Document::from_file(&state.config.document_path) {
        Ok(document) => build_document(&state, &engine, document, ChunkMethod::Headings).await,
        Err(e) => Notice::error(format!("Error: {}", e)),
    };

    let mut view = base_view(&state, &engine).await;
    view.notice = Some(notice);
    Html(render_page(&view))
}

/// Fields are kept as text so bad input is reported in the page
#[derive(Debug, Deserialize)]
pub struct QueryForm {
    #[serde(default)]
    question: String,
    #[serde(default)]
    k: Option<String>,
}

/// Number of results requested by the form, clamped to `1..=MAX_RESULTS`
fn parse_result_count(raw: Option<&str>) -> Result<usize, String> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(DEFAULT_RESULTS),
        Some(raw) => raw
            .parse::<usize>()
            .map(|k| k.clamp(1, MAX_RESULTS))
            .map_err(|_| format!("Invalid number of results: {}", raw)),
    }
}

async fn query<E: Embedder, S: IndexStore>(
    State(state): State<AppState<E, S>>,
    Form(form): Form<QueryForm>,
) -> Html<String> {
    let engine = state.engine.lock().await;
    let mut view = base_view(&state, &engine).await;
    view.question = form.question.clone();

    let k = match parse_result_count(form.k.as_deref()) {
        Ok(k) => k,
        Err(message) => {
            view.notice = Some(Notice::error(message));
            return Html(render_page(&view));
        }
    };
    view.k = k;

    if form.question.trim().is_empty() {
        view.notice = Some(Notice::warning("Please enter a question."));
        return Html(render_page(&view));
    }

    view.notice = match engine.query(&form.question, k).await {
        Ok(QueryOutcome::NotBuilt) => Some(Notice::warning(
            "No vector database found. Upload a document first.",
        )),
        Ok(QueryOutcome::Hits(hits)) if hits.is_empty() => Some(Notice::warning(
            "No relevant documents found. Try rephrasing your question.",
        )),
        Ok(QueryOutcome::Hits(hits)) => {
            let notice = Notice::success(format!("Found {} relevant chunks:", hits.len()));
            view.hits = hits;
            Some(notice)
        }
        Err(e) => {
            error!("Query failed: {}", e);
            Some(Notice::error(format!("Error during search: {}", e)))
        }
    };

    Html(render_page(&view))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn render_page(view: &PageView) -> String {
    let mut body = String::new();

    if view.built {
        body.push_str(r#"<p class="status ok">Vector database loaded</p>"#);
    } else {
        body.push_str(r#"<p class="status missing">No vector database found</p>"#);
    }

    if let Some(notice) = &view.notice {
        let class = match notice.kind {
            NoticeKind::Success => "success",
            NoticeKind::Warning => "warning",
            NoticeKind::Error => "error",
        };
        let _ = write!(
            body,
            r#"<p class="notice {}">{}</p>"#,
            class,
            escape_html(&notice.message)
        );
    }

    body.push_str(
        r#"<section><h2>Document processing</h2>
<form method="post" action="/build" enctype="multipart/form-data">
<input type="file" name="file" accept=".md,.txt">
<select name="method"><option value="headings">headings</option><option value="paragraphs">paragraphs</option></select>
<button type="submit">Process document</button>
</form>"#,
    );
    if let Some(path) = &view.default_document {
        let _ = write!(
            body,
            r#"<form method="post" action="/build/default"><button type="submit">Process {}</button></form>"#,
            escape_html(path)
        );
    }
    body.push_str("</section>");

    if view.built {
        let _ = write!(
            body,
            r#"<section><h2>Ask questions</h2>
<form method="post" action="/query">
<input type="text" name="question" size="60" placeholder="What would you like to know about your document?" value="{}">
<select name="k">"#,
            escape_html(&view.question)
        );
        for k in 1..=MAX_RESULTS {
            let selected = if k == view.k { " selected" } else { "" };
            let _ = write!(body, r#"<option value="{k}"{selected}>{k}</option>"#);
        }
        body.push_str(r#"</select><button type="submit">Search</button></form></section>"#);
    } else {
        body.push_str(
            "<section><h2>Welcome!</h2><ol><li>Upload a document (or process the default one)</li>\
             <li>Ask questions about its content</li></ol></section>",
        );
    }

    for (rank, hit) in view.hits.iter().enumerate() {
        let score = hit.similarity.clamp(0.0, 1.0);
        let _ = write!(
            body,
            r#"<article><h3>Result {}</h3><pre>{}</pre><progress value="{:.4}" max="1"></progress><p class="caption">Relevance: {:.2}%</p></article>"#,
            rank + 1,
            escape_html(&hit.text),
            score,
            hit.similarity * 100.0
        );
    }

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>RAG Document Query System</title></head>\
         <body><h1>RAG Document Query System</h1>{}</body></html>",
        body
    )
}
