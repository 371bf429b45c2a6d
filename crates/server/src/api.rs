//! HTTP API routes: upload gate, books, bookmarks and rendered content.

use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use bookshelf_core::document::{DocumentSource, TextSource};
use bookshelf_core::encoding::decode_text;
use bookshelf_core::error::{IngestError, StoreError};
use bookshelf_core::ingest::{ingest, UploadResponse};
use bookshelf_core::library::{BookPatch, BookRecord, BookSummary, BookmarkRecord, NewBook, NewBookmark};
use bookshelf_core::markdown::{parse_frontmatter, render_markdown};
use bookshelf_core::text::ChunkedText;

use crate::gate::{client_key, retry_minutes, Verdict};
use crate::AppState;

/// Verified upload sessions last a day on the client.
const SESSION_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Multipart framing on top of the file itself.
const MULTIPART_SLACK: usize = 64 * 1024;

pub fn routes(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_SLACK);
    Router::new()
        .route("/api/auth/verify", post(verify_password))
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/books", get(list_books).post(create_book))
        .route("/api/books/:slug", get(get_book).patch(update_book).delete(delete_book))
        .route(
            "/api/books/:slug/bookmarks",
            get(list_bookmarks).post(create_bookmark).delete(delete_bookmark),
        )
        .route("/api/books/:slug/content", get(book_content))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth and upload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

fn rejection(verdict: Verdict) -> Option<(StatusCode, Json<VerifyResponse>)> {
    match verdict {
        Verdict::Valid => None,
        Verdict::Invalid { attempts_left } => Some((
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse {
                valid: false,
                expires_at: None,
                error: Some(format!("Wrong password, {attempts_left} attempts left")),
                locked: None,
            }),
        )),
        Verdict::Locked { retry_after } => Some((
            StatusCode::TOO_MANY_REQUESTS,
            Json(VerifyResponse {
                valid: false,
                expires_at: None,
                error: Some(format!(
                    "Too many attempts, try again in {} minutes",
                    retry_minutes(retry_after)
                )),
                locked: Some(true),
            }),
        )),
    }
}

async fn verify_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<VerifyRequest>,
) -> Response {
    let client = client_key(&headers);
    let verdict = state.gate.verify(&client, req.password.as_deref(), Instant::now());
    if let Some(rejected) = rejection(verdict) {
        return rejected.into_response();
    }
    Json(VerifyResponse {
        valid: true,
        expires_at: Some(chrono::Utc::now().timestamp_millis() + SESSION_MILLIS),
        error: None,
        locked: None,
    })
    .into_response()
}

/// A body over the route limit surfaces as a multipart error.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::TooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut password = None;
    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("password") => {
                password = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((name, data.to_vec()));
            }
            _ => {}
        }
    }

    let client = client_key(&headers);
    if let Some(rejected) = rejection(state.gate.verify(&client, password.as_deref(), Instant::now())) {
        return Ok(rejected.into_response());
    }

    let (name, bytes) = file.ok_or_else(|| ApiError::BadRequest("No file uploaded".into()))?;
    let ingested = ingest(
        &name,
        &bytes,
        chrono::Utc::now().timestamp_millis(),
        state.config.max_upload_bytes(),
        &state.config.archive_limits(),
    )?;
    state.uploads.save(&ingested, &bytes)?;
    let body: UploadResponse = ingested.response();
    Ok(Json(body).into_response())
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<BookSummary>>, ApiError> {
    let books = state.library.list_books()?;
    Ok(Json(books.iter().map(BookRecord::summary).collect()))
}

async fn create_book(
    State(state): State<AppState>,
    Json(book): Json<NewBook>,
) -> Result<(StatusCode, Json<BookRecord>), ApiError> {
    let record = state.library.create_book(book)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_book(State(state): State<AppState>, Path(slug): Path<String>) -> Result<Json<BookRecord>, ApiError> {
    Ok(Json(state.library.get_book(&slug)?))
}

async fn update_book(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(patch): Json<BookPatch>,
) -> Result<Json<BookRecord>, ApiError> {
    Ok(Json(state.library.update_book(&slug, patch)?))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.library.delete_book(&slug)?;
    Ok(Json(json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Bookmarks
// ---------------------------------------------------------------------------

async fn list_bookmarks(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<BookmarkRecord>>, ApiError> {
    let book = state.library.get_book(&slug)?;
    Ok(Json(state.library.list_bookmarks(&book.id)?))
}

async fn create_bookmark(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(bookmark): Json<NewBookmark>,
) -> Result<(StatusCode, Json<BookmarkRecord>), ApiError> {
    let book = state.library.get_book(&slug)?;
    let record = state.library.create_bookmark(&book.id, bookmark)?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteBookmarkQuery {
    pub id: Option<String>,
}

async fn delete_bookmark(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(q): Query<DeleteBookmarkQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = q
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing bookmark id".into()))?;
    let book = state.library.get_book(&slug)?;
    state.library.delete_bookmark(&book.id, &id)?;
    Ok(Json(json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ContentQuery {
    /// Number of text chunks to reveal (default 1).
    pub chunks: Option<usize>,
    /// Reveal all text at once.
    #[serde(default)]
    pub all: bool,
}

async fn book_content(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(q): Query<ContentQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let book = state.library.get_book(&slug)?;
    let read_text = |source: &TextSource| -> Result<String, ApiError> {
        match source {
            TextSource::Inline(text) => Ok(text.clone()),
            TextSource::Url(url) => Ok(decode_text(&state.uploads.read_url(url)?)),
        }
    };

    let body = match book.document_source() {
        DocumentSource::Markdown { source } => {
            let text = read_text(&source)?;
            let (frontmatter, body) = parse_frontmatter(&text);
            let rendered = render_markdown(body);
            json!({
                "format": "markdown",
                "frontmatter": frontmatter,
                "html": rendered.html,
                "headings": rendered.headings,
            })
        }
        DocumentSource::Txt { source } => {
            let mut window = ChunkedText::with_chunk_size(state.config.app.reader.chunk_size);
            window.reset(read_text(&source)?);
            if q.all {
                window.load_all();
            } else {
                for _ in 1..q.chunks.unwrap_or(1).max(1) {
                    window.grow();
                }
            }
            json!({
                "format": "txt",
                "text": window.visible_text(),
                "blocks": window.blocks(),
                "visibleChars": window.visible_len(),
                "totalChars": window.total_len(),
                "hasMore": window.has_more(),
                "progress": window.progress_percent(),
            })
        }
        DocumentSource::Epub { url } => {
            let bytes = state.uploads.read_url(&url)?;
            let doc = bookshelf_core::epub::load_document_with(&bytes, &state.config.archive_limits())
                .map_err(|e| ApiError::Unprocessable(e.to_string()))?;
            json!({
                "format": "epub",
                "url": url,
                "content": doc.content,
                "toc": doc.table_of_contents,
            })
        }
        DocumentSource::Pdf { url } => json!({ "format": "pdf", "url": url }),
    };
    Ok(Json(body))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooLarge(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(format!("Not found: {what}")),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::TooLarge { .. } => ApiError::TooLarge(e.to_string()),
            IngestError::UnsupportedFormat(_) | IngestError::Empty => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ApiError::NotFound("File not found".to_string()),
            std::io::ErrorKind::InvalidInput => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => {
                tracing::error!("Request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
