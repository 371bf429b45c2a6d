//! Bookshelf HTTP server.
//!
//! Accepts password-gated uploads, keeps the book and bookmark records, and
//! serves uploaded files plus rendered Markdown/TXT content to the reader.
//! Records live in a directory-backed [`DirLibrary`]; files under `uploads/`.

pub mod api;
pub mod config;
pub mod gate;
pub mod storage;

use std::sync::Arc;

use axum::Router;
use bookshelf_core::error::StoreError;
use bookshelf_core::library::{DirLibrary, LibraryStore};
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::gate::{LockoutGate, LockoutPolicy};
use crate::storage::UploadStore;

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Library store: {0}")]
    Store(#[from] StoreError),

    #[error("Upload directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state (stores, gate and config).
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<dyn LibraryStore>,
    pub uploads: UploadStore,
    pub gate: Arc<LockoutGate>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, InitError> {
        let library = Arc::new(DirLibrary::open(config.library_dir())?);
        let uploads = UploadStore::new(config.uploads_dir())?;
        let gate = Arc::new(LockoutGate::new(
            config.upload_password.clone(),
            LockoutPolicy::from(&config.app.upload),
        ));
        if config.upload_password.is_none() {
            tracing::warn!("UPLOAD_PASSWORD is not set; uploads are open");
        }
        Ok(Self {
            library,
            uploads,
            gate,
            config,
        })
    }
}

/// Build API routes (under /api) with state.
pub fn api_routes(state: AppState) -> Router {
    api::routes(state)
}

/// API routes plus the uploaded files under `/uploads`.
pub fn app(state: AppState) -> Router {
    let uploads = ServeDir::new(state.uploads.root());
    api_routes(state).nest_service("/uploads", uploads)
}
