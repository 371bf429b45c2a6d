//! Server configuration (data directory, bind address, upload password).

use std::path::PathBuf;

use bookshelf_core::config::{archive_limits_from_config, load_config, AppConfig};
use bookshelf_core::security::ArchiveLimits;

/// Configuration for the bookshelf server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Holds `library/` (books and bookmarks) and `uploads/` (served files).
    pub data_dir: PathBuf,
    /// Host:port to bind (e.g. "127.0.0.1:3000" or "0.0.0.0:3000").
    pub bind: String,
    /// Upload password. `None` accepts every upload (development mode).
    pub upload_password: Option<String>,
    /// Shared reader/upload/security sections of `config.toml`.
    pub app: AppConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .map(|p| p.join("bookshelf"))
                .unwrap_or_else(|| PathBuf::from("./data")),
            bind: "127.0.0.1:3000".to_string(),
            upload_password: None,
            app: AppConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build config from `config.toml` and the environment.
    /// - `BOOKSHELF_DATA_DIR`: data directory (default: platform data dir or ./data)
    /// - `BOOKSHELF_BIND`: host:port (default: 127.0.0.1:3000)
    /// - `UPLOAD_PASSWORD`: required upload password (unset or empty: none)
    pub fn from_env() -> Self {
        let mut c = Self {
            app: load_config(),
            ..Self::default()
        };
        if let Ok(p) = std::env::var("BOOKSHELF_DATA_DIR") {
            c.data_dir = PathBuf::from(p);
        }
        if let Ok(b) = std::env::var("BOOKSHELF_BIND") {
            c.bind = b;
        }
        c.upload_password = std::env::var("UPLOAD_PASSWORD").ok().filter(|p| !p.is_empty());
        c
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind
    }

    pub fn library_dir(&self) -> PathBuf {
        self.data_dir.join("library")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn archive_limits(&self) -> ArchiveLimits {
        archive_limits_from_config(&self.app.security)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.app.upload.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
