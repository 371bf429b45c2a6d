//! Config file parsing for `~/.config/bookshelf/config.toml`.
//!
//! Use `archive_limits_from_config` and the `ReaderConfig` builders
//! (`chunked_text`, `growth_trigger`, `settle_delay`) to turn the loaded values
//! into what the pipelines consume.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::security::ArchiveLimits;
use crate::text::{ChunkedText, GrowthTrigger, CHUNK_SIZE, GROWTH_THRESHOLD};

const APP_DIR: &str = "bookshelf";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Characters revealed per growth step of a plain-text document.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Fraction of the document height that triggers the next chunk.
    #[serde(default = "default_growth_threshold")]
    pub growth_threshold: f64,
    /// Wait after a chapter switch before seeking to a bookmark.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}
fn default_growth_threshold() -> f64 {
    GROWTH_THRESHOLD
}
fn default_settle_delay_ms() -> u64 {
    500
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            growth_threshold: default_growth_threshold(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl ReaderConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Text window over `full_text` growing by `chunk_size` characters.
    pub fn chunked_text(&self, full_text: impl Into<String>) -> ChunkedText {
        let mut text = ChunkedText::with_chunk_size(self.chunk_size);
        text.reset(full_text);
        text
    }

    /// Scroll trigger at `growth_threshold`. Values outside `0..=1` (or NaN)
    /// fall back to the default threshold.
    pub fn growth_trigger(&self) -> GrowthTrigger {
        if (0.0..=1.0).contains(&self.growth_threshold) {
            GrowthTrigger::new(self.growth_threshold)
        } else {
            GrowthTrigger::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_archive_entries: Option<u64>,
    pub max_entry_size_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Failed password attempts, within the attempt window, before lockout.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
    /// Failures further apart than this start a fresh count.
    #[serde(default = "default_attempt_window_secs")]
    pub attempt_window_secs: u64,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

fn default_max_failed_attempts() -> u32 {
    5
}
fn default_lockout_secs() -> u64 {
    15 * 60
}
fn default_attempt_window_secs() -> u64 {
    5 * 60
}
fn default_max_upload_mb() -> u64 {
    100
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_secs: default_lockout_secs(),
            attempt_window_secs: default_attempt_window_secs(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// `~/.config/bookshelf` (platform equivalent).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(APP_DIR);
        p
    })
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|mut p| {
        p.push("config.toml");
        p
    })
}

/// Load config from the default path. A missing or invalid file yields defaults.
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };
    match load_config_from(&path) {
        Ok(cfg) => cfg,
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<AppConfig>(&content)?)
}

/// Write a default config file. Refuses to overwrite an existing one.
pub fn init_config(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(&AppConfig::default())?;
    std::fs::write(path, content)?;
    Ok(true)
}

/// Build archive limits from config. Uses defaults for any unset values.
pub fn archive_limits_from_config(c: &SecurityConfig) -> ArchiveLimits {
    let mut limits = ArchiveLimits::default();
    if let Some(n) = c.max_archive_entries {
        limits.max_entries = n;
    }
    if let Some(mb) = c.max_entry_size_mb {
        limits.max_entry_size_bytes = mb.saturating_mul(1024).saturating_mul(1024);
    }
    limits
}
