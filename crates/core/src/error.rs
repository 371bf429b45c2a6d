/// Top-level error type. Public entry points that can fail return this.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("EPUB error: {0}")]
    Epub(#[from] EpubError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Archive entry {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedEntry {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EpubError {
    /// The archive is not a structurally valid EPUB container.
    #[error("Invalid EPUB container: {0}")]
    InvalidContainer(String),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request for {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("Could not decode response body: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Corrupt store data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("Malformed position payload: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Empty upload")]
    Empty,

    #[error("Upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("No config directory available on this platform")]
    NoConfigDir,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
