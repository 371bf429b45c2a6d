//! Upload ingestion: classify a file, pick its stored name, and pull EPUB
//! metadata (plus cover) for the book creation form.
//!
//! Nothing here touches the disk. [`ingest`] returns the files to write and
//! the response to send; the server's upload store does the writing.

use serde::Serialize;

use crate::document::BookFormat;
use crate::epub::{parse_epub_metadata_with, CoverImage};
use crate::error::IngestError;
use crate::security::ArchiveLimits;

/// Public URL prefix of stored uploads.
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// Longest sanitized original name kept in a stored filename.
pub const MAX_NAME_CHARS: usize = 100;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// What an upload is. Images are accepted (covers) but are never books.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Book(BookFormat),
    Image,
}

impl UploadKind {
    /// Classify by extension, case-insensitively.
    pub fn from_filename(name: &str) -> Result<Self, IngestError> {
        let ext = extension(name).unwrap_or_default();
        if let Some(format) = BookFormat::from_extension(&ext) {
            return Ok(Self::Book(format));
        }
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(Self::Image);
        }
        Err(IngestError::UnsupportedFormat(if ext.is_empty() {
            "(none)".to_string()
        } else {
            format!(".{ext}")
        }))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book(format) => format.as_str(),
            Self::Image => "image",
        }
    }

    pub fn book_format(&self) -> Option<BookFormat> {
        match self {
            Self::Book(format) => Some(*format),
            Self::Image => None,
        }
    }
}

impl Serialize for UploadKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') || ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Replace every character outside `[A-Za-z0-9._-]` and the CJK unified
/// ideographs block with `_`, then cap the length at [`MAX_NAME_CHARS`]. The
/// extension survives the cap so the stored file keeps its type.
pub fn sanitize_filename(name: &str) -> String {
    // Browsers on Windows may send a full path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean: String = base.chars().map(|c| if is_allowed_char(c) { c } else { '_' }).collect();
    if clean.chars().count() <= MAX_NAME_CHARS {
        return clean;
    }
    match clean.rsplit_once('.') {
        Some((stem, ext)) if ext.chars().count() < MAX_NAME_CHARS / 2 => {
            let keep = MAX_NAME_CHARS - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => clean.chars().take(MAX_NAME_CHARS).collect(),
    }
}

/// `<millis>-<sanitized name>`.
pub fn stored_name(timestamp_millis: i64, original: &str) -> String {
    format!("{timestamp_millis}-{}", sanitize_filename(original))
}

pub fn public_url(stored: &str) -> String {
    format!("{UPLOADS_PREFIX}{stored}")
}

/// Form pre-fill returned with an upload. Non-EPUB uploads leave it empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

/// An extracted cover to be written next to the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCover {
    pub filename: String,
    pub image: CoverImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedUpload {
    pub filename: String,
    pub kind: UploadKind,
    pub size: u64,
    pub metadata: UploadMetadata,
    pub cover: Option<StoredCover>,
}

impl IngestedUpload {
    pub fn url(&self) -> String {
        public_url(&self.filename)
    }

    /// Body of a successful upload response.
    pub fn response(&self) -> UploadResponse {
        UploadResponse {
            success: true,
            filename: self.filename.clone(),
            url: self.url(),
            format: self.kind,
            size: self.size,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub url: String,
    pub format: UploadKind,
    pub size: u64,
    pub metadata: UploadMetadata,
}

/// Ingest one uploaded file.
///
/// Fails only for an unsupported extension, an empty body, or a body over
/// `max_bytes`. An EPUB whose metadata cannot be read still ingests, with
/// empty metadata.
pub fn ingest(
    original_name: &str,
    bytes: &[u8],
    timestamp_millis: i64,
    max_bytes: u64,
    limits: &ArchiveLimits,
) -> Result<IngestedUpload, IngestError> {
    let kind = UploadKind::from_filename(original_name)?;
    let size = bytes.len() as u64;
    if size == 0 {
        return Err(IngestError::Empty);
    }
    if size > max_bytes {
        return Err(IngestError::TooLarge { size, max: max_bytes });
    }

    let filename = stored_name(timestamp_millis, original_name);
    let mut metadata = UploadMetadata::default();
    let mut cover = None;

    if kind == UploadKind::Book(BookFormat::Epub) {
        let epub = parse_epub_metadata_with(bytes, limits);
        metadata.title = epub.title;
        metadata.author = epub.author;
        metadata.description = epub.description;
        if let Some(image) = epub.cover {
            let cover_name = format!("{timestamp_millis}-cover.{}", image.extension());
            metadata.cover_url = Some(public_url(&cover_name));
            cover = Some(StoredCover {
                filename: cover_name,
                image,
            });
        }
    }

    tracing::info!(filename = %filename, kind = kind.as_str(), size, "Ingested upload");
    Ok(IngestedUpload {
        filename,
        kind,
        size,
        metadata,
        cover,
    })
}
