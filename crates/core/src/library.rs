//! Library store: books, their chapters, and per-book bookmarks.
//!
//! The store is the persistence seam of the reader. Anything that lists
//! books or keeps bookmarks goes through [`LibraryStore`]; the server wires
//! it to HTTP and the reading session uses it directly. [`DirLibrary`] keeps
//! everything as JSON files under one directory:
//!
//! ```text
//! <root>/books.json
//! <root>/bookmarks/<book-id>.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{BookFormat, DocumentSource};
use crate::error::StoreError;
use crate::markdown::slugify;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Public URL of the cover image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    pub format: BookFormat,
    /// Public URL of the uploaded book file.
    pub file_path: String,
    /// Extra metadata captured at ingest (publisher, language, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub chapters: Vec<ChapterRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookRecord {
    /// Source the reader should open: inline content of the first chapter
    /// wins over the uploaded file for text formats.
    pub fn document_source(&self) -> DocumentSource {
        let inline = self.chapters.first().and_then(|c| c.content.clone());
        DocumentSource::for_book(self.format, &self.file_path, inline)
    }

    /// Listing view: the same record without chapters or metadata.
    pub fn summary(&self) -> BookSummary {
        BookSummary {
            id: self.id.clone(),
            slug: self.slug.clone(),
            title: self.title.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            cover: self.cover.clone(),
            format: self.format,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub format: BookFormat,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    pub title: String,
    pub slug: String,
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Request body for creating a book.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    #[serde(default)]
    pub title: String,
    pub format: Option<BookFormat>,
    /// Explicit slug. Taken slugs are a conflict; when absent one is derived
    /// from the title and deduplicated.
    pub slug: Option<String>,
    #[serde(default)]
    pub file_path: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub chapters: Vec<NewChapter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChapter {
    pub title: String,
    pub slug: String,
    pub content: Option<String>,
    pub file_path: Option<String>,
}

/// Partial update; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub id: String,
    pub book_id: String,
    #[serde(default)]
    pub chapter_slug: Option<String>,
    /// Serialized [`crate::position::PositionSnapshot`].
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBookmark {
    #[serde(default)]
    pub chapter_slug: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Persistence for books and bookmarks. Implementations must be usable from
/// several request handlers at once.
pub trait LibraryStore: Send + Sync {
    /// All books, newest first.
    fn list_books(&self) -> Result<Vec<BookRecord>, StoreError>;

    fn get_book(&self, slug: &str) -> Result<BookRecord, StoreError>;

    fn create_book(&self, book: NewBook) -> Result<BookRecord, StoreError>;

    fn update_book(&self, slug: &str, patch: BookPatch) -> Result<BookRecord, StoreError>;

    /// Remove a book together with its bookmarks.
    fn delete_book(&self, slug: &str) -> Result<(), StoreError>;

    /// Bookmarks of one book, newest first.
    fn list_bookmarks(&self, book_id: &str) -> Result<Vec<BookmarkRecord>, StoreError>;

    fn create_bookmark(&self, book_id: &str, bookmark: NewBookmark) -> Result<BookmarkRecord, StoreError>;

    /// Delete a bookmark of `book_id`. A bookmark id that belongs to another
    /// book is reported as not found.
    fn delete_bookmark(&self, book_id: &str, id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Directory backend
// ---------------------------------------------------------------------------

const BOOKS_FILE: &str = "books.json";
const BOOKMARKS_DIR: &str = "bookmarks";

/// JSON-file store rooted at a directory. Writes are serialized through an
/// internal lock and land via write-then-rename.
pub struct DirLibrary {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirLibrary {
    /// Open (and create, if needed) a store under `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(BOOKMARKS_DIR))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn books_path(&self) -> PathBuf {
        self.root.join(BOOKS_FILE)
    }

    fn bookmarks_path(&self, book_id: &str) -> Result<PathBuf, StoreError> {
        // Book ids are uuids we minted; anything else never names a file.
        if Uuid::parse_str(book_id).is_err() {
            return Err(StoreError::NotFound(format!("book {book_id}")));
        }
        Ok(self.root.join(BOOKMARKS_DIR).join(format!("{book_id}.json")))
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A panic mid-write leaves the files intact (rename is atomic), so a
        // poisoned lock is still usable.
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_books(&self) -> Result<Vec<BookRecord>, StoreError> {
        read_json_or_default(&self.books_path())
    }

    fn write_books(&self, books: &[BookRecord]) -> Result<(), StoreError> {
        write_json_atomic(&self.books_path(), books)
    }

    fn read_bookmarks(&self, book_id: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        read_json_or_default(&self.bookmarks_path(book_id)?)
    }

    fn require_book_id(&self, book_id: &str) -> Result<(), StoreError> {
        if self.read_books()?.iter().any(|b| b.id == book_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("book {book_id}")))
        }
    }
}

impl LibraryStore for DirLibrary {
    fn list_books(&self) -> Result<Vec<BookRecord>, StoreError> {
        let _g = self.guard();
        let mut books = self.read_books()?;
        books.reverse();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(books)
    }

    fn get_book(&self, slug: &str) -> Result<BookRecord, StoreError> {
        let _g = self.guard();
        self.read_books()?
            .into_iter()
            .find(|b| b.slug == slug)
            .ok_or_else(|| StoreError::NotFound(format!("book {slug}")))
    }

    fn create_book(&self, book: NewBook) -> Result<BookRecord, StoreError> {
        let title = book.title.trim();
        if title.is_empty() {
            return Err(StoreError::Invalid("title is required".into()));
        }
        if book.file_path.trim().is_empty() {
            return Err(StoreError::Invalid("filePath is required".into()));
        }
        let format = book
            .format
            .ok_or_else(|| StoreError::Invalid("format is required".into()))?;

        let _g = self.guard();
        let mut books = self.read_books()?;
        let taken = |s: &str| books.iter().any(|b| b.slug == s);
        let slug = match book.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) if taken(explicit) => {
                return Err(StoreError::Conflict(format!("slug {explicit} already exists")));
            }
            Some(explicit) => explicit.to_string(),
            None => unique_slug(title, taken),
        };

        let now = Utc::now();
        let chapters = book
            .chapters
            .into_iter()
            .enumerate()
            .map(|(i, c)| ChapterRecord {
                title: c.title,
                slug: c.slug,
                order: i as u32,
                content: c.content,
                file_path: c.file_path,
            })
            .collect();
        let record = BookRecord {
            id: Uuid::new_v4().to_string(),
            slug,
            title: title.to_string(),
            author: non_empty(book.author),
            description: non_empty(book.description),
            cover: non_empty(book.cover),
            format,
            file_path: book.file_path,
            metadata: book.metadata,
            chapters,
            created_at: now,
            updated_at: now,
        };
        books.push(record.clone());
        self.write_books(&books)?;
        tracing::info!(slug = %record.slug, format = %record.format, "Created book");
        Ok(record)
    }

    fn update_book(&self, slug: &str, patch: BookPatch) -> Result<BookRecord, StoreError> {
        let _g = self.guard();
        let mut books = self.read_books()?;
        let book = books
            .iter_mut()
            .find(|b| b.slug == slug)
            .ok_or_else(|| StoreError::NotFound(format!("book {slug}")))?;
        if let Some(title) = patch.title.map(|t| t.trim().to_string()) {
            if title.is_empty() {
                return Err(StoreError::Invalid("title must not be empty".into()));
            }
            book.title = title;
        }
        if patch.author.is_some() {
            book.author = non_empty(patch.author);
        }
        if patch.description.is_some() {
            book.description = non_empty(patch.description);
        }
        if patch.cover.is_some() {
            book.cover = non_empty(patch.cover);
        }
        book.updated_at = Utc::now();
        let updated = book.clone();
        self.write_books(&books)?;
        Ok(updated)
    }

    fn delete_book(&self, slug: &str) -> Result<(), StoreError> {
        let _g = self.guard();
        let mut books = self.read_books()?;
        let idx = books
            .iter()
            .position(|b| b.slug == slug)
            .ok_or_else(|| StoreError::NotFound(format!("book {slug}")))?;
        let removed = books.remove(idx);
        self.write_books(&books)?;
        match std::fs::remove_file(self.bookmarks_path(&removed.id)?) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(slug, "Deleted book");
        Ok(())
    }

    fn list_bookmarks(&self, book_id: &str) -> Result<Vec<BookmarkRecord>, StoreError> {
        let _g = self.guard();
        self.require_book_id(book_id)?;
        let mut marks = self.read_bookmarks(book_id)?;
        // Appended in creation order: reverse first so equal timestamps keep
        // the later bookmark in front after the stable sort.
        marks.reverse();
        marks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(marks)
    }

    fn create_bookmark(&self, book_id: &str, bookmark: NewBookmark) -> Result<BookmarkRecord, StoreError> {
        let _g = self.guard();
        self.require_book_id(book_id)?;
        let mut marks = self.read_bookmarks(book_id)?;
        let record = BookmarkRecord {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            chapter_slug: bookmark.chapter_slug,
            position: bookmark.position,
            title: bookmark.title,
            note: bookmark.note,
            created_at: Utc::now(),
        };
        marks.push(record.clone());
        write_json_atomic(&self.bookmarks_path(book_id)?, &marks)?;
        tracing::debug!(book_id, id = %record.id, "Created bookmark");
        Ok(record)
    }

    fn delete_bookmark(&self, book_id: &str, id: &str) -> Result<(), StoreError> {
        let _g = self.guard();
        self.require_book_id(book_id)?;
        let mut marks = self.read_bookmarks(book_id)?;
        let before = marks.len();
        marks.retain(|m| m.id != id);
        if marks.len() == before {
            return Err(StoreError::NotFound(format!("bookmark {id}")));
        }
        write_json_atomic(&self.bookmarks_path(book_id)?, &marks)?;
        Ok(())
    }
}

/// Slug from `title`, suffixed `-2`, `-3`, ... until unused.
fn unique_slug(title: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut base = slugify(title);
    if base.is_empty() {
        base = "book".to_string();
    }
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|s| !taken(s))
        .unwrap_or(base)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
