//! The active reading session: one book, its loaded document, the chapter
//! cursor and the bookmark list.
//!
//! Loads are split into [`ReadingSession::begin_load`] and
//! [`ReadingSession::finish_load`] so the slow part (fetch and parse) can run
//! without holding the session. Every `begin_load` invalidates the tokens
//! handed out before it; a result that arrives with a stale token is dropped.

use std::sync::Arc;

use crate::document::{find_toc_title, ChapterRef, DocumentContent, DocumentSource, ParsedDocument, TextSource, TocNode};
use crate::error::{ReaderError, StoreError};
use crate::fetch::ContentFetcher;
use crate::library::{BookRecord, BookmarkRecord, LibraryStore, NewBookmark};
use crate::position::{bookmark_title, PositionSnapshot};
use crate::security::ArchiveLimits;
use crate::{epub, markdown};

/// Proof that a load was started. Only the most recent token may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    /// Loading failed; the message is shown with a reload affordance.
    Failed(String),
}

/// Fetch and parse a document source. No session state is touched, so this
/// can run while the session keeps serving the previous document.
pub async fn load_document<F: ContentFetcher>(
    source: &DocumentSource,
    fetcher: &F,
    limits: &ArchiveLimits,
) -> Result<ParsedDocument, ReaderError> {
    match source {
        DocumentSource::Markdown { source } => {
            let text = read_text(source, fetcher).await?;
            Ok(markdown::load_document(&text))
        }
        DocumentSource::Txt { source } => {
            let text = read_text(source, fetcher).await?;
            Ok(ParsedDocument::empty(DocumentContent::Text(text)))
        }
        DocumentSource::Epub { url } => {
            let bytes = fetcher.fetch_bytes(url).await?;
            Ok(epub::load_document_with(&bytes, limits)?)
        }
        DocumentSource::Pdf { url } => Ok(ParsedDocument::empty(DocumentContent::Pdf { url: url.clone() })),
    }
}

async fn read_text<F: ContentFetcher>(source: &TextSource, fetcher: &F) -> Result<String, ReaderError> {
    match source {
        TextSource::Inline(text) => Ok(text.clone()),
        TextSource::Url(url) => Ok(fetcher.fetch_text(url).await?),
    }
}

pub struct ReadingSession {
    store: Arc<dyn LibraryStore>,
    limits: ArchiveLimits,
    book: Option<BookRecord>,
    generation: u64,
    state: LoadState,
    document: Option<ParsedDocument>,
    current_chapter: Option<String>,
    bookmarks: Vec<BookmarkRecord>,
}

impl ReadingSession {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self {
            store,
            limits: ArchiveLimits::default(),
            book: None,
            generation: 0,
            state: LoadState::Idle,
            document: None,
            current_chapter: None,
            bookmarks: Vec::new(),
        }
    }

    pub fn with_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn book(&self) -> Option<&BookRecord> {
        self.book.as_ref()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// The loaded document, only once the load has committed.
    pub fn document(&self) -> Option<&ParsedDocument> {
        match self.state {
            LoadState::Ready => self.document.as_ref(),
            _ => None,
        }
    }

    /// Table of contents of the ready document; empty while loading so no
    /// entry points at content that has not mounted.
    pub fn table_of_contents(&self) -> &[TocNode] {
        self.document().map(|d| d.table_of_contents.as_slice()).unwrap_or(&[])
    }

    /// Switch to the book with `slug`: resets the chapter cursor and bookmark
    /// list, then starts loading its document.
    pub fn open_book(&mut self, slug: &str) -> Result<(LoadToken, DocumentSource), StoreError> {
        let book = self.store.get_book(slug)?;
        let source = book.document_source();
        self.book = Some(book);
        self.bookmarks.clear();
        let token = self.begin_load(&source);
        Ok((token, source))
    }

    /// Start loading `source`, invalidating any load already in flight.
    pub fn begin_load(&mut self, source: &DocumentSource) -> LoadToken {
        self.generation += 1;
        self.state = LoadState::Loading;
        self.document = None;
        self.current_chapter = None;
        tracing::debug!(generation = self.generation, format = %source.format(), "Begin document load");
        LoadToken(self.generation)
    }

    pub fn is_current(&self, token: LoadToken) -> bool {
        token.0 == self.generation
    }

    /// Commit a load result. Returns `false`, leaving the session untouched,
    /// when `token` has been superseded.
    pub fn finish_load(&mut self, token: LoadToken, result: Result<ParsedDocument, ReaderError>) -> bool {
        if !self.is_current(token) {
            tracing::debug!(stale = token.0, current = self.generation, "Dropping stale load result");
            return false;
        }
        match result {
            Ok(document) => {
                self.current_chapter = match &document.content {
                    DocumentContent::Chapters(chapters) => chapters.first().map(|c| c.href.clone()),
                    _ => None,
                };
                self.document = Some(document);
                self.state = LoadState::Ready;
            }
            Err(e) => {
                tracing::warn!("Document load failed: {}", e);
                self.document = None;
                self.state = LoadState::Failed(e.to_string());
            }
        }
        true
    }

    /// Load `source` start to finish.
    pub async fn load<F: ContentFetcher>(&mut self, source: &DocumentSource, fetcher: &F) -> LoadState {
        let token = self.begin_load(source);
        let result = load_document(source, fetcher, &self.limits).await;
        self.finish_load(token, result);
        self.state.clone()
    }

    // -----------------------------------------------------------------------
    // Chapter cursor
    // -----------------------------------------------------------------------

    pub fn current_chapter(&self) -> Option<&str> {
        self.current_chapter.as_deref()
    }

    pub fn set_current_chapter(&mut self, anchor: Option<&str>) {
        self.current_chapter = anchor.filter(|a| !a.is_empty()).map(str::to_string);
    }

    fn chapters(&self) -> &[ChapterRef] {
        match self.document().map(|d| &d.content) {
            Some(DocumentContent::Chapters(chapters)) => chapters,
            _ => &[],
        }
    }

    /// Chapters before and after the current one, in spine order.
    pub fn adjacent_chapters(&self) -> (Option<&ChapterRef>, Option<&ChapterRef>) {
        let chapters = self.chapters();
        let Some(idx) = self
            .current_chapter
            .as_deref()
            .and_then(|cur| chapters.iter().position(|c| c.href == cur))
        else {
            return (None, None);
        };
        let prev = idx.checked_sub(1).and_then(|i| chapters.get(i));
        (prev, chapters.get(idx + 1))
    }

    /// Title of the current chapter or section, when the document names it.
    pub fn current_chapter_title(&self) -> Option<&str> {
        let current = self.current_chapter.as_deref()?;
        self.chapters()
            .iter()
            .find(|c| c.href == current)
            .and_then(|c| c.title.as_deref())
            .or_else(|| find_toc_title(self.table_of_contents(), current))
    }

    // -----------------------------------------------------------------------
    // Bookmarks
    // -----------------------------------------------------------------------

    /// Cached bookmarks of the open book, newest first.
    pub fn bookmarks(&self) -> &[BookmarkRecord] {
        &self.bookmarks
    }

    fn book_id(&self) -> Result<String, StoreError> {
        self.book
            .as_ref()
            .map(|b| b.id.clone())
            .ok_or_else(|| StoreError::NotFound("no open book".into()))
    }

    pub fn refresh_bookmarks(&mut self) -> Result<&[BookmarkRecord], StoreError> {
        let book_id = self.book_id()?;
        self.bookmarks = self.store.list_bookmarks(&book_id)?;
        Ok(&self.bookmarks)
    }

    /// Persist a bookmark at `position`, then cache it. Without a title the
    /// current chapter's title and the percentage are used.
    pub fn add_bookmark(
        &mut self,
        position: &PositionSnapshot,
        title: Option<String>,
        note: Option<String>,
    ) -> Result<&BookmarkRecord, ReaderError> {
        let book_id = self.book_id()?;
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| bookmark_title(self.current_chapter_title(), position.percentage.unwrap_or(0)));
        let record = self.store.create_bookmark(
            &book_id,
            NewBookmark {
                chapter_slug: position.chapter_anchor.clone(),
                position: Some(position.to_payload()?),
                title: Some(title),
                note: note.filter(|n| !n.trim().is_empty()),
            },
        )?;
        self.bookmarks.insert(0, record);
        Ok(&self.bookmarks[0])
    }

    /// Drop the bookmark locally, then delete it from the store. A store
    /// failure is returned but the local removal stands.
    pub fn delete_bookmark(&mut self, id: &str) -> Result<(), StoreError> {
        let book_id = self.book_id()?;
        self.bookmarks.retain(|b| b.id != id);
        self.store.delete_bookmark(&book_id, id)
    }
}
