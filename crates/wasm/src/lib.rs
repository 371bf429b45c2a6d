//! WASM bindings for the bookshelf reader.
//!
//! Structured results cross the boundary as JSON strings; the browser side
//! parses them with `JSON.parse`.

use bookshelf_core::config::ReaderConfig;
use bookshelf_core::epub;
use bookshelf_core::markdown::{self, parse_frontmatter};
use bookshelf_core::position::{self, PositionSnapshot};
use bookshelf_core::settings::ReaderSettings;
use bookshelf_core::text::{ChunkedText, GrowthTrigger, ScrollMetrics};
use serde::Serialize;
use wasm_bindgen::prelude::*;

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

fn js_err(message: String) -> JsValue {
    JsValue::from_str(&message)
}

fn epub_metadata_json(data: &[u8]) -> Result<String, String> {
    let meta = epub::parse_epub_metadata(data);
    to_json(&serde_json::json!({
        "title": meta.title,
        "author": meta.author,
        "description": meta.description,
        "coverMimeType": meta.cover_mime_type(),
    }))
}

/// Upload-form metadata for an EPUB buffer. Never fails on a bad archive;
/// every field is then null.
#[wasm_bindgen]
pub fn parse_epub_metadata(data: &[u8]) -> Result<String, JsValue> {
    epub_metadata_json(data).map_err(js_err)
}

/// Raw bytes of the EPUB's cover image, if one can be found.
#[wasm_bindgen]
pub fn epub_cover(data: &[u8]) -> Option<Vec<u8>> {
    epub::parse_epub_metadata(data).cover.map(|c| c.bytes)
}

fn epub_document_json(data: &[u8]) -> Result<String, String> {
    let doc = epub::load_document(data).map_err(|e| e.to_string())?;
    to_json(&doc)
}

/// Spine and table of contents of an EPUB buffer.
#[wasm_bindgen]
pub fn load_epub(data: &[u8]) -> Result<String, JsValue> {
    epub_document_json(data).map_err(js_err)
}

fn markdown_json(source: &str) -> Result<String, String> {
    let (frontmatter, body) = parse_frontmatter(source);
    let rendered = markdown::render_markdown(body);
    to_json(&serde_json::json!({
        "frontmatter": frontmatter,
        "html": rendered.html,
        "headings": rendered.headings,
    }))
}

/// Render a Markdown document: `{frontmatter, html, headings}`.
#[wasm_bindgen]
pub fn render_markdown(source: &str) -> Result<String, JsValue> {
    markdown_json(source).map_err(js_err)
}

/// Table of contents for a Markdown document.
#[wasm_bindgen]
pub fn markdown_toc(source: &str) -> Result<String, JsValue> {
    to_json(&markdown::load_document(source).table_of_contents).map_err(js_err)
}

/// Bookmark payload for the current scroll position.
#[wasm_bindgen]
pub fn capture_position(
    chapter: Option<String>,
    scroll_y: f64,
    document_height: f64,
    viewport_height: f64,
) -> Result<String, JsValue> {
    position::capture(chapter.as_deref(), scroll_y, document_height, viewport_height)
        .to_payload()
        .map_err(|e| js_err(e.to_string()))
}

fn plan_json(payload: &str, current_chapter: Option<&str>) -> Result<String, String> {
    let snapshot = PositionSnapshot::from_payload(payload).map_err(|e| e.to_string())?;
    to_json(&position::plan(&snapshot, current_chapter))
}

/// `{switchTo, seek}` for a stored payload. Switch first, wait for the new
/// chapter to lay out, then resolve the seek with [`resolve_seek`].
#[wasm_bindgen]
pub fn plan_navigation(payload: &str, current_chapter: Option<String>) -> Result<String, JsValue> {
    plan_json(payload, current_chapter.as_deref()).map_err(js_err)
}

/// Scroll offset for a stored payload once the target content is mounted.
#[wasm_bindgen]
pub fn resolve_seek(payload: &str, scrollable_height: f64) -> Option<f64> {
    PositionSnapshot::from_payload(payload)
        .ok()?
        .scroll_target()
        .map(|t| t.resolve(scrollable_height))
}

/// Default bookmark title for a chapter and percentage.
#[wasm_bindgen]
pub fn bookmark_title(chapter_title: Option<String>, percentage: u8) -> String {
    position::bookmark_title(chapter_title.as_deref(), percentage)
}

/// Progressive plain-text view driven by scroll events.
#[wasm_bindgen]
pub struct TextWindow {
    text: ChunkedText,
    trigger: GrowthTrigger,
    settings: ReaderSettings,
}

impl TextWindow {
    fn from_reader_config(full_text: String, reader_json: &str) -> Result<TextWindow, String> {
        let reader: ReaderConfig = serde_json::from_str(reader_json).map_err(|e| e.to_string())?;
        Ok(TextWindow {
            text: reader.chunked_text(full_text),
            trigger: reader.growth_trigger(),
            settings: ReaderSettings::default(),
        })
    }
}

#[wasm_bindgen]
impl TextWindow {
    #[wasm_bindgen(constructor)]
    pub fn new(full_text: String) -> TextWindow {
        TextWindow {
            text: ChunkedText::new(full_text),
            trigger: GrowthTrigger::default(),
            settings: ReaderSettings::default(),
        }
    }

    /// Window driven by a `[reader]` config given as JSON, for example
    /// `{"chunk_size": 20000, "growth_threshold": 0.9}`. Missing keys use the
    /// defaults.
    pub fn with_config(full_text: String, reader_json: &str) -> Result<TextWindow, JsValue> {
        TextWindow::from_reader_config(full_text, reader_json).map_err(js_err)
    }

    /// Apply reader settings given as JSON; unknown or bad input keeps the
    /// current ones.
    pub fn set_settings(&mut self, json: &str) -> bool {
        match serde_json::from_str::<ReaderSettings>(json) {
            Ok(s) => {
                self.settings = s.clamped();
                true
            }
            Err(_) => false,
        }
    }

    pub fn reset(&mut self, full_text: String) {
        self.text.reset(full_text);
    }

    /// Feed a scroll event. Returns true when more text was revealed and
    /// the view should re-render.
    pub fn on_scroll(&mut self, scroll_y: f64, viewport_height: f64, document_height: f64) -> bool {
        let metrics = ScrollMetrics {
            scroll_y,
            viewport_height,
            document_height,
        };
        match self.trigger.observe(metrics, &self.text) {
            Some(ticket) => {
                self.text.commit(ticket);
                true
            }
            None => false,
        }
    }

    pub fn load_all(&mut self) {
        self.text.load_all();
    }

    pub fn html(&self) -> String {
        self.text.render_html(&self.settings)
    }

    pub fn has_more(&self) -> bool {
        self.text.has_more()
    }

    pub fn progress(&self) -> u8 {
        self.text.progress_percent()
    }

    pub fn visible_len(&self) -> usize {
        self.text.visible_len()
    }

    pub fn total_len(&self) -> usize {
        self.text.total_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_markdown_json_shape() {
        let json = markdown_json("---\ntitle: T\n---\n# Hi\n").unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["frontmatter"]["title"], "T");
        assert_eq!(v["headings"][0]["id"], "hi");
    }

    #[test]
    fn test_garbage_epub_metadata_is_all_null() {
        let v: serde_json::Value = serde_json::from_str(&epub_metadata_json(b"nope").unwrap()).unwrap();
        assert!(v["title"].is_null());
        assert!(v["coverMimeType"].is_null());
        assert!(epub_cover(b"nope").is_none());
    }

    #[test]
    fn test_plan_switches_chapter() {
        let v: serde_json::Value =
            serde_json::from_str(&plan_json(r#"{"scrollY":40,"chapterSlug":"b"}"#, Some("a")).unwrap()).unwrap();
        assert_eq!(v["switchTo"], "b");
        assert_eq!(resolve_seek(r#"{"percentage":50}"#, 300.0), Some(150.0));
        assert!(plan_json("[]", None).is_err());
    }

    #[test]
    fn test_text_window_grows_on_scroll() {
        let mut window = TextWindow::new("a".repeat(120_000));
        assert!(window.has_more());
        assert!(!window.on_scroll(0.0, 800.0, 10_000.0));
        assert!(window.on_scroll(8_000.0, 800.0, 10_000.0));
        assert_eq!(window.visible_len(), 100_000);
        window.load_all();
        assert_eq!(window.progress(), 100);
        assert!(!window.set_settings("not json"));
        assert!(window.html().starts_with("<article"));
    }

    #[test]
    fn test_text_window_uses_reader_config() {
        let mut window =
            TextWindow::from_reader_config("b".repeat(50), r#"{"chunk_size":20,"growth_threshold":0.5}"#).unwrap();
        assert_eq!(window.visible_len(), 20);
        // 40% down the page is short of the 0.5 threshold.
        assert!(!window.on_scroll(200.0, 200.0, 1_000.0));
        assert!(window.on_scroll(400.0, 200.0, 1_000.0));
        assert_eq!(window.visible_len(), 40);

        let window = TextWindow::from_reader_config("b".repeat(50), "{}").unwrap();
        assert_eq!(window.visible_len(), 50);
        assert!(TextWindow::from_reader_config(String::new(), "[]").is_err());
    }
}
