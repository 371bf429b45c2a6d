//! Incremental rendering of large plain-text documents.
//!
//! A [`ChunkedText`] exposes a growing prefix ("window") of the full text.
//! The reading surface asks a [`GrowthTrigger`] whether the reader has
//! scrolled far enough; at most one growth is in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::encoding::escape_html;
use crate::settings::ReaderSettings;

/// Characters revealed per growth step.
pub const CHUNK_SIZE: usize = 50_000;

/// Fraction of the scrollable height that triggers the next chunk.
pub const GROWTH_THRESHOLD: f64 = 0.8;

/// Full text plus the length of the currently visible prefix. Lengths are
/// counted in characters, never splitting a code point.
#[derive(Debug, Clone)]
pub struct ChunkedText {
    full: String,
    total_chars: usize,
    chunk_size: usize,
    visible_chars: usize,
    visible_bytes: usize,
}

impl Default for ChunkedText {
    fn default() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }
}

impl ChunkedText {
    pub fn new(full_text: impl Into<String>) -> Self {
        let mut text = Self::default();
        text.reset(full_text);
        text
    }

    /// Empty window with a custom step. A zero step is treated as one.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            full: String::new(),
            total_chars: 0,
            chunk_size: chunk_size.max(1),
            visible_chars: 0,
            visible_bytes: 0,
        }
    }

    /// Replace the document and show its first chunk.
    pub fn reset(&mut self, full_text: impl Into<String>) {
        self.full = full_text.into();
        self.total_chars = self.full.chars().count();
        self.visible_chars = 0;
        self.visible_bytes = 0;
        self.advance(self.chunk_size);
    }

    pub fn visible_text(&self) -> &str {
        &self.full[..self.visible_bytes]
    }

    pub fn full_text(&self) -> &str {
        &self.full
    }

    pub fn visible_len(&self) -> usize {
        self.visible_chars
    }

    pub fn total_len(&self) -> usize {
        self.total_chars
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn has_more(&self) -> bool {
        self.visible_chars < self.total_chars
    }

    /// Reveal the next chunk. No-op once everything is visible.
    pub fn grow(&mut self) {
        if self.has_more() {
            self.advance(self.chunk_size);
        }
    }

    /// Reveal the rest of the document.
    pub fn load_all(&mut self) {
        self.visible_chars = self.total_chars;
        self.visible_bytes = self.full.len();
    }

    /// Share of the document visible, 0–100. An empty document is fully shown.
    pub fn progress_percent(&self) -> u8 {
        if self.total_chars == 0 {
            return 100;
        }
        (self.visible_chars as f64 / self.total_chars as f64 * 100.0).round() as u8
    }

    /// Apply a growth granted by [`GrowthTrigger::observe`] and release the
    /// trigger's guard.
    pub fn commit(&mut self, ticket: GrowthTicket) {
        self.grow();
        drop(ticket);
    }

    fn advance(&mut self, chars: usize) {
        let rest = &self.full[self.visible_bytes..];
        match rest.char_indices().nth(chars) {
            Some((offset, _)) => {
                self.visible_bytes += offset;
                self.visible_chars += chars;
            }
            None => {
                self.visible_bytes = self.full.len();
                self.visible_chars = self.total_chars;
            }
        }
    }

    /// Classified paragraphs of the visible text.
    pub fn blocks(&self) -> Vec<TextBlock<'_>> {
        classify(self.visible_text())
    }

    /// HTML for the visible text, styled by `settings`.
    pub fn render_html(&self, settings: &ReaderSettings) -> String {
        render_blocks(&self.blocks(), settings)
    }
}

/// One paragraph of plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum TextBlock<'a> {
    /// Indented multi-line block, shown preformatted.
    Code(&'a str),
    /// Prose; each line is kept and rendered with a line break.
    Prose(Vec<&'a str>),
}

/// Split on runs of two or more newlines, dropping empty pieces.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut paragraphs = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\n' {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < bytes.len() && bytes[i] == b'\n' {
            i += 1;
        }
        if i - run_start >= 2 {
            if start < run_start {
                paragraphs.push(&text[start..run_start]);
            }
            start = i;
        }
    }
    if start < text.len() {
        paragraphs.push(&text[start..]);
    }
    paragraphs
}

/// A paragraph is code-like when every line is empty or indented by two
/// spaces or a tab.
pub fn is_code_like(paragraph: &str) -> bool {
    paragraph
        .split('\n')
        .all(|line| line.is_empty() || line.starts_with("  ") || line.starts_with('\t'))
}

pub fn classify(text: &str) -> Vec<TextBlock<'_>> {
    split_paragraphs(text)
        .into_iter()
        .map(|p| {
            let lines: Vec<&str> = p.split('\n').collect();
            if lines.len() > 1 && is_code_like(p) {
                TextBlock::Code(p)
            } else {
                TextBlock::Prose(lines)
            }
        })
        .collect()
}

pub fn render_blocks(blocks: &[TextBlock<'_>], settings: &ReaderSettings) -> String {
    let mut html = format!(
        "<article class=\"reader-text\" style=\"{}\">\n",
        escape_html(&settings.inline_style())
    );
    for block in blocks {
        match block {
            TextBlock::Code(code) => {
                html.push_str("<pre><code>");
                html.push_str(&escape_html(code));
                html.push_str("</code></pre>\n");
            }
            TextBlock::Prose(lines) => {
                html.push_str("<p>");
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        html.push_str("<br />");
                    }
                    html.push_str(&escape_html(line));
                }
                html.push_str("</p>\n");
            }
        }
    }
    html.push_str("</article>\n");
    html
}

/// Scroll geometry reported by the reading surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    pub viewport_height: f64,
    /// Total document height, including the part inside the viewport.
    pub document_height: f64,
}

impl ScrollMetrics {
    pub fn past_threshold(&self, threshold: f64) -> bool {
        self.scroll_y + self.viewport_height > self.document_height * threshold
    }
}

/// Single-flight guard for scroll-driven growth.
#[derive(Debug)]
pub struct GrowthTrigger {
    threshold: f64,
    in_flight: Arc<AtomicBool>,
}

impl Default for GrowthTrigger {
    fn default() -> Self {
        Self::new(GROWTH_THRESHOLD)
    }
}

impl GrowthTrigger {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Feed one scroll event. Returns a ticket when a growth should run; no
    /// further tickets are issued until that one is committed or dropped.
    pub fn observe(&self, metrics: ScrollMetrics, text: &ChunkedText) -> Option<GrowthTicket> {
        if !text.has_more() || !metrics.past_threshold(self.threshold) {
            return None;
        }
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(GrowthTicket {
            guard: Arc::clone(&self.in_flight),
        })
    }
}

/// Permission to grow once. Releases the trigger when dropped.
#[must_use = "a growth ticket blocks further growth until committed or dropped"]
#[derive(Debug)]
pub struct GrowthTicket {
    guard: Arc<AtomicBool>,
}

impl Drop for GrowthTicket {
    fn drop(&mut self) {
        self.guard.store(false, Ordering::Release);
    }
}
