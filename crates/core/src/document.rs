use serde::{Deserialize, Serialize};

/// Formats the reading surface can display. Dispatch over this enum is always
/// an exhaustive `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Markdown,
    Epub,
    Txt,
    Pdf,
}

impl BookFormat {
    /// Map a file extension (with or without the leading dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "epub" => Some(Self::Epub),
            "txt" => Some(Self::Txt),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Some(Self::Markdown),
            "epub" => Some(Self::Epub),
            "txt" | "text" => Some(Self::Txt),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Epub => "epub",
            Self::Txt => "txt",
            Self::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown",
            Self::Epub => "application/epub+zip",
            Self::Txt => "text/plain",
            Self::Pdf => "application/pdf",
        }
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the text of a Markdown or TXT book comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSource {
    Inline(String),
    Url(String),
}

/// A document to open, carrying only what its pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum DocumentSource {
    Markdown { source: TextSource },
    Txt { source: TextSource },
    Epub { url: String },
    Pdf { url: String },
}

impl DocumentSource {
    pub fn format(&self) -> BookFormat {
        match self {
            Self::Markdown { .. } => BookFormat::Markdown,
            Self::Txt { .. } => BookFormat::Txt,
            Self::Epub { .. } => BookFormat::Epub,
            Self::Pdf { .. } => BookFormat::Pdf,
        }
    }

    /// Build a source for a stored book: inline content wins for text formats.
    pub fn for_book(format: BookFormat, url: &str, inline: Option<String>) -> Self {
        let text = || match inline.clone() {
            Some(content) => TextSource::Inline(content),
            None => TextSource::Url(url.to_string()),
        };
        match format {
            BookFormat::Markdown => Self::Markdown { source: text() },
            BookFormat::Txt => Self::Txt { source: text() },
            BookFormat::Epub => Self::Epub { url: url.to_string() },
            BookFormat::Pdf => Self::Pdf { url: url.to_string() },
        }
    }
}

/// Canonical output of every format pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub content: DocumentContent,
    pub table_of_contents: Vec<TocNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum DocumentContent {
    /// Rendered Markdown.
    Html(String),
    /// EPUB spine, in reading order.
    Chapters(Vec<ChapterRef>),
    /// Raw plain text, materialized through `ChunkedText`.
    Text(String),
    /// Opaque to this crate; handed to the PDF renderer.
    Pdf { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    pub id: String,
    /// Archive path of the content document.
    pub href: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub title: String,
    pub anchor: String,
    /// Heading rank for Markdown, nesting depth (1-based) for EPUB.
    pub level: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocNode>,
}

impl TocNode {
    pub fn leaf(title: impl Into<String>, anchor: impl Into<String>, level: u8) -> Self {
        Self {
            title: title.into(),
            anchor: anchor.into(),
            level,
            children: Vec::new(),
        }
    }

    /// Depth-first walk over this node and all descendants.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a TocNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// Find the title of the TOC node whose anchor matches `anchor`.
pub fn find_toc_title<'a>(toc: &'a [TocNode], anchor: &str) -> Option<&'a str> {
    let mut nodes = Vec::new();
    for node in toc {
        node.walk(&mut nodes);
    }
    nodes
        .into_iter()
        .find(|n| n.anchor == anchor)
        .map(|n| n.title.as_str())
}

impl ParsedDocument {
    pub fn empty(content: DocumentContent) -> Self {
        Self {
            content,
            table_of_contents: Vec::new(),
        }
    }

    /// TOC anchors that do not resolve to a location in `content`.
    pub fn unresolved_anchors(&self) -> Vec<String> {
        let mut nodes = Vec::new();
        for node in &self.table_of_contents {
            node.walk(&mut nodes);
        }
        nodes
            .into_iter()
            .filter(|n| !self.resolves(&n.anchor))
            .map(|n| n.anchor.clone())
            .collect()
    }

    fn resolves(&self, anchor: &str) -> bool {
        match &self.content {
            DocumentContent::Html(html) => html.contains(&format!("id=\"{anchor}\"")),
            DocumentContent::Chapters(chapters) => {
                let path = anchor.split('#').next().unwrap_or(anchor);
                chapters.iter().any(|c| c.href == path)
            }
            DocumentContent::Text(_) | DocumentContent::Pdf { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(BookFormat::from_extension(".MD"), Some(BookFormat::Markdown));
        assert_eq!(BookFormat::from_extension("markdown"), Some(BookFormat::Markdown));
        assert_eq!(BookFormat::from_extension("epub"), Some(BookFormat::Epub));
        assert_eq!(BookFormat::from_extension(".txt"), Some(BookFormat::Txt));
        assert_eq!(BookFormat::from_extension("pdf"), Some(BookFormat::Pdf));
        assert_eq!(BookFormat::from_extension("docx"), None);
    }

    #[test]
    fn test_source_for_book_prefers_inline() {
        let src = DocumentSource::for_book(BookFormat::Txt, "/uploads/a.txt", Some("hi".into()));
        assert_eq!(
            src,
            DocumentSource::Txt {
                source: TextSource::Inline("hi".into())
            }
        );
        let src = DocumentSource::for_book(BookFormat::Epub, "/uploads/a.epub", Some("x".into()));
        assert_eq!(src, DocumentSource::Epub { url: "/uploads/a.epub".into() });
    }

    #[test]
    fn test_unresolved_anchors_chapters() {
        let doc = ParsedDocument {
            content: DocumentContent::Chapters(vec![ChapterRef {
                id: "c1".into(),
                href: "OEBPS/ch1.xhtml".into(),
                title: None,
            }]),
            table_of_contents: vec![TocNode {
                title: "One".into(),
                anchor: "OEBPS/ch1.xhtml#start".into(),
                level: 1,
                children: vec![TocNode::leaf("Missing", "OEBPS/ch9.xhtml", 2)],
            }],
        };
        assert_eq!(doc.unresolved_anchors(), vec!["OEBPS/ch9.xhtml".to_string()]);
    }

    #[test]
    fn test_find_toc_title_nested() {
        let toc = vec![TocNode {
            title: "Part".into(),
            anchor: "p.xhtml".into(),
            level: 1,
            children: vec![TocNode::leaf("Intro", "intro", 2)],
        }];
        assert_eq!(find_toc_title(&toc, "intro"), Some("Intro"));
        assert_eq!(find_toc_title(&toc, "nope"), None);
    }
}
