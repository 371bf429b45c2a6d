//! Markdown → HTML with heading anchors, self-links and highlighted code.
//!
//! Runs as a single pass over pulldown-cmark events: headings and code blocks
//! are buffered and re-emitted as raw HTML, everything else (including raw
//! HTML in the source) passes through untouched.

mod frontmatter;
pub mod highlight;
pub mod slug;

pub use frontmatter::parse_frontmatter;
pub use slug::{slugify, Slugger};

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentContent, ParsedDocument, TocNode};

/// Deepest heading level surfaced in the table of contents.
pub const TOC_MAX_LEVEL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub id: String,
    pub text: String,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMarkdown {
    pub html: String,
    pub headings: Vec<Heading>,
}

impl RenderedMarkdown {
    pub fn into_document(self) -> ParsedDocument {
        let table_of_contents = self
            .headings
            .iter()
            .map(|h| TocNode::leaf(h.text.clone(), h.id.clone(), h.level))
            .collect();
        ParsedDocument {
            content: DocumentContent::Html(self.html),
            table_of_contents,
        }
    }
}

pub fn options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Render a whole document. Never fails; malformed input renders as text.
pub fn render_markdown(source: &str) -> RenderedMarkdown {
    let mut slugger = Slugger::new();
    let mut headings = Vec::new();
    let mut events: Vec<Event<'_>> = Vec::new();

    let mut heading: Option<(u8, Vec<Event<'_>>)> = None;
    let mut code: Option<(Option<String>, String)> = None;

    for event in Parser::new_ext(source, options()) {
        if let Some((_, body)) = code.as_mut() {
            match event {
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, body)) = code.take() {
                        let block = highlight::highlight_block(&body, lang.as_deref());
                        push_block(&mut events, &mut heading, block);
                    }
                }
                Event::Text(text) => body.push_str(&text),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(Tag::Heading { level, .. }) if heading.is_none() => {
                heading = Some((level as u8, Vec::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, inner)) = heading.take() {
                    let text = plain_text(&inner);
                    let id = slugger.slug(&text);
                    if level <= TOC_MAX_LEVEL && !text.is_empty() {
                        headings.push(Heading {
                            id: id.clone(),
                            text,
                            level,
                        });
                    }
                    events.push(Event::Html(CowStr::from(format!(
                        "<h{level} id=\"{id}\"><a href=\"#{id}\">"
                    ))));
                    events.extend(inner);
                    events.push(Event::Html(CowStr::from(format!("</a></h{level}>\n"))));
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                code = Some((lang, String::new()));
            }
            other => match heading.as_mut() {
                Some((_, inner)) => inner.push(other),
                None => events.push(other),
            },
        }
    }

    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());

    RenderedMarkdown {
        html: out,
        headings,
    }
}

/// Frontmatter is stripped before rendering; its fields are not shown.
pub fn load_document(source: &str) -> ParsedDocument {
    let (_, body) = parse_frontmatter(source);
    render_markdown(body).into_document()
}

fn push_block<'a>(events: &mut Vec<Event<'a>>, heading: &mut Option<(u8, Vec<Event<'a>>)>, html: String) {
    let event = Event::Html(CowStr::from(html));
    match heading.as_mut() {
        Some((_, inner)) => inner.push(event),
        None => events.push(event),
    }
}

/// Concatenated text of a heading's inline content.
fn plain_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            _ => {}
        }
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heading_round_trip() {
        let out = render_markdown("## Hello World\n\nBody text.\n");
        assert_eq!(
            out.headings,
            vec![Heading {
                id: "hello-world".into(),
                text: "Hello World".into(),
                level: 2,
            }]
        );
        assert!(out
            .html
            .contains("<h2 id=\"hello-world\"><a href=\"#hello-world\">Hello World</a></h2>"));
        assert!(out.html.contains("<p>Body text.</p>"));
    }

    #[test]
    fn test_heading_with_inline_formatting_yields_plain_text() {
        let out = render_markdown("# The *quick* `fox`\n");
        assert_eq!(out.headings[0].text, "The quick fox");
        assert_eq!(out.headings[0].id, "the-quick-fox");
        assert!(out.html.contains("<em>quick</em>"));
        assert!(out.html.contains("<code>fox</code>"));
    }

    #[test]
    fn test_only_levels_one_to_three_are_collected() {
        let out = render_markdown("# A\n## B\n### C\n#### D\n##### E\n");
        let levels: Vec<u8> = out.headings.iter().map(|h| h.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        // Deeper headings still get ids.
        assert!(out.html.contains("<h4 id=\"d\">"));
        assert!(out.html.contains("<h5 id=\"e\">"));
    }

    #[test]
    fn test_duplicate_headings_get_unique_ids() {
        let out = render_markdown("## Notes\n\n## Notes\n");
        let ids: Vec<&str> = out.headings.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["notes", "notes-1"]);
    }

    #[test]
    fn test_raw_html_passes_through() {
        let out = render_markdown("<div class=\"note\">kept</div>\n\nInline <kbd>Ctrl</kbd>.\n");
        assert!(out.html.contains("<div class=\"note\">kept</div>"));
        assert!(out.html.contains("<kbd>Ctrl</kbd>"));
    }

    #[test]
    fn test_gfm_extensions() {
        let out = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~\n\n- [x] done\n");
        assert!(out.html.contains("<table>"));
        assert!(out.html.contains("<del>gone</del>"));
        assert!(out.html.contains("type=\"checkbox\""));
    }

    #[test]
    fn test_code_blocks_are_highlighted_or_degraded() {
        let out = render_markdown("```rust\nlet x = 1;\n```\n\n```mystery\n<tag>\n```\n");
        assert!(out.html.contains("<pre><code class=\"language-rust\">"));
        assert!(out.html.contains("&lt;tag&gt;"));
        assert!(out.headings.is_empty());
    }

    #[test]
    fn test_document_toc_resolves() {
        let doc = load_document("---\ntitle: T\n---\n# One\n\n## Two\n");
        assert_eq!(doc.table_of_contents.len(), 2);
        assert!(doc.unresolved_anchors().is_empty());
        let DocumentContent::Html(html) = &doc.content else {
            panic!("expected html");
        };
        assert!(!html.contains("title: T"));
    }

    #[test]
    fn test_empty_source() {
        let out = render_markdown("");
        assert_eq!(out.html, "");
        assert!(out.headings.is_empty());
    }
}
