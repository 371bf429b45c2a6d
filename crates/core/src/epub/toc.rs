//! EPUB navigation: EPUB3 nav document, EPUB2 NCX, or the bare spine.
//!
//! Anchors are archive paths (`OEBPS/text/ch1.xhtml#sec2`) so they compare
//! directly against chapter hrefs.

use std::io::{Read, Seek};

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use scraper::{ElementRef, Html, Selector};

use crate::document::{ChapterRef, TocNode};
use crate::epub::container::{attr_value, join_relative, parent_dir, EpubArchive, PackageDocument};

/// Build the table of contents for `chapters`. Entries pointing outside the
/// spine are dropped (their children are kept), so every anchor resolves.
pub fn build_toc<R: Read + Seek>(
    pkg: &PackageDocument,
    archive: &mut EpubArchive<R>,
    chapters: &[ChapterRef],
) -> Vec<TocNode> {
    if let Some(nav) = pkg.nav_item() {
        let path = pkg.resolve_href(&nav.href);
        match archive.read_string(&path) {
            Ok(Some(content)) => {
                if let Some(entries) = parse_nav_document(&content, parent_dir(&path)) {
                    let toc = retain_resolvable(entries, chapters, 1);
                    if !toc.is_empty() {
                        tracing::debug!(path = %path, entries = toc.len(), "Using EPUB3 nav document");
                        return toc;
                    }
                }
            }
            Ok(None) => tracing::debug!(path = %path, "Nav document missing from archive"),
            Err(e) => tracing::warn!("Cannot read nav document {}: {}", path, e),
        }
    }

    if let Some(ncx) = pkg.ncx_item() {
        let path = pkg.resolve_href(&ncx.href);
        match archive.read_string(&path) {
            Ok(Some(content)) => {
                let toc = retain_resolvable(parse_ncx(&content, parent_dir(&path)), chapters, 1);
                if !toc.is_empty() {
                    tracing::debug!(path = %path, entries = toc.len(), "Using NCX navigation");
                    return toc;
                }
            }
            Ok(None) => tracing::debug!(path = %path, "NCX missing from archive"),
            Err(e) => tracing::warn!("Cannot read NCX {}: {}", path, e),
        }
    }

    spine_toc(chapters)
}

/// One entry per spine item.
pub fn spine_toc(chapters: &[ChapterRef]) -> Vec<TocNode> {
    chapters
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            let title = ch
                .title
                .clone()
                .unwrap_or_else(|| format!("Chapter {}", i + 1));
            TocNode::leaf(title, ch.href.clone(), 1)
        })
        .collect()
}

/// Parse an EPUB3 navigation document. `base_dir` is the nav file's directory
/// inside the archive. Returns `None` when there is no usable `<nav>` list.
pub fn parse_nav_document(content: &str, base_dir: &str) -> Option<Vec<TocNode>> {
    let document = Html::parse_document(content);
    let nav_selector = Selector::parse("nav").ok()?;

    let navs: Vec<ElementRef> = document.select(&nav_selector).collect();
    let nav = navs
        .iter()
        .find(|n| {
            n.value()
                .attr("epub:type")
                .map_or(false, |t| t.split_whitespace().any(|t| t == "toc"))
                || n.value().attr("role") == Some("doc-toc")
        })
        .or_else(|| navs.first())?;

    let ol_selector = Selector::parse("ol").ok()?;
    let ol = nav.select(&ol_selector).next()?;

    let mut counter = 0usize;
    Some(parse_nav_list(ol, base_dir, 1, &mut counter))
}

fn child_elements<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.children().filter_map(ElementRef::wrap)
}

fn parse_nav_list(ol: ElementRef<'_>, base_dir: &str, level: u8, counter: &mut usize) -> Vec<TocNode> {
    let mut entries = Vec::new();
    for li in child_elements(ol).filter(|e| e.value().name() == "li") {
        *counter += 1;
        let label = child_elements(li).find(|e| matches!(e.value().name(), "a" | "span"));
        let title = label
            .map(|l| l.text().collect::<String>())
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chapter {}", counter));
        let anchor = label
            .and_then(|l| l.value().attr("href"))
            .filter(|h| !h.is_empty())
            .map(|h| join_relative(base_dir, h))
            .unwrap_or_default();

        let children = child_elements(li)
            .find(|e| e.value().name() == "ol")
            .map(|nested| parse_nav_list(nested, base_dir, level.saturating_add(1), counter))
            .unwrap_or_default();

        entries.push(TocNode {
            title,
            anchor,
            level,
            children,
        });
    }
    entries
}

/// Parse an EPUB2 NCX `navMap`. Malformed XML ends the parse with whatever was
/// collected.
pub fn parse_ncx(content: &str, base_dir: &str) -> Vec<TocNode> {
    struct Frame {
        ordinal: usize,
        title: String,
        src: String,
        children: Vec<TocNode>,
    }

    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();
    let mut roots = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut counter = 0usize;
    let mut in_label_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    counter += 1;
                    stack.push(Frame {
                        ordinal: counter,
                        title: String::new(),
                        src: String::new(),
                        children: Vec::new(),
                    });
                }
                b"text" => in_label_text = !stack.is_empty(),
                b"content" => {
                    if let (Some(frame), Some(src)) = (stack.last_mut(), attr_value(e, b"src")) {
                        frame.src = src;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"content" => {
                if let (Some(frame), Some(src)) = (stack.last_mut(), attr_value(e, b"src")) {
                    frame.src = src;
                }
            }
            Ok(Event::Text(ref e)) if in_label_text => {
                if let (Some(frame), Ok(text)) = (stack.last_mut(), e.unescape()) {
                    frame.title.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"text" => in_label_text = false,
                b"navPoint" => {
                    if let Some(frame) = stack.pop() {
                        let title = frame.title.split_whitespace().collect::<Vec<_>>().join(" ");
                        let node = TocNode {
                            title: if title.is_empty() {
                                format!("Chapter {}", frame.ordinal)
                            } else {
                                title
                            },
                            anchor: if frame.src.is_empty() {
                                String::new()
                            } else {
                                join_relative(base_dir, &frame.src)
                            },
                            level: (stack.len() + 1).min(u8::MAX as usize) as u8,
                            children: frame.children,
                        };
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(node),
                            None => roots.push(node),
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Malformed NCX, keeping {} entries: {}", roots.len(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    roots
}

/// Map an anchor onto the spine, returning its canonical form. Anchors that
/// only match after percent-decoding are rewritten to the decoded path.
fn canonical_anchor(anchor: &str, chapters: &[ChapterRef]) -> Option<String> {
    let (path, fragment) = match anchor.split_once('#') {
        Some((p, f)) => (p, Some(f)),
        None => (anchor, None),
    };
    if path.is_empty() {
        return None;
    }
    if chapters.iter().any(|c| c.href == path) {
        return Some(anchor.to_string());
    }

    let decoded = percent_encoding::percent_decode_str(path).decode_utf8().ok()?;
    chapters.iter().find(|c| c.href == decoded).map(|c| match fragment {
        Some(f) => format!("{}#{}", c.href, f),
        None => c.href.clone(),
    })
}

fn retain_resolvable(nodes: Vec<TocNode>, chapters: &[ChapterRef], level: u8) -> Vec<TocNode> {
    let mut out = Vec::new();
    for node in nodes {
        match canonical_anchor(&node.anchor, chapters) {
            Some(anchor) => out.push(TocNode {
                title: node.title,
                anchor,
                level,
                children: retain_resolvable(node.children, chapters, level.saturating_add(1)),
            }),
            None => {
                tracing::debug!(anchor = %node.anchor, title = %node.title, "Dropping TOC entry outside the spine");
                out.extend(retain_resolvable(node.children, chapters, level));
            }
        }
    }
    out
}

/// Title of the first TOC entry pointing into `href`.
pub fn title_for_chapter<'a>(toc: &'a [TocNode], href: &str) -> Option<&'a str> {
    let mut nodes = Vec::new();
    for node in toc {
        node.walk(&mut nodes);
    }
    nodes
        .into_iter()
        .find(|n| n.anchor.split('#').next() == Some(href))
        .map(|n| n.title.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chapters(hrefs: &[&str]) -> Vec<ChapterRef> {
        hrefs
            .iter()
            .enumerate()
            .map(|(i, h)| ChapterRef {
                id: format!("c{i}"),
                href: h.to_string(),
                title: None,
            })
            .collect()
    }

    const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc">
    <h1>Contents</h1>
    <ol>
      <li><a href="text/ch1.xhtml">Chapter <em>One</em></a>
        <ol>
          <li><a href="text/ch1.xhtml#s1">Section 1.1</a></li>
        </ol>
      </li>
      <li><span>Part Two</span>
        <ol><li><a href="text/ch2.xhtml"></a></li></ol>
      </li>
    </ol>
  </nav>
</body>
</html>"#;

    #[test]
    fn test_parse_nav_document_prefers_toc_nav() {
        let toc = parse_nav_document(NAV, "OEBPS/").unwrap();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].title, "Chapter One");
        assert_eq!(toc[0].anchor, "OEBPS/text/ch1.xhtml");
        assert_eq!(toc[0].children[0].anchor, "OEBPS/text/ch1.xhtml#s1");
        assert_eq!(toc[0].children[0].level, 2);
        assert_eq!(toc[1].title, "Part Two");
        assert_eq!(toc[1].anchor, "");
        // Fourth list item in document order, label missing.
        assert_eq!(toc[1].children[0].title, "Chapter 4");
    }

    #[test]
    fn test_unresolvable_entries_are_dropped_and_children_promoted() {
        let chapters = chapters(&["OEBPS/text/ch1.xhtml", "OEBPS/text/ch2.xhtml"]);
        let toc = retain_resolvable(parse_nav_document(NAV, "OEBPS/").unwrap(), &chapters, 1);
        let flat: Vec<(&str, u8)> = {
            let mut nodes = Vec::new();
            for n in &toc {
                n.walk(&mut nodes);
            }
            nodes.into_iter().map(|n| (n.anchor.as_str(), n.level)).collect()
        };
        assert_eq!(
            flat,
            vec![
                ("OEBPS/text/ch1.xhtml", 1),
                ("OEBPS/text/ch1.xhtml#s1", 2),
                ("OEBPS/text/ch2.xhtml", 1),
            ]
        );
    }

    #[test]
    fn test_parse_ncx_nested() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>Prologue</text></navLabel>
      <content src="ch1.xhtml"/>
      <navPoint id="n2" playOrder="2">
        <navLabel><text>Scene &amp; Setting</text></navLabel>
        <content src="ch1.xhtml#scene"/>
      </navPoint>
    </navPoint>
    <navPoint id="n3" playOrder="3">
      <navLabel><text></text></navLabel>
      <content src="ch2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;
        let toc = parse_ncx(ncx, "OEBPS/");
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].title, "Prologue");
        assert_eq!(toc[0].anchor, "OEBPS/ch1.xhtml");
        assert_eq!(toc[0].children[0].title, "Scene & Setting");
        assert_eq!(toc[0].children[0].level, 2);
        assert_eq!(toc[1].title, "Chapter 3");
    }

    #[test]
    fn test_percent_encoded_anchor_is_canonicalized() {
        let chapters = chapters(&["OEBPS/my chapter.xhtml"]);
        assert_eq!(
            canonical_anchor("OEBPS/my%20chapter.xhtml#p1", &chapters).as_deref(),
            Some("OEBPS/my chapter.xhtml#p1")
        );
        assert_eq!(canonical_anchor("OEBPS/other.xhtml", &chapters), None);
        assert_eq!(canonical_anchor("", &chapters), None);
    }

    #[test]
    fn test_spine_toc_titles() {
        let mut chs = chapters(&["a.xhtml", "b.xhtml"]);
        chs[1].title = Some("Known".into());
        let toc = spine_toc(&chs);
        assert_eq!(toc[0].title, "Chapter 1");
        assert_eq!(toc[1].title, "Known");
        assert_eq!(title_for_chapter(&toc, "b.xhtml"), Some("Known"));
    }
}
