//! EPUB ingestion: container resolution, cover lookup, metadata extraction and
//! the chapter/navigation model used by the reading surface.

pub mod container;
pub mod cover;
pub mod metadata;
pub mod toc;

pub use container::{resolve_package, EpubArchive, ManifestItem, MetadataEntry, MetadataValue, PackageDocument};
pub use cover::{resolve_cover, CoverImage};
pub use metadata::{parse_epub_metadata, parse_epub_metadata_with, EpubMetadata};

use crate::document::{ChapterRef, DocumentContent, ParsedDocument};
use crate::error::EpubError;
use crate::security::ArchiveLimits;

/// Open an EPUB for reading: spine chapters in order plus a navigable TOC.
pub fn load_document(bytes: &[u8]) -> Result<ParsedDocument, EpubError> {
    load_document_with(bytes, &ArchiveLimits::default())
}

pub fn load_document_with(bytes: &[u8], limits: &ArchiveLimits) -> Result<ParsedDocument, EpubError> {
    let mut archive = EpubArchive::from_bytes(bytes, limits.clone())?;
    let pkg = resolve_package(&mut archive)?;

    let mut chapters = spine_chapters(&pkg);
    if chapters.is_empty() {
        return Err(EpubError::InvalidContainer("spine has no readable items".into()));
    }

    let table_of_contents = toc::build_toc(&pkg, &mut archive, &chapters);
    for chapter in &mut chapters {
        chapter.title = toc::title_for_chapter(&table_of_contents, &chapter.href).map(str::to_string);
    }

    tracing::debug!(
        chapters = chapters.len(),
        toc_entries = table_of_contents.len(),
        "Loaded EPUB document"
    );

    Ok(ParsedDocument {
        content: DocumentContent::Chapters(chapters),
        table_of_contents,
    })
}

/// Spine items resolved to archive paths. Idrefs missing from the manifest are
/// skipped.
pub fn spine_chapters(pkg: &PackageDocument) -> Vec<ChapterRef> {
    pkg.spine
        .iter()
        .filter_map(|idref| match pkg.manifest_item(idref) {
            Some(item) if !item.href.is_empty() => Some(ChapterRef {
                id: item.id.clone(),
                href: pkg.resolve_href(&item.href),
                title: None,
            }),
            _ => {
                tracing::debug!(idref = %idref, "Spine item not in manifest");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::container::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
<item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
<item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>"#;

    const SPINE: &str = r#"<itemref idref="ch1"/><itemref idref="ghost"/><itemref idref="ch2"/>"#;

    const NCX: &str = r#"<ncx><navMap>
<navPoint id="a"><navLabel><text>From NCX</text></navLabel><content src="text/ch1.xhtml"/></navPoint>
</navMap></ncx>"#;

    fn book(manifest: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
        let opf = opf("<dc:title>T</dc:title>", manifest, SPINE);
        let mut entries: Vec<(&str, &[u8])> = vec![
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", opf.as_bytes()),
            ("OEBPS/text/ch1.xhtml", b"<html/>"),
            ("OEBPS/text/ch2.xhtml", b"<html/>"),
        ];
        entries.extend_from_slice(files);
        build_epub(&entries)
    }

    #[test]
    fn test_load_document_uses_nav() {
        let nav = r#"<html><body><nav epub:type="toc"><ol>
<li><a href="text/ch1.xhtml">Opening</a></li>
<li><a href="text/ch2.xhtml#mid">Middle</a></li>
<li><a href="https://example.com/">Elsewhere</a></li>
</ol></nav></body></html>"#;
        let epub = book(MANIFEST, &[("OEBPS/nav.xhtml", nav.as_bytes()), ("OEBPS/toc.ncx", NCX.as_bytes())]);
        let doc = load_document(&epub).unwrap();

        let DocumentContent::Chapters(chapters) = &doc.content else {
            panic!("expected chapters");
        };
        let hrefs: Vec<&str> = chapters.iter().map(|c| c.href.as_str()).collect();
        assert_eq!(hrefs, vec!["OEBPS/text/ch1.xhtml", "OEBPS/text/ch2.xhtml"]);
        assert_eq!(chapters[0].title.as_deref(), Some("Opening"));
        assert_eq!(chapters[1].title.as_deref(), Some("Middle"));

        assert_eq!(doc.table_of_contents.len(), 2);
        assert_eq!(doc.table_of_contents[1].anchor, "OEBPS/text/ch2.xhtml#mid");
        assert!(doc.unresolved_anchors().is_empty());
    }

    #[test]
    fn test_load_document_falls_back_to_ncx() {
        let epub = book(MANIFEST, &[("OEBPS/toc.ncx", NCX.as_bytes())]);
        let doc = load_document(&epub).unwrap();
        assert_eq!(doc.table_of_contents.len(), 1);
        assert_eq!(doc.table_of_contents[0].title, "From NCX");
        assert!(doc.unresolved_anchors().is_empty());
    }

    #[test]
    fn test_load_document_falls_back_to_spine() {
        let manifest = r#"<item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
<item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>"#;
        let doc = load_document(&book(manifest, &[])).unwrap();
        let titles: Vec<&str> = doc.table_of_contents.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Chapter 1", "Chapter 2"]);
        assert!(doc.unresolved_anchors().is_empty());
    }

    #[test]
    fn test_empty_spine_is_invalid() {
        let opf = opf("", "", "");
        let epub = build_epub(&[
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", opf.as_bytes()),
        ]);
        assert!(matches!(load_document(&epub), Err(EpubError::InvalidContainer(_))));
    }
}
