//! Upload-time metadata extraction: title, author, description and cover.

use serde::Serialize;

use crate::epub::container::{resolve_package, EpubArchive, PackageDocument};
use crate::encoding::normalize_nfc;
use crate::epub::cover::{resolve_cover, CoverImage};
use crate::error::EpubError;
use crate::security::ArchiveLimits;

/// Metadata pre-filled into the book creation form. Every field is optional;
/// an all-empty value is a valid result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpubMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub pubdate: Option<String>,
    #[serde(skip)]
    pub cover: Option<CoverImage>,
}

impl EpubMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.description.is_none()
            && self.publisher.is_none()
            && self.language.is_none()
            && self.pubdate.is_none()
            && self.cover.is_none()
    }

    pub fn cover_mime_type(&self) -> Option<&str> {
        self.cover.as_ref().map(|c| c.mime_type.as_str())
    }
}

/// Extract metadata from raw EPUB bytes. Never fails: a malformed container
/// is logged and yields whatever was gathered so far (usually nothing).
pub fn parse_epub_metadata(bytes: &[u8]) -> EpubMetadata {
    parse_epub_metadata_with(bytes, &ArchiveLimits::default())
}

pub fn parse_epub_metadata_with(bytes: &[u8], limits: &ArchiveLimits) -> EpubMetadata {
    match try_parse(bytes, limits) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!("Error parsing EPUB metadata: {}", e);
            EpubMetadata::default()
        }
    }
}

fn try_parse(bytes: &[u8], limits: &ArchiveLimits) -> Result<EpubMetadata, EpubError> {
    let mut archive = EpubArchive::from_bytes(bytes, limits.clone())?;
    let pkg = resolve_package(&mut archive)?;
    let mut meta = metadata_from_package(&pkg);
    meta.cover = resolve_cover(&pkg, &mut archive);
    Ok(meta)
}

/// Read the descriptive fields from a parsed package document. Only the first
/// element of each kind counts.
pub fn metadata_from_package(pkg: &PackageDocument) -> EpubMetadata {
    let field = |name: &str| {
        pkg.first_metadata(name)
            .and_then(|e| e.text())
            .map(|t| normalize_nfc(t.trim()))
            .filter(|t| !t.is_empty())
    };

    EpubMetadata {
        title: field("title"),
        author: field("creator"),
        description: field("description")
            .map(|d| clean_description(&d))
            .filter(|d| !d.is_empty()),
        publisher: field("publisher"),
        language: field("language"),
        pubdate: field("date"),
        cover: None,
    }
}

/// Strip embedded markup and collapse runs of whitespace to single spaces.
///
/// Only a complete `<...>` run with no other `<` inside counts as a tag; a
/// stray `<` is kept as text.
pub fn clean_description(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(&['<', '>'][..]) {
            Some(close) if after.as_bytes()[close] == b'>' => rest = &after[close + 1..],
            _ => {
                text.push('<');
                rest = after;
            }
        }
    }
    text.push_str(rest);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::container::fixtures::*;
    use pretty_assertions::assert_eq;

    fn epub_with(metadata: &str, manifest: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
        let opf = opf(metadata, manifest, "");
        let mut entries: Vec<(&str, &[u8])> = vec![
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", opf.as_bytes()),
        ];
        entries.extend_from_slice(files);
        build_epub(&entries)
    }

    #[test]
    fn test_extracts_all_fields() {
        let epub = epub_with(
            r#"<dc:title>The Hobbit</dc:title>
<dc:creator opf:role="aut" opf:file-as="Tolkien, J. R. R.">J. R. R. Tolkien</dc:creator>
<dc:creator>Second Author</dc:creator>
<dc:publisher>Allen &amp; Unwin</dc:publisher>
<dc:language>en</dc:language>
<dc:date>1937-09-21</dc:date>
<dc:description>There and back again.</dc:description>"#,
            "",
            &[],
        );
        let meta = parse_epub_metadata(&epub);
        assert_eq!(meta.title.as_deref(), Some("The Hobbit"));
        assert_eq!(meta.author.as_deref(), Some("J. R. R. Tolkien"));
        assert_eq!(meta.publisher.as_deref(), Some("Allen & Unwin"));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert_eq!(meta.pubdate.as_deref(), Some("1937-09-21"));
        assert_eq!(meta.description.as_deref(), Some("There and back again."));
        assert_eq!(meta.cover, None);
    }

    #[test]
    fn test_escaped_markup_in_description_is_stripped() {
        let epub = epub_with(
            "<dc:description>Hello &lt;b&gt;World&lt;/b&gt;   now</dc:description>",
            "",
            &[],
        );
        let meta = parse_epub_metadata(&epub);
        assert_eq!(meta.description.as_deref(), Some("Hello World now"));
    }

    #[test]
    fn test_no_cover_still_has_title_and_author() {
        let epub = epub_with(
            "<dc:title>Untitled Draft</dc:title><dc:creator>Anon</dc:creator>",
            r#"<item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>"#,
            &[],
        );
        let meta = parse_epub_metadata(&epub);
        assert!(meta.cover.is_none());
        assert_eq!(meta.title.as_deref(), Some("Untitled Draft"));
        assert_eq!(meta.author.as_deref(), Some("Anon"));
    }

    #[test]
    fn test_cover_is_attached() {
        let epub = epub_with(
            "<dc:title>Pictures</dc:title>",
            r#"<item id="ci" href="img/c.png" media-type="image/png" properties="cover-image"/>"#,
            &[("OEBPS/img/c.png", b"\x89PNG")],
        );
        let meta = parse_epub_metadata(&epub);
        assert_eq!(meta.cover_mime_type(), Some("image/png"));
        assert_eq!(meta.cover.unwrap().bytes, b"\x89PNG");
    }

    #[test]
    fn test_malformed_epub_yields_empty_metadata() {
        assert!(parse_epub_metadata(b"not a zip at all").is_empty());
        let epub = build_epub(&[("README", b"hello")]);
        assert!(parse_epub_metadata(&epub).is_empty());
    }

    #[test]
    fn test_clean_description() {
        assert_eq!(clean_description("<p>One</p>\n\n<p>Two\tthree</p>"), "One Two three");
        assert_eq!(clean_description("  a   b  "), "a b");
        assert_eq!(clean_description(""), "");
    }

    #[test]
    fn test_clean_description_keeps_stray_angle_brackets() {
        assert_eq!(clean_description("Price < 10 dollars"), "Price < 10 dollars");
        assert_eq!(clean_description("x<3 and <b>y</b>"), "x<3 and y");
        assert_eq!(clean_description("a > b <i>c</i> <"), "a > b c <");
    }

    #[test]
    fn test_description_with_stray_bracket_survives_extraction() {
        let epub = epub_with("<dc:description>Fewer &lt; 10 pages</dc:description>", "", &[]);
        let meta = parse_epub_metadata(&epub);
        assert_eq!(meta.description.as_deref(), Some("Fewer < 10 pages"));
    }
}
