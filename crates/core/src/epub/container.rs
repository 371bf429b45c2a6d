//! Container resolution: ZIP → `META-INF/container.xml` → OPF package document.

use std::io::{Cursor, Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader as XmlReader;
use serde::Serialize;

use crate::error::EpubError;
use crate::security::{self, ArchiveLimits};

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// An opened EPUB archive with bounded, traversal-checked entry reads.
pub struct EpubArchive<R> {
    zip: zip::ZipArchive<R>,
    limits: ArchiveLimits,
}

impl<'a> EpubArchive<Cursor<&'a [u8]>> {
    pub fn from_bytes(bytes: &'a [u8], limits: ArchiveLimits) -> Result<Self, EpubError> {
        Self::open(Cursor::new(bytes), limits)
    }
}

impl<R: Read + Seek> EpubArchive<R> {
    pub fn open(input: R, limits: ArchiveLimits) -> Result<Self, EpubError> {
        let zip = zip::ZipArchive::new(input)
            .map_err(|e| EpubError::InvalidContainer(format!("not a ZIP archive: {e}")))?;
        security::check_entry_count(zip.len() as u64, &limits)?;
        Ok(Self { zip, limits })
    }

    /// Read an entry. `Ok(None)` means the archive has no entry at `path`.
    pub fn read_bytes(&mut self, path: &str) -> Result<Option<Vec<u8>>, EpubError> {
        security::check_path_traversal(path)?;
        let mut file = match self.zip.by_name(path) {
            Ok(f) => f,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(EpubError::InvalidContainer(format!(
                    "cannot open {path}: {e}"
                )))
            }
        };
        security::check_entry_size(path, file.size(), &self.limits)?;

        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(Some(buf))
    }

    pub fn read_string(&mut self, path: &str) -> Result<Option<String>, EpubError> {
        Ok(self
            .read_bytes(path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Value of one `<metadata>` child. Dublin Core elements are usually plain
/// text; anything carrying attributes is kept as a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Node {
        attributes: Vec<(String, String)>,
        text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    /// Qualified element name as written, e.g. `dc:title` or `meta`.
    pub name: String,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            MetadataValue::Text(t) => Some(t.as_str()),
            MetadataValue::Node { text, .. } => text.as_deref(),
        }
    }

    /// Attribute lookup by qualified or local name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        match &self.value {
            MetadataValue::Text(_) => None,
            MetadataValue::Node { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == key || local_part(k) == key)
                .map(|(_, v)| v.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn has_property(&self, token: &str) -> bool {
        self.properties
            .as_deref()
            .map_or(false, |p| p.split_whitespace().any(|t| t == token))
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

/// Parsed OPF package document.
#[derive(Debug, Clone, Serialize)]
pub struct PackageDocument {
    /// Archive path of the OPF file.
    pub opf_path: String,
    pub metadata: Vec<MetadataEntry>,
    pub manifest: Vec<ManifestItem>,
    /// Spine idrefs in reading order.
    pub spine: Vec<String>,
    /// `spine@toc`: manifest id of the EPUB2 NCX.
    pub ncx_id: Option<String>,
}

impl PackageDocument {
    /// Directory of the OPF file including the trailing slash, or "" at the root.
    pub fn opf_dir(&self) -> &str {
        self.opf_path
            .rfind('/')
            .map(|i| &self.opf_path[..i + 1])
            .unwrap_or("")
    }

    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// Archive path of an OPF-relative href.
    pub fn resolve_href(&self, href: &str) -> String {
        join_relative(self.opf_dir(), href)
    }

    /// First metadata entry with the given local name (`title`, `creator`, …).
    pub fn first_metadata(&self, local_name: &str) -> Option<&MetadataEntry> {
        self.metadata.iter().find(|e| e.local_name() == local_name)
    }

    /// EPUB3 navigation document.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.has_property("nav"))
    }

    pub fn ncx_item(&self) -> Option<&ManifestItem> {
        self.ncx_id
            .as_deref()
            .and_then(|id| self.manifest_item(id))
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.media_type == "application/x-dtbncx+xml")
            })
    }
}

/// Open the archive's package document. Strictly sequential: container.xml,
/// then the rootfile path, then the OPF itself.
pub fn resolve_package<R: Read + Seek>(
    archive: &mut EpubArchive<R>,
) -> Result<PackageDocument, EpubError> {
    let container = archive
        .read_string(CONTAINER_PATH)?
        .ok_or_else(|| EpubError::InvalidContainer("missing META-INF/container.xml".into()))?;

    let opf_path = find_rootfile_path(&container)?;
    tracing::debug!(opf_path = %opf_path, "Resolved EPUB package path");

    let opf = archive.read_string(&opf_path)?.ok_or_else(|| {
        EpubError::InvalidContainer(format!("package document {opf_path} not found"))
    })?;

    parse_package(&opf, opf_path)
}

fn find_rootfile_path(container: &str) -> Result<String, EpubError> {
    let mut reader = XmlReader::from_str(container);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr_value(e, b"full-path").filter(|p| !p.is_empty()) {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::InvalidContainer(format!(
                    "failed to parse container.xml: {e}"
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Err(EpubError::InvalidContainer(
        "no rootfile full-path in container.xml".into(),
    ))
}

/// Parse OPF XML into metadata entries, manifest and spine.
pub fn parse_package(content: &str, opf_path: String) -> Result<PackageDocument, EpubError> {
    let mut reader = XmlReader::from_str(content);
    let mut buf = Vec::new();

    let mut metadata = Vec::new();
    let mut manifest = Vec::new();
    let mut spine = Vec::new();
    let mut ncx_id = None;

    let mut in_metadata = false;
    // Element currently being collected inside <metadata>, with its nesting depth.
    let mut current: Option<(String, Vec<(String, String)>)> = None;
    let mut current_depth = 0usize;
    let mut current_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.local_name();
                if current.is_some() {
                    // Nested markup inside a metadata value contributes text only.
                    current_depth += 1;
                } else if in_metadata {
                    current = Some((qualified_name(e), attributes(e)));
                    current_depth = 1;
                    current_text.clear();
                } else {
                    match local.as_ref() {
                        b"metadata" => in_metadata = true,
                        b"item" => manifest.extend(manifest_item(e)),
                        b"spine" => ncx_id = attr_value(e, b"toc"),
                        b"itemref" => spine.extend(attr_value(e, b"idref")),
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(ref e)) if current.is_none() => {
                if in_metadata {
                    metadata.push(MetadataEntry {
                        name: qualified_name(e),
                        value: make_value(attributes(e), None),
                    });
                } else {
                    match e.local_name().as_ref() {
                        b"item" => manifest.extend(manifest_item(e)),
                        b"itemref" => spine.extend(attr_value(e, b"idref")),
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if current.is_some() {
                    match e.unescape() {
                        Ok(text) => current_text.push_str(&text),
                        Err(_) => current_text.push_str(&String::from_utf8_lossy(e)),
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if current.is_some() {
                    current_text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::End(ref e)) => {
                if current.is_some() {
                    current_depth -= 1;
                    if current_depth == 0 {
                        if let Some((name, attrs)) = current.take() {
                            let text = current_text.trim();
                            let text = (!text.is_empty()).then(|| text.to_string());
                            metadata.push(MetadataEntry {
                                name,
                                value: make_value(attrs, text),
                            });
                        }
                        current_text.clear();
                    }
                } else if e.local_name().as_ref() == b"metadata" {
                    in_metadata = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::InvalidContainer(format!(
                    "failed to parse package document: {e}"
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(PackageDocument {
        opf_path,
        metadata,
        manifest,
        spine,
        ncx_id,
    })
}

fn make_value(attributes: Vec<(String, String)>, text: Option<String>) -> MetadataValue {
    if attributes.is_empty() {
        MetadataValue::Text(text.unwrap_or_default())
    } else {
        MetadataValue::Node { attributes, text }
    }
}

fn manifest_item(e: &BytesStart<'_>) -> Option<ManifestItem> {
    let id = attr_value(e, b"id")?;
    Some(ManifestItem {
        id,
        href: attr_value(e, b"href").unwrap_or_default(),
        media_type: attr_value(e, b"media-type").unwrap_or_default(),
        properties: attr_value(e, b"properties"),
    })
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            (key, value)
        })
        .collect()
}

/// Attribute value by local name, entity-unescaped.
pub(crate) fn attr_value(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == local)
        .map(|attr| {
            attr.unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned())
        })
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Join a directory (with trailing slash, or "") and a relative href,
/// collapsing `.` and `..` segments.
pub fn join_relative(dir: &str, href: &str) -> String {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for part in href.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Directory part of an archive path, with trailing slash.
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i + 1]).unwrap_or("")
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use pretty_assertions::assert_eq;

    fn open(bytes: &[u8]) -> Result<PackageDocument, EpubError> {
        let mut archive = EpubArchive::from_bytes(bytes, ArchiveLimits::default())?;
        resolve_package(&mut archive)
    }

    #[test]
    fn test_resolves_package_document() {
        let opf = opf(
            r#"<dc:title>Dune</dc:title>
<dc:creator opf:role="aut">Frank Herbert</dc:creator>
<meta name="cover" content="cover-img"/>"#,
            r#"<item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
<item id="cover-img" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>"#,
            r#"<itemref idref="ch1"/>"#,
        );
        let epub = build_epub(&[
            ("META-INF/container.xml", CONTAINER.as_bytes()),
            ("OEBPS/content.opf", opf.as_bytes()),
        ]);

        let pkg = open(&epub).unwrap();
        assert_eq!(pkg.opf_dir(), "OEBPS/");
        assert_eq!(pkg.spine, vec!["ch1".to_string()]);
        assert_eq!(pkg.manifest.len(), 2);
        assert!(pkg.manifest[1].has_property("cover-image"));

        let title = pkg.first_metadata("title").unwrap();
        assert_eq!(title.name, "dc:title");
        assert_eq!(title.value, MetadataValue::Text("Dune".into()));

        let creator = pkg.first_metadata("creator").unwrap();
        assert_eq!(creator.text(), Some("Frank Herbert"));
        assert_eq!(creator.attr("role"), Some("aut"));

        let meta = pkg.first_metadata("meta").unwrap();
        assert_eq!(meta.attr("name"), Some("cover"));
        assert_eq!(meta.attr("content"), Some("cover-img"));
        assert_eq!(meta.text(), None);
    }

    #[test]
    fn test_missing_container_is_invalid() {
        let epub = build_epub(&[("OEBPS/content.opf", b"<package/>")]);
        assert!(matches!(open(&epub), Err(EpubError::InvalidContainer(_))));
    }

    #[test]
    fn test_container_without_rootfile_is_invalid() {
        let epub = build_epub(&[(
            "META-INF/container.xml",
            b"<container><rootfiles/></container>",
        )]);
        assert!(matches!(open(&epub), Err(EpubError::InvalidContainer(_))));
    }

    #[test]
    fn test_missing_opf_is_invalid() {
        let epub = build_epub(&[("META-INF/container.xml", CONTAINER.as_bytes())]);
        assert!(matches!(open(&epub), Err(EpubError::InvalidContainer(_))));
    }

    #[test]
    fn test_not_a_zip_is_invalid() {
        assert!(matches!(
            EpubArchive::from_bytes(b"plain text", ArchiveLimits::default()),
            Err(EpubError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_metadata_with_nested_markup_keeps_text() {
        let pkg = parse_package(
            &opf(
                r#"<dc:description>Hello <b>bold</b> world</dc:description>"#,
                "",
                "",
            ),
            "content.opf".into(),
        )
        .unwrap();
        assert_eq!(pkg.first_metadata("description").unwrap().text(), Some("Hello bold world"));
        assert_eq!(pkg.opf_dir(), "");
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("OEBPS/", "images/c.jpg"), "OEBPS/images/c.jpg");
        assert_eq!(join_relative("", "c.jpg"), "c.jpg");
        assert_eq!(join_relative("OEBPS/text/", "../images/c.jpg"), "OEBPS/images/c.jpg");
        assert_eq!(join_relative("OEBPS/", "./ch1.xhtml#p2"), "OEBPS/ch1.xhtml#p2");
    }
}
