//! Cover image resolution.
//!
//! Real-world EPUBs declare their cover inconsistently, so the cover is found
//! through three tiers tried in order, the first tier that names an id wins:
//!
//! 1. `<meta name="cover" content="ID"/>` in the package metadata.
//! 2. A manifest item whose `properties` contain `cover-image`.
//! 3. An image manifest item whose id contains `cover` (case-insensitive).
//!
//! A missing or unreadable cover is a normal outcome and yields `None`.

use std::io::{Read, Seek};

use crate::epub::container::{EpubArchive, ManifestItem, PackageDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl CoverImage {
    /// File extension derived from the MIME subtype (`image/png` → `png`).
    pub fn extension(&self) -> &str {
        self.mime_type
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .map(|s| s.split('+').next().unwrap_or(s))
            .unwrap_or("jpg")
    }
}

/// Which tier picked the cover id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverTier {
    MetaCover,
    CoverImageProperty,
    IdHeuristic,
}

/// A manifest item seen from the cover resolver's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverCandidate {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub is_declared_cover: bool,
    pub has_cover_property: bool,
    pub id_looks_like_cover: bool,
}

impl CoverCandidate {
    fn from_item(item: &ManifestItem, declared_id: Option<&str>) -> Self {
        Self {
            id: item.id.clone(),
            href: item.href.clone(),
            media_type: item.media_type.clone(),
            is_declared_cover: declared_id == Some(item.id.as_str()),
            has_cover_property: item.has_property("cover-image"),
            id_looks_like_cover: item.id.to_lowercase().contains("cover"),
        }
    }
}

/// The id named by the first `<meta name="cover">`, if any.
pub fn declared_cover_id(pkg: &PackageDocument) -> Option<&str> {
    pkg.metadata
        .iter()
        .filter(|e| e.local_name() == "meta")
        .find(|e| e.attr("name") == Some("cover"))
        .and_then(|e| e.attr("content"))
}

pub fn cover_candidates(pkg: &PackageDocument) -> Vec<CoverCandidate> {
    let declared = declared_cover_id(pkg);
    pkg.manifest
        .iter()
        .map(|item| CoverCandidate::from_item(item, declared))
        .collect()
}

/// Pick the cover id. Does not check that the id exists in the manifest.
pub fn choose_cover_id(pkg: &PackageDocument) -> Option<(String, CoverTier)> {
    if let Some(id) = declared_cover_id(pkg) {
        return Some((id.to_string(), CoverTier::MetaCover));
    }

    let candidates = cover_candidates(pkg);
    if let Some(c) = candidates.iter().find(|c| c.has_cover_property) {
        return Some((c.id.clone(), CoverTier::CoverImageProperty));
    }

    candidates
        .iter()
        .find(|c| c.id_looks_like_cover && c.media_type.starts_with("image/"))
        .map(|c| (c.id.clone(), CoverTier::IdHeuristic))
}

/// Resolve and read the cover image. Every failure is absorbed into `None`.
pub fn resolve_cover<R: Read + Seek>(
    pkg: &PackageDocument,
    archive: &mut EpubArchive<R>,
) -> Option<CoverImage> {
    let (id, tier) = choose_cover_id(pkg)?;
    let item = pkg.manifest_item(&id)?;
    if !item.is_image() || item.href.is_empty() {
        tracing::debug!(id = %id, ?tier, media_type = %item.media_type, "Cover item is not a usable image");
        return None;
    }

    let path = pkg.resolve_href(&item.href);
    let bytes = read_with_decoded_fallback(archive, &path)?;
    tracing::debug!(id = %id, ?tier, path = %path, size = bytes.len(), "Resolved EPUB cover");

    Some(CoverImage {
        bytes,
        mime_type: item.media_type.clone(),
    })
}

/// Manifest hrefs and archive entry names disagree on percent-encoding in the
/// wild; try the path as written, then URL-decoded.
fn read_with_decoded_fallback<R: Read + Seek>(
    archive: &mut EpubArchive<R>,
    path: &str,
) -> Option<Vec<u8>> {
    match archive.read_bytes(path) {
        Ok(Some(bytes)) => return Some(bytes),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Cannot read cover {}: {}", path, e);
            return None;
        }
    }

    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .ok()?
        .into_owned();
    if decoded == path {
        return None;
    }
    match archive.read_bytes(&decoded) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Cannot read cover {}: {}", decoded, e);
            None
        }
    }
}
