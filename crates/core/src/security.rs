//! Archive hardening for uploaded EPUBs: path traversal guards and size limits.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SecurityError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveLimits {
    /// Maximum number of entries allowed in an archive.
    pub max_entries: u64,
    /// Maximum decompressed size of a single entry in bytes.
    pub max_entry_size_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_entry_size_bytes: 200 * 1024 * 1024, // 200 MB
        }
    }
}

/// Reject archive entry paths that are absolute or climb out of the archive root.
pub fn check_path_traversal(entry_path: &str) -> Result<(), SecurityError> {
    if entry_path.starts_with('/') || entry_path.starts_with('\\') {
        return Err(SecurityError::PathTraversal {
            path: entry_path.to_string(),
        });
    }

    // Windows drive prefix (e.g. C:\)
    if entry_path.len() >= 2 && entry_path.as_bytes()[1] == b':' {
        return Err(SecurityError::PathTraversal {
            path: entry_path.to_string(),
        });
    }

    let climbs = Path::new(entry_path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir));
    if climbs {
        return Err(SecurityError::PathTraversal {
            path: entry_path.to_string(),
        });
    }

    Ok(())
}

pub fn check_entry_count(count: u64, limits: &ArchiveLimits) -> Result<(), SecurityError> {
    if count > limits.max_entries {
        return Err(SecurityError::TooManyFiles {
            count,
            limit: limits.max_entries,
        });
    }
    Ok(())
}

pub fn check_entry_size(
    name: &str,
    size_bytes: u64,
    limits: &ArchiveLimits,
) -> Result<(), SecurityError> {
    if size_bytes > limits.max_entry_size_bytes {
        return Err(SecurityError::OversizedEntry {
            name: name.to_string(),
            size_mb: size_bytes / (1024 * 1024),
            limit_mb: limits.max_entry_size_bytes / (1024 * 1024),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_safe_paths() {
        assert!(check_path_traversal("OEBPS/content.opf").is_ok());
        assert!(check_path_traversal("META-INF/container.xml").is_ok());
        assert!(check_path_traversal("OEBPS/images/cover.jpg").is_ok());
    }

    #[test]
    fn test_path_traversal_attacks() {
        assert!(check_path_traversal("../../../etc/passwd").is_err());
        assert!(check_path_traversal("OEBPS/../../etc/shadow").is_err());
        assert!(check_path_traversal("/etc/passwd").is_err());
        assert!(check_path_traversal("\\Windows\\System32\\config").is_err());
        assert!(check_path_traversal("C:\\Windows\\System32").is_err());
    }

    #[test]
    fn test_entry_count_limit() {
        let limits = ArchiveLimits::default();
        assert!(check_entry_count(10_000, &limits).is_ok());
        assert!(check_entry_count(10_001, &limits).is_err());
    }

    #[test]
    fn test_entry_size_limit() {
        let limits = ArchiveLimits::default();
        assert!(check_entry_size("cover.jpg", 1024 * 1024, &limits).is_ok());
        let err = check_entry_size("huge.png", 201 * 1024 * 1024, &limits).unwrap_err();
        match err {
            SecurityError::OversizedEntry { size_mb, limit_mb, .. } => {
                assert_eq!(size_mb, 201);
                assert_eq!(limit_mb, 200);
            }
            _ => panic!("Expected OversizedEntry error"),
        }
    }
}
