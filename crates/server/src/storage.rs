//! Directory-backed upload storage. Files land under one root and are served
//! back as `/uploads/<name>`.

use std::path::{Path, PathBuf};

use bookshelf_core::ingest::{IngestedUpload, UPLOADS_PREFIX};

#[derive(Clone, Debug)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an ingested upload, and its extracted cover if any.
    pub fn save(&self, upload: &IngestedUpload, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::write(self.safe_path(&upload.filename)?, bytes)?;
        if let Some(cover) = &upload.cover {
            // The book is already stored; a cover that fails to write only
            // loses the pre-filled cover URL.
            if let Err(e) = self
                .safe_path(&cover.filename)
                .and_then(|p| std::fs::write(p, &cover.image.bytes))
            {
                tracing::warn!("Failed to store cover {}: {}", cover.filename, e);
            }
        }
        Ok(())
    }

    /// Read a stored file by its public URL (`/uploads/<name>`) or bare name.
    pub fn read_url(&self, url: &str) -> std::io::Result<Vec<u8>> {
        let name = url.strip_prefix(UPLOADS_PREFIX).unwrap_or(url);
        let decoded = percent_encoding::percent_decode_str(name)
            .decode_utf8()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name encoding"))?;
        std::fs::read(self.safe_path(&decoded)?)
    }

    /// Resolve a name to a path under root (no path traversal).
    fn safe_path(&self, name: &str) -> std::io::Result<PathBuf> {
        if name.is_empty() || name.contains("..") || name.contains(['/', '\\']) || Path::new(name).is_absolute() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid file name"));
        }
        let path = self.root.join(name);
        if path.exists() {
            let canonical_root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
            let canonical_path = path.canonicalize().map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "path escapes upload root")
            })?;
            if !canonical_path.starts_with(&canonical_root) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "path escapes upload root",
                ));
            }
        }
        Ok(path)
    }
}
