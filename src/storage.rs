//! Image persistence for uploaded and derived images.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid owner id: {0}")]
    InvalidOwner(String),
}

/// Object storage for images. Returns a reference that identifies the stored object.
pub trait ImageStore: Send + Sync {
    fn save(&self, bytes: &[u8], filename: &str, owner_id: &str) -> Result<String, StorageError>;
}

/// Stores images under `<root>/<owner_id>/<content-hash>_<filename>`.
///
/// The content-hash prefix keeps two uploads with the same filename apart while
/// making a re-upload of identical bytes land on the same object.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Absolute path of a reference returned by [`ImageStore::save`].
    pub fn resolve(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }
}

impl ImageStore for FsImageStore {
    fn save(&self, bytes: &[u8], filename: &str, owner_id: &str) -> Result<String, StorageError> {
        let owner = sanitize_filename(owner_id);
        if owner != owner_id {
            return Err(StorageError::InvalidOwner(owner_id.to_string()));
        }

        let digest = Sha256::digest(bytes);
        let prefix = URL_SAFE_NO_PAD.encode(&digest[..12]);
        let name = format!("{prefix}_{}", sanitize_filename(filename));

        let dir = self.root.join(&owner);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(&name), bytes)?;

        tracing::debug!(size = bytes.len(), "Image stored");
        Ok(format!("{owner}/{name}"))
    }
}

/// Strip path traversal and special characters from a client-supplied filename.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|&c| c != '/' && c != '\\' && c != '\0')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.replace("..", "");
    let sanitized: String = sanitized.chars().take(100).collect();

    if sanitized.is_empty() {
        "upload".into()
    } else {
        sanitized
    }
}

/// Swap the extension of a stored name, e.g. `scan.pdf` → `scan.jpg`.
pub fn with_extension(filename: &str, extension: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{extension}"),
        _ => format!("{filename}.{extension}"),
    }
}
