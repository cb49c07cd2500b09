use std::path::Path;

use strict_path::{PathBoundary, StrictPath, StrictPathError};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("attachment is empty")]
    Empty,
    #[error("attachment exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("invalid storage key: {0}")]
    InvalidKey(#[source] StrictPathError),
    #[error("upload directory unusable: {0}")]
    Root(#[source] StrictPathError),
    #[error("attachment not found")]
    NotFound,
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Empty => ApiError::validation(e.to_string()),
            StorageError::TooLarge { .. } => ApiError::PayloadTooLarge(e.to_string()),
            StorageError::InvalidKey(_) | StorageError::NotFound => ApiError::not_found("attachment"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Marker for paths inside the upload directory.
pub struct Attachments;

/// Chat attachments on local disk, laid out as `<root>/<room>/<uuid>`.
/// Every key is resolved through the boundary, so nothing lands outside root.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBoundary<Attachments>,
    max_bytes: usize,
}

impl AttachmentStore {
    /// Creates the upload directory when it is missing.
    pub fn open(root: impl AsRef<Path>, max_bytes: usize) -> Result<Self, StorageError> {
        let root = PathBoundary::try_new_create(root).map_err(StorageError::Root)?;
        Ok(Self { root, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn save(&self, room_id: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(StorageError::TooLarge { limit: self.max_bytes });
        }

        let key = format!("{room_id}/{}", Uuid::new_v4());
        let path = self.resolve(&key)?;
        let payload = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            path.create_parent_dir_all()?;
            path.write(payload)
        })
        .await??;
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::task::spawn_blocking(move || path.read()).await? {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::task::spawn_blocking(move || path.remove_file()).await? {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn resolve(&self, key: &str) -> Result<StrictPath<Attachments>, StorageError> {
        self.root.strict_join(key).map_err(StorageError::InvalidKey)
    }
}

/// Client-supplied file name reduced to something safe to echo back in a
/// `Content-Disposition` header.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .map(|c| if c.is_ascii_alphanumeric() || "._- ()".contains(c) { c } else { '_' })
        .take(120)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "attachment".into()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max: usize) -> (AttachmentStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("telehealth-uploads-{}", Uuid::new_v4()));
        (AttachmentStore::open(&dir, max).unwrap(), dir)
    }

    #[test]
    fn file_names_lose_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\scans\\x-ray 01.png"), "x-ray 01.png");
        assert_eq!(sanitize_file_name("bad\"name\n.pdf"), "badname.pdf");
        assert_eq!(sanitize_file_name("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_file_name("..."), "attachment");
        assert_eq!(sanitize_file_name(""), "attachment");
    }

    #[test]
    fn keys_cannot_escape_root() {
        let (s, dir) = store(10);
        assert!(s.resolve("chat-1/file").is_ok());
        assert!(matches!(s.resolve("../file"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(s.resolve("chat-1/../../x"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(s.resolve("/etc/passwd"), Err(StorageError::InvalidKey(_))));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn save_read_remove() {
        let (s, dir) = store(1024);
        let key = s.save("chat-1", b"hello").await.unwrap();
        assert!(key.starts_with("chat-1/"));
        assert_eq!(s.read(&key).await.unwrap(), b"hello");
        s.remove(&key).await.unwrap();
        assert!(matches!(s.read(&key).await, Err(StorageError::NotFound)));
        s.remove(&key).await.unwrap();
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn escaping_room_is_refused_before_writing() {
        let (s, dir) = store(1024);
        assert!(matches!(s.save("../../outside", b"x").await, Err(StorageError::InvalidKey(_))));
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn enforces_size_limit_and_non_empty() {
        let (s, dir) = store(4);
        assert!(matches!(s.save("r", b"12345").await, Err(StorageError::TooLarge { limit: 4 })));
        assert!(matches!(s.save("r", b"").await, Err(StorageError::Empty)));
        tokio::fs::remove_dir_all(dir).await.ok();
    }
}
