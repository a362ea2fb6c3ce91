//! Blob storage — the object store behind scan images and renderings
//!
//! The pipeline treats storage as a key/value store of relative paths. The
//! filesystem implementation is what single-node deployments run; the trait
//! is the seam a bucket-backed implementation would fill.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use pawscan_core::error::ScanError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), ScanError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, ScanError>;
    async fn delete(&self, path: &str) -> Result<(), ScanError>;
}

/// Filesystem-backed blob store rooted at a configured directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative key under the root, rejecting traversal components.
    fn resolve(&self, path: &str) -> Result<PathBuf, ScanError> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ScanError::Storage(format!("invalid blob path: {}", path)));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<(), ScanError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScanError::Storage(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| ScanError::Storage(format!("write {}: {}", path, e)))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ScanError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| ScanError::Storage(format!("read {}: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> Result<(), ScanError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            // Deleting a blob that is already gone is not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScanError::Storage(format!("delete {}: {}", path, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> FsBlobStore {
        let dir = std::env::temp_dir().join(format!("pawscan-store-{}", uuid::Uuid::new_v4()));
        FsBlobStore::new(dir)
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let store = temp_store();
        store.put("uploads/a.jpg", b"jpeg bytes").await.unwrap();
        assert_eq!(store.get("uploads/a.jpg").await.unwrap(), b"jpeg bytes");
        store.delete("uploads/a.jpg").await.unwrap();
        assert!(store.get("uploads/a.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = temp_store();
        assert!(store.delete("uploads/never-existed.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let store = temp_store();
        assert!(store.put("../escape.jpg", b"x").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}
