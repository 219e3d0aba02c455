//! In-memory blob store.
//!
//! Used by the test suite and by `pagecast publish --dry-run`. Objects live in
//! a `HashMap` behind a [`RwLock`], keyed by filename, and are addressed as
//! `memory://{filename}`. Re-uploading a filename overwrites the object, which
//! is the same contract the real store gives us.

use super::BlobStore;
use crate::error::StorageError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

const SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    mime_type: String,
    uploads: usize,
}

/// In-memory [`BlobStore`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL an upload of `filename` resolves to.
    pub fn url_for(filename: &str) -> String {
        format!("{SCHEME}{filename}")
    }

    /// Number of distinct stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// Stored filenames, sorted.
    pub async fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// How many times `filename` was uploaded (0 when never).
    pub async fn upload_count(&self, filename: &str) -> usize {
        self.objects
            .read()
            .await
            .get(filename)
            .map(|b| b.uploads)
            .unwrap_or(0)
    }

    /// Bytes and mime type stored under `filename`.
    pub async fn get(&self, filename: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(filename)
            .map(|b| (b.bytes.clone(), b.mime_type.clone()))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(
        &self,
        filename: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StorageError> {
        if filename.is_empty() || filename.contains('/') {
            return Err(StorageError::Rejected {
                target: filename.to_string(),
                status: 400,
            });
        }
        let mut objects = self.objects.write().await;
        let uploads = objects.get(filename).map(|b| b.uploads).unwrap_or(0) + 1;
        objects.insert(
            filename.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                mime_type: mime_type.to_string(),
                uploads,
            },
        );
        Ok(Self::url_for(filename))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let not_found = || StorageError::NotFound {
            url: url.to_string(),
        };
        let filename = url.strip_prefix(SCHEME).ok_or_else(not_found)?;
        self.objects
            .read()
            .await
            .get(filename)
            .map(|b| b.bytes.clone())
            .ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_fetch() {
        let store = MemoryBlobStore::new();
        let url = store.upload("ep-1-page-1.jpg", b"jpeg", "image/jpeg").await.unwrap();
        assert_eq!(url, "memory://ep-1-page-1.jpg");
        assert_eq!(store.fetch(&url).await.unwrap(), b"jpeg");
        assert_eq!(
            store.get("ep-1-page-1.jpg").await.unwrap().1,
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn reupload_overwrites_same_asset() {
        let store = MemoryBlobStore::new();
        let a = store.upload("ep-1-page-2.jpg", b"v1", "image/jpeg").await.unwrap();
        let b = store.upload("ep-1-page-2.jpg", b"v2", "image/jpeg").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.upload_count("ep-1-page-2.jpg").await, 2);
        assert_eq!(store.fetch(&a).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn unknown_url_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.fetch("memory://nope").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.fetch("https://elsewhere/x").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
