//! Remote blob storage: the only boundary to the external asset store.
//!
//! Everything above this module talks to [`BlobStore`], so the ingestion
//! orchestrator and the catalog-side manifest retrieval can be exercised
//! against [`MemoryBlobStore`] without a network.
//!
//! ## Idempotent naming
//!
//! Asset names are derived from durable identifiers only — the episode id and
//! the 1-based page number — never from a clock or RNG. A retried upload for
//! page 7 of `ep-42` always targets `ep-42-page-7.jpg`, so the store
//! overwrites the same logical asset instead of accumulating duplicates.

mod http;
mod memory;

pub use self::http::HttpBlobStore;
pub use self::memory::MemoryBlobStore;

use crate::config::OutputFormat;
use crate::error::StorageError;
use async_trait::async_trait;

/// Unified interface for blob stores.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Store `bytes` under `filename` and return a stable, stream-capable URL.
    ///
    /// Uploading the same `filename` twice must target the same logical
    /// asset.
    async fn upload(
        &self,
        filename: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StorageError>;

    /// Retrieve the bytes behind a URL previously returned by
    /// [`upload`](Self::upload).
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Storage name of a page image: `{episode_id}-page-{page_num}.{ext}`.
pub fn page_asset_name(episode_id: &str, page_num: usize, format: OutputFormat) -> String {
    format!("{episode_id}-page-{page_num}.{}", format.extension())
}

/// Storage name of an episode manifest: `{episode_id}-manifest.json`.
pub fn manifest_asset_name(episode_id: &str) -> String {
    format!("{episode_id}-manifest.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_are_deterministic() {
        let a = page_asset_name("ep-42", 7, OutputFormat::Jpeg);
        let b = page_asset_name("ep-42", 7, OutputFormat::Jpeg);
        assert_eq!(a, b);
        assert_eq!(a, "ep-42-page-7.jpg");
        assert_ne!(a, page_asset_name("ep-42", 8, OutputFormat::Jpeg));
        assert_eq!(
            page_asset_name("ep-42", 1, OutputFormat::WebpLossless),
            "ep-42-page-1.webp"
        );
    }

    #[test]
    fn manifest_name() {
        assert_eq!(manifest_asset_name("ep-1"), "ep-1-manifest.json");
    }
}
