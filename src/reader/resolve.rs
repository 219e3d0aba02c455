//! Playback manifest resolution.
//!
//! [`resolve`] turns an episode id into a [`PlayableManifest`]: a manifest
//! that was found, decoded, belongs to the requested episode, is published,
//! and has at least one page with a URL for every declared page. Everything else is a [`ResolveError`] value for the reader
//! to show; the engine is never built from an unplayable manifest.

use crate::config::StorageConfig;
use crate::episode::EpisodeRepository;
use crate::error::{ResolveError, StorageError};
use crate::manifest::Manifest;
use crate::storage::BlobStore;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Somewhere manifests can be read from.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Raw manifest JSON for `episode_id`, or `Ok(None)` when there is no
    /// such published episode.
    async fn load(&self, episode_id: &str) -> Result<Option<Vec<u8>>, ResolveError>;
}

/// A manifest the reader engine can be built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableManifest(Manifest);

impl PlayableManifest {
    /// Check a decoded manifest for playability.
    pub fn new(manifest: Manifest) -> Result<Self, ResolveError> {
        let unplayable = |reason: String| ResolveError::ReaderUnplayable {
            episode_id: manifest.episode_id().to_string(),
            reason,
        };
        if manifest.total_pages() == 0 {
            return Err(unplayable("manifest has no pages".into()));
        }
        if manifest.pages().len() != manifest.total_pages() {
            return Err(unplayable(format!(
                "manifest lists {} page URLs but declares {} pages",
                manifest.pages().len(),
                manifest.total_pages()
            )));
        }
        Ok(Self(manifest))
    }

    pub fn episode_id(&self) -> &str {
        self.0.episode_id()
    }

    pub fn title(&self) -> &str {
        self.0.title()
    }

    /// Always at least 1.
    pub fn total_pages(&self) -> usize {
        self.0.total_pages()
    }

    pub fn page_url(&self, index: usize) -> Option<&str> {
        self.0.page_url(index)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.0
    }

    pub fn into_inner(self) -> Manifest {
        self.0
    }
}

/// Fetch, decode and validate the manifest for `episode_id`.
pub async fn resolve(
    source: &dyn ManifestSource,
    episode_id: &str,
) -> Result<PlayableManifest, ResolveError> {
    let bytes = source
        .load(episode_id)
        .await?
        .ok_or_else(|| ResolveError::ManifestNotFound {
            episode_id: episode_id.to_string(),
        })?;

    let manifest = Manifest::from_json(&bytes).map_err(|e| ResolveError::ManifestUnavailable {
        episode_id: episode_id.to_string(),
        reason: format!("manifest is not valid JSON: {e}"),
    })?;

    if manifest.episode_id() != episode_id {
        return Err(unavailable(
            episode_id,
            format!("manifest belongs to '{}'", manifest.episode_id()),
        ));
    }
    if !manifest.is_published() {
        debug!("Manifest for '{}' is not published", episode_id);
        return Err(ResolveError::ManifestNotFound {
            episode_id: episode_id.to_string(),
        });
    }

    let playable = PlayableManifest::new(manifest)?;
    debug!(
        "Resolved '{}': {} pages",
        episode_id,
        playable.total_pages()
    );
    Ok(playable)
}

fn unavailable(episode_id: &str, e: impl std::fmt::Display) -> ResolveError {
    ResolveError::ManifestUnavailable {
        episode_id: episode_id.to_string(),
        reason: e.to_string(),
    }
}

/// Server-side lookup: published catalog entry, then its stored manifest.
pub struct CatalogManifestSource {
    repository: Arc<dyn EpisodeRepository>,
    store: Arc<dyn BlobStore>,
}

impl CatalogManifestSource {
    pub fn new(repository: Arc<dyn EpisodeRepository>, store: Arc<dyn BlobStore>) -> Self {
        Self { repository, store }
    }
}

#[async_trait]
impl ManifestSource for CatalogManifestSource {
    async fn load(&self, episode_id: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        let episode = match self.repository.get(episode_id).await {
            Ok(Some(ep)) if ep.published => ep,
            Ok(_) => return Ok(None),
            Err(e) => return Err(unavailable(episode_id, e)),
        };
        self.store
            .fetch(&episode.manifest_url)
            .await
            .map(Some)
            .map_err(|e| unavailable(episode_id, e))
    }
}

/// Client-side lookup over HTTP: `GET {base_url}/{episode_id}/mpd`.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpManifestSource {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Reuse the storage endpoint's timeout.
    pub fn from_storage_config(base_url: impl Into<String>, config: &StorageConfig) -> Result<Self, StorageError> {
        Self::new(base_url, config.timeout_secs)
    }

    pub fn manifest_url(&self, episode_id: &str) -> String {
        format!("{}/{}/mpd", self.base_url, episode_id)
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn load(&self, episode_id: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        let url = self.manifest_url(episode_id);
        info!("Fetching manifest {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(episode_id, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .bytes()
                .await
                .map(|b| Some(b.to_vec()))
                .map_err(|e| unavailable(episode_id, e)),
            s => Err(unavailable(episode_id, format!("HTTP {}", s.as_u16()))),
        }
    }
}
