//! Published episodes and the catalog that stores them.
//!
//! An [`Episode`] record is written exactly once per successful publish,
//! after its manifest is safely in blob storage. The catalog itself sits
//! behind [`EpisodeRepository`] so the orchestrator and the reader-facing
//! manifest lookup never care where records live.

use crate::error::RepositoryError;
use crate::manifest::Manifest;
use crate::persist;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

fn default_reading_time() -> u32 {
    5
}

/// Operator-supplied descriptive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_reading_time")]
    pub reading_time_minutes: u32,
}

impl EpisodeMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            reading_time_minutes: default_reading_time(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Blank tags are dropped, the rest trimmed.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_reading_time(mut self, minutes: u32) -> Self {
        self.reading_time_minutes = minutes;
        self
    }
}

/// A published episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub episode_id: String,
    pub metadata: EpisodeMetadata,
    pub manifest_url: String,
    pub cover_image: String,
    pub page_count: usize,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    /// Record for a manifest that now lives at `manifest_url`.
    pub fn from_manifest(
        metadata: EpisodeMetadata,
        manifest: &Manifest,
        manifest_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            episode_id: manifest.episode_id().to_string(),
            metadata,
            manifest_url: manifest_url.into(),
            cover_image: manifest.cover().to_string(),
            page_count: manifest.total_pages(),
            published: manifest.is_published(),
            created_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }
}

/// Keyed persistence for [`Episode`] records.
#[async_trait]
pub trait EpisodeRepository: Send + Sync {
    /// Insert a new record; `AlreadyExists` when the episode id is taken.
    async fn create(&self, episode: Episode) -> Result<Episode, RepositoryError>;

    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, RepositoryError>;

    /// All records, newest first.
    async fn list(&self) -> Result<Vec<Episode>, RepositoryError>;

    async fn update_metadata(
        &self,
        episode_id: &str,
        metadata: EpisodeMetadata,
    ) -> Result<Episode, RepositoryError>;

    /// Remove and return the record.
    async fn delete(&self, episode_id: &str) -> Result<Episode, RepositoryError>;

    async fn exists(&self, episode_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.get(episode_id).await?.is_some())
    }

    /// Reader-facing listing: published records only, newest first,
    /// optionally restricted to one category (exact match).
    async fn list_published(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<Episode>, RepositoryError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|e| e.published)
            .filter(|e| category.map_or(true, |c| e.metadata.category == c))
            .collect())
    }

    /// Distinct non-empty categories of published records, sorted.
    async fn categories(&self) -> Result<Vec<String>, RepositoryError> {
        let set: BTreeSet<String> = self
            .list_published(None)
            .await?
            .into_iter()
            .map(|e| e.metadata.category)
            .filter(|c| !c.is_empty())
            .collect();
        Ok(set.into_iter().collect())
    }
}

type Table = BTreeMap<String, Episode>;

fn insert(table: &mut Table, episode: Episode) -> Result<Episode, RepositoryError> {
    if table.contains_key(&episode.episode_id) {
        return Err(RepositoryError::AlreadyExists {
            episode_id: episode.episode_id,
        });
    }
    table.insert(episode.episode_id.clone(), episode.clone());
    Ok(episode)
}

fn newest_first(table: &Table) -> Vec<Episode> {
    let mut all: Vec<Episode> = table.values().cloned().collect();
    all.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.episode_id.cmp(&a.episode_id))
    });
    all
}

fn not_found(episode_id: &str) -> RepositoryError {
    RepositoryError::NotFound {
        episode_id: episode_id.to_string(),
    }
}

fn replace_metadata(
    table: &mut Table,
    episode_id: &str,
    metadata: EpisodeMetadata,
) -> Result<Episode, RepositoryError> {
    let episode = table.get_mut(episode_id).ok_or_else(|| not_found(episode_id))?;
    episode.metadata = metadata;
    Ok(episode.clone())
}

fn remove(table: &mut Table, episode_id: &str) -> Result<Episode, RepositoryError> {
    table.remove(episode_id).ok_or_else(|| not_found(episode_id))
}

/// Process-local catalog.
#[derive(Debug, Default)]
pub struct MemoryEpisodeRepository {
    episodes: RwLock<Table>,
}

impl MemoryEpisodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodeRepository for MemoryEpisodeRepository {
    async fn create(&self, episode: Episode) -> Result<Episode, RepositoryError> {
        insert(&mut *self.episodes.write().await, episode)
    }

    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, RepositoryError> {
        Ok(self.episodes.read().await.get(episode_id).cloned())
    }

    async fn list(&self) -> Result<Vec<Episode>, RepositoryError> {
        Ok(newest_first(&*self.episodes.read().await))
    }

    async fn update_metadata(
        &self,
        episode_id: &str,
        metadata: EpisodeMetadata,
    ) -> Result<Episode, RepositoryError> {
        replace_metadata(&mut *self.episodes.write().await, episode_id, metadata)
    }

    async fn delete(&self, episode_id: &str) -> Result<Episode, RepositoryError> {
        remove(&mut *self.episodes.write().await, episode_id)
    }
}

/// Catalog kept in a single JSON file.
///
/// Every operation re-reads the file, so two processes sharing it see each
/// other's writes; mutations are serialised within the process by a mutex
/// and land on disk with an atomic rename.
#[derive(Debug)]
pub struct JsonFileEpisodeRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileEpisodeRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Table, RepositoryError> {
        let records: Vec<Episode> = persist::read_json_async(&self.path)
            .await?
            .unwrap_or_default();
        Ok(records
            .into_iter()
            .map(|e| (e.episode_id.clone(), e))
            .collect())
    }

    async fn store(&self, table: &Table) -> Result<(), RepositoryError> {
        let records = newest_first(table);
        persist::write_json_atomic_async(&self.path, &records).await?;
        debug!("Catalog {} now holds {} episode(s)", self.path.display(), records.len());
        Ok(())
    }
}

#[async_trait]
impl EpisodeRepository for JsonFileEpisodeRepository {
    async fn create(&self, episode: Episode) -> Result<Episode, RepositoryError> {
        let _guard = self.lock.lock().await;
        let mut table = self.load().await?;
        let created = insert(&mut table, episode)?;
        self.store(&table).await?;
        Ok(created)
    }

    async fn get(&self, episode_id: &str) -> Result<Option<Episode>, RepositoryError> {
        Ok(self.load().await?.remove(episode_id))
    }

    async fn list(&self) -> Result<Vec<Episode>, RepositoryError> {
        Ok(newest_first(&self.load().await?))
    }

    async fn update_metadata(
        &self,
        episode_id: &str,
        metadata: EpisodeMetadata,
    ) -> Result<Episode, RepositoryError> {
        let _guard = self.lock.lock().await;
        let mut table = self.load().await?;
        let updated = replace_metadata(&mut table, episode_id, metadata)?;
        self.store(&table).await?;
        Ok(updated)
    }

    async fn delete(&self, episode_id: &str) -> Result<Episode, RepositoryError> {
        let _guard = self.lock.lock().await;
        let mut table = self.load().await?;
        let removed = remove(&mut table, episode_id)?;
        self.store(&table).await?;
        Ok(removed)
    }
}
