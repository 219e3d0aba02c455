//! Ingestion orchestrator: document bytes in, published episode out.
//!
//! One call to [`Publisher::publish`] drives a single run through the
//! [`IngestState`] machine:
//!
//! 1. validate the episode id, title and PDF header, and refuse ids already
//!    in the catalog, before anything is created;
//! 2. rasterise every page through the [`Rasterizer`];
//! 3. transcode pages with bounded parallelism (`concurrency`), retrying
//!    each page within its budget;
//! 4. upload pages the same way, each attempt capped by `upload_timeout_secs`;
//! 5. build the manifest, upload it, and only then create the [`Episode`].
//!
//! Any page that exhausts its retries fails its whole stage. All failures of
//! that stage are collected, sorted by page and returned together as
//! [`IngestError::StageFailed`]; nothing is published and no episode record
//! is written. Assets uploaded before the abort are left in place.

mod state;

pub use self::state::{IngestState, PageOutcome, Stage};

use self::state::{PageSlots, StateTracker};
use crate::config::IngestConfig;
use crate::episode::{Episode, EpisodeMetadata, EpisodeRepository};
use crate::error::{IngestError, PageError, RepositoryError, StorageError};
use crate::manifest::{Manifest, ManifestBuilder};
use crate::output::{IngestStats, PublishOutput};
use crate::pipeline::input;
use crate::pipeline::render::{check_page_count, PdfiumRasterizer, RasterPage, Rasterizer};
use crate::pipeline::retry::{with_retries, RetryPolicy};
use crate::pipeline::transcode::{transcode_page, EncodedAsset, TranscodeOptions};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::storage::{manifest_asset_name, page_asset_name, BlobStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

static RE_EPISODE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").unwrap());

const MANIFEST_MIME: &str = "application/json";

/// Reject ids that would not make safe asset filenames.
pub fn validate_episode_id(episode_id: &str) -> Result<(), IngestError> {
    if RE_EPISODE_ID.is_match(episode_id) {
        Ok(())
    } else {
        Err(IngestError::InvalidEpisodeId {
            episode_id: episode_id.to_string(),
        })
    }
}

/// Fresh id of the form `ep-<unix millis>-<6 hex>`.
///
/// The random suffix keeps ids distinct when runs start in the same
/// millisecond.
pub fn generate_episode_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ep-{}-{}", Utc::now().timestamp_millis(), &suffix[..6])
}

/// Runs publish pipelines against a fixed set of collaborators.
pub struct Publisher {
    config: IngestConfig,
    rasterizer: Arc<dyn Rasterizer>,
    store: Arc<dyn BlobStore>,
    repository: Arc<dyn EpisodeRepository>,
}

impl Publisher {
    pub fn new(
        config: IngestConfig,
        rasterizer: Arc<dyn Rasterizer>,
        store: Arc<dyn BlobStore>,
        repository: Arc<dyn EpisodeRepository>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            store,
            repository,
        }
    }

    /// Publisher that rasterises with pdfium.
    pub fn with_pdfium(
        config: IngestConfig,
        store: Arc<dyn BlobStore>,
        repository: Arc<dyn EpisodeRepository>,
    ) -> Self {
        let rasterizer = Arc::new(PdfiumRasterizer::from_config(&config));
        Self::new(config, rasterizer, store, repository)
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn callback(&self) -> ProgressCallback {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// Publish `document` as a new episode.
    ///
    /// When `episode_id` is `None` one is generated. Returns only after the
    /// run reached `Completed` or `Failed`.
    ///
    /// # Errors
    /// Input problems (bad id, empty title, non-PDF bytes, id already taken,
    /// too many pages) fail before any asset is uploaded. Page failures
    /// surface as [`IngestError::StageFailed`] once every in-flight page of
    /// the stage has settled.
    pub async fn publish(
        &self,
        document: &[u8],
        metadata: EpisodeMetadata,
        episode_id: Option<String>,
    ) -> Result<PublishOutput, IngestError> {
        let mut tracker = StateTracker::new(self.callback());
        let episode_id = episode_id.unwrap_or_else(generate_episode_id);

        match self.run(&mut tracker, document, metadata, &episode_id).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("Publishing '{}' failed: {}", episode_id, e);
                tracker.fail(e.to_string());
                debug!("Run for '{}' ended {}", episode_id, tracker.state());
                Err(e)
            }
        }
    }

    /// Synchronous wrapper around [`publish`](Self::publish).
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn publish_sync(
        &self,
        document: &[u8],
        metadata: EpisodeMetadata,
        episode_id: Option<String>,
    ) -> Result<PublishOutput, IngestError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.publish(document, metadata, episode_id))
    }

    async fn run(
        &self,
        tracker: &mut StateTracker,
        document: &[u8],
        metadata: EpisodeMetadata,
        episode_id: &str,
    ) -> Result<PublishOutput, IngestError> {
        let total_start = Instant::now();
        let mut stats = IngestStats::default();

        // ── Step 1: Validate before touching anything ────────────────────
        validate_episode_id(episode_id)?;
        if metadata.title.trim().is_empty() {
            return Err(IngestError::InvalidMetadata("title must not be empty".into()));
        }
        input::validate_document(document)?;
        if self.repository.exists(episode_id).await? {
            return Err(IngestError::EpisodeExists {
                episode_id: episode_id.to_string(),
            });
        }
        info!("Publishing '{}' ({} bytes)", episode_id, document.len());

        // ── Step 2: Rasterise ────────────────────────────────────────────
        tracker.advance(IngestState::Rasterizing)?;
        let stage_start = Instant::now();
        let pages = self.rasterizer.rasterize(document, episode_id).await?;
        check_page_count(pages.len(), self.config.max_pages)?;
        let total = pages.len();
        stats.total_pages = total;
        stats.rasterize_duration_ms = stage_start.elapsed().as_millis() as u64;
        info!("Rasterised {} pages in {}ms", total, stats.rasterize_duration_ms);

        // ── Step 3: Transcode ────────────────────────────────────────────
        tracker.advance(IngestState::Transcoding { done: 0, total })?;
        let stage_start = Instant::now();
        let assets = self.transcode_all(tracker, pages, &mut stats).await?;
        stats.transcode_duration_ms = stage_start.elapsed().as_millis() as u64;

        // ── Step 4: Upload ───────────────────────────────────────────────
        tracker.advance(IngestState::Uploading { done: 0, total })?;
        let stage_start = Instant::now();
        let urls = self
            .upload_all(tracker, episode_id, assets, &mut stats)
            .await?;
        stats.upload_duration_ms = stage_start.elapsed().as_millis() as u64;

        // ── Step 5: Manifest ─────────────────────────────────────────────
        tracker.advance(IngestState::BuildingManifest)?;
        let stage_start = Instant::now();
        let manifest = ManifestBuilder::new(episode_id, metadata.title.clone(), total)
            .pages(urls.into_iter().enumerate().map(|(i, url)| (i + 1, url)))
            .build()?;

        tracker.advance(IngestState::PublishingManifest)?;
        let manifest_url = self.publish_manifest(tracker, &manifest, &mut stats).await?;
        stats.manifest_duration_ms = stage_start.elapsed().as_millis() as u64;

        // ── Step 6: Catalog record ───────────────────────────────────────
        let episode = Episode::from_manifest(metadata, &manifest, &manifest_url);
        let episode = self
            .repository
            .create(episode)
            .await
            .map_err(|e| match e {
                RepositoryError::AlreadyExists { episode_id } => {
                    IngestError::EpisodeExists { episode_id }
                }
                other => IngestError::Repository(other),
            })?;

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        tracker.advance(IngestState::Completed)?;
        info!(
            "Published '{}': {} pages, {} bytes, {} retries, {}ms",
            episode_id, total, stats.bytes_uploaded, stats.retries, stats.total_duration_ms
        );

        Ok(PublishOutput {
            episode,
            manifest,
            manifest_url,
            stats,
        })
    }

    async fn transcode_all(
        &self,
        tracker: &mut StateTracker,
        pages: Vec<RasterPage>,
        stats: &mut IngestStats,
    ) -> Result<Vec<EncodedAsset>, IngestError> {
        let total = pages.len();
        let opts = TranscodeOptions::from_config(&self.config);
        let futures = pages
            .into_iter()
            .map(|page| self.transcode_one(Arc::new(page), opts));

        let mut outcomes = stream::iter(futures).buffer_unordered(self.config.concurrency);
        let mut slots = PageSlots::new(total);
        let mut failures = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            self.settle(tracker, Stage::Transcoding, total, outcome, &mut slots, &mut failures, stats)?;
        }
        drop(outcomes);

        abort_on_failures(Stage::Transcoding, total, failures)?;
        slots.into_ordered()
    }

    async fn transcode_one(
        &self,
        page: Arc<RasterPage>,
        opts: TranscodeOptions,
    ) -> PageOutcome<EncodedAsset> {
        let page_num = page.page_num;
        let callback = self.callback();
        let policy = RetryPolicy::from_config(&self.config);
        let label = format!("transcode page {page_num}");

        let result = with_retries(
            &policy,
            &label,
            |_| {
                let page = Arc::clone(&page);
                async move {
                    tokio::task::spawn_blocking(move || transcode_page(&page, &opts))
                        .await
                        .map_err(|e| format!("encoder task panicked: {e}"))?
                        .map_err(|e| e.to_string())
                }
            },
            |attempt, e| callback.on_page_retry(Stage::Transcoding, page_num, attempt, e),
        )
        .await;

        match result {
            Ok(done) => PageOutcome::Succeeded {
                page_num,
                value: done.value,
                retries: done.retries,
            },
            Err(exhausted) => PageOutcome::Failed(PageError::TranscodeFailed {
                page: page_num,
                attempts: exhausted.attempts,
                detail: exhausted.error,
            }),
        }
    }

    async fn upload_all(
        &self,
        tracker: &mut StateTracker,
        episode_id: &str,
        assets: Vec<EncodedAsset>,
        stats: &mut IngestStats,
    ) -> Result<Vec<String>, IngestError> {
        let total = assets.len();
        let futures = assets
            .into_iter()
            .map(|asset| self.upload_one(episode_id, asset));

        let mut outcomes = stream::iter(futures).buffer_unordered(self.config.concurrency);
        let mut slots = PageSlots::new(total);
        let mut failures = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            self.settle(tracker, Stage::Uploading, total, outcome, &mut slots, &mut failures, stats)?;
        }
        drop(outcomes);

        abort_on_failures(Stage::Uploading, total, failures)?;
        let uploaded = slots.into_ordered()?;
        stats.bytes_uploaded += uploaded.iter().map(|(_, len)| *len as u64).sum::<u64>();
        Ok(uploaded.into_iter().map(|(url, _)| url).collect())
    }

    async fn upload_one(
        &self,
        episode_id: &str,
        asset: EncodedAsset,
    ) -> PageOutcome<(String, usize)> {
        let page_num = asset.page_num;
        let filename = page_asset_name(episode_id, page_num, self.config.format);
        let callback = self.callback();
        let policy = RetryPolicy::from_config(&self.config);
        let label = format!("upload page {page_num}");

        let result = with_retries(
            &policy,
            &label,
            |_| self.upload_with_timeout(&filename, &asset.bytes, asset.mime_type),
            |attempt, e| {
                callback.on_page_retry(Stage::Uploading, page_num, attempt, &e.to_string())
            },
        )
        .await;

        match result {
            Ok(done) => {
                debug!("Page {} stored at {}", page_num, done.value);
                PageOutcome::Succeeded {
                    page_num,
                    value: (done.value, asset.bytes.len()),
                    retries: done.retries,
                }
            }
            Err(exhausted) => PageOutcome::Failed(PageError::UploadFailed {
                page: page_num,
                attempts: exhausted.attempts,
                detail: exhausted.error.to_string(),
            }),
        }
    }

    /// One upload attempt; running past the deadline counts as a failure.
    async fn upload_with_timeout(
        &self,
        filename: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let secs = self.config.upload_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(secs),
            self.store.upload(filename, bytes, mime_type),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                target: filename.to_string(),
                secs,
            }),
        }
    }

    async fn publish_manifest(
        &self,
        tracker: &StateTracker,
        manifest: &Manifest,
        stats: &mut IngestStats,
    ) -> Result<String, IngestError> {
        let episode_id = manifest.episode_id();
        let bytes = manifest
            .to_json_pretty()
            .map_err(|e| IngestError::Internal(format!("manifest serialisation: {e}")))?;
        let filename = manifest_asset_name(episode_id);
        let policy = RetryPolicy::from_config(&self.config);
        let callback = tracker.callback();

        let done = with_retries(
            &policy,
            &filename,
            |_| self.upload_with_timeout(&filename, &bytes, MANIFEST_MIME),
            |attempt, e| {
                callback.on_page_retry(Stage::PublishingManifest, 0, attempt, &e.to_string())
            },
        )
        .await
        .map_err(|exhausted| IngestError::ManifestPublishFailed {
            episode_id: episode_id.to_string(),
            source: exhausted.error,
        })?;

        stats.retries += done.retries;
        stats.bytes_uploaded += bytes.len() as u64;
        info!("Manifest for '{}' stored at {}", episode_id, done.value);
        Ok(done.value)
    }

    /// Record one page outcome: fill its slot or remember its failure.
    #[allow(clippy::too_many_arguments)]
    fn settle<T>(
        &self,
        tracker: &mut StateTracker,
        stage: Stage,
        total: usize,
        outcome: PageOutcome<T>,
        slots: &mut PageSlots<T>,
        failures: &mut Vec<PageError>,
        stats: &mut IngestStats,
    ) -> Result<(), IngestError> {
        match outcome {
            PageOutcome::Succeeded {
                page_num,
                value,
                retries,
            } => {
                stats.retries += retries;
                slots.fill(page_num, value)?;
                tracker.page_done()?;
            }
            PageOutcome::Failed(error) => {
                if let PageError::TranscodeFailed { attempts, .. }
                | PageError::UploadFailed { attempts, .. } = &error
                {
                    stats.retries += attempts.saturating_sub(1);
                }
                warn!("{}", error);
                tracker
                    .callback()
                    .on_page_error(stage, error.page(), total, &error.to_string());
                failures.push(error);
            }
        }
        Ok(())
    }
}

/// Turn collected page failures into the stage's abort error.
fn abort_on_failures(
    stage: Stage,
    total: usize,
    mut failures: Vec<PageError>,
) -> Result<(), IngestError> {
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by_key(PageError::page);
    Err(IngestError::StageFailed {
        stage,
        failed: failures.len(),
        total,
        failures,
    })
}
