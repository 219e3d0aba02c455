//! # pagecast
//!
//! Turn PDF documents into paginated, image-based episodes and read them
//! back page by page.
//!
//! ## Publish pipeline
//!
//! ```text
//! PDF bytes + metadata
//!  │
//!  ├─ 1. Validate   episode id, title, %PDF header, id not yet in catalog
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Transcode  cap longest edge, encode JPEG / WebP / PNG   ┐ bounded
//!  ├─ 4. Upload     BlobStore, idempotent per-page names         ┘ parallel
//!  ├─ 5. Manifest   ordered page URLs, cover, counts → {id}-manifest.json
//!  └─ 6. Catalog    Episode record created only after all of the above
//! ```
//!
//! A single page that exhausts its retries aborts the run: no manifest, no
//! episode record.
//!
//! ## Read path
//!
//! [`reader::resolve`] fetches and validates a manifest; [`ReaderEngine`]
//! turns swipes, taps and buttons into page changes, schedules preloads and
//! saves progress; [`ReaderDriver`] runs the page fetches on tokio.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagecast::{
//!     EpisodeMetadata, HttpBlobStore, IngestConfig, JsonFileEpisodeRepository, Publisher,
//!     StorageConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = HttpBlobStore::new(StorageConfig::new("https://files.example/upload"))?;
//!     let catalog = JsonFileEpisodeRepository::new("pagecast-catalog.json");
//!     let publisher = Publisher::with_pdfium(
//!         IngestConfig::default(),
//!         Arc::new(store),
//!         Arc::new(catalog),
//!     );
//!
//!     let pdf = std::fs::read("chapter-1.pdf")?;
//!     let out = publisher
//!         .publish(&pdf, EpisodeMetadata::new("Chapter 1"), None)
//!         .await?;
//!     println!("{} pages → {}", out.manifest.total_pages(), out.manifest_url);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagecast` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagecast = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod episode;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod output;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, OutputFormat, StorageConfig};
pub use episode::{
    Episode, EpisodeMetadata, EpisodeRepository, JsonFileEpisodeRepository,
    MemoryEpisodeRepository,
};
pub use error::{
    IngestError, PageError, PersistError, RepositoryError, ResolveError, StorageError,
};
pub use ingest::{generate_episode_id, validate_episode_id, IngestState, Publisher, Stage};
pub use manifest::{Manifest, ManifestBuilder};
pub use output::{IngestStats, PublishOutput};
pub use pipeline::render::{PdfiumRasterizer, RasterPage, Rasterizer};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use reader::{
    CatalogManifestSource, HttpManifestSource, JsonFileSessionStore, ManifestSource,
    MemorySessionStore, PlayableManifest, ReaderDriver, ReaderEngine, ReaderEvent, ReaderView,
    ReadingSessionStore,
};
pub use storage::{BlobStore, HttpBlobStore, MemoryBlobStore};
