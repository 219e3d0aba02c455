//! Error types for the pagecast library.
//!
//! The taxonomy follows the two halves of the crate:
//!
//! * [`IngestError`] — **Fatal** for a publish run. Input validation errors
//!   (`DocumentInvalid`, `EmptyDocument`, `TooManyPages`, …) are raised before
//!   any remote asset exists. Stage failures carry every [`PageError`] of the
//!   stage that aborted so the operator sees which pages failed and how many.
//!
//! * [`PageError`] — a single page exhausted its retry budget while being
//!   transcoded or uploaded. Page errors never escape on their own; the
//!   orchestrator aggregates them into [`IngestError::StageFailed`].
//!
//! * [`ResolveError`] — read-path failures. These are plain values the reader
//!   UI shows as a dismissible error state.
//!
//! [`StorageError`], [`RepositoryError`] and [`PersistError`] belong to the
//! collaborator seams (blob store, episode catalog, local JSON files).

use crate::ingest::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by [`crate::ingest::Publisher::publish`].
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input validation ─────────────────────────────────────────────────
    /// The bytes are not a readable PDF document.
    #[error("Document is not a valid PDF: {reason}")]
    DocumentInvalid { reason: String },

    /// The PDF parsed but has no pages.
    #[error("Document has no pages; nothing to publish")]
    EmptyDocument,

    /// The PDF exceeds the configured page cap.
    #[error("Document has {pages} pages, more than the allowed {max}\nRaise --max-pages or split the document.")]
    TooManyPages { pages: usize, max: usize },

    /// Episode ids end up in asset filenames and URLs.
    #[error("Invalid episode id '{episode_id}': use 1–128 letters, digits, '-' or '_', starting with a letter or digit")]
    InvalidEpisodeId { episode_id: String },

    /// An episode with this id is already in the catalog.
    #[error("Episode '{episode_id}' already exists\nPublish under a new id or delete the old episode first.")]
    EpisodeExists { episode_id: String },

    /// Metadata failed validation (empty title etc.).
    #[error("Invalid episode metadata: {0}")]
    InvalidMetadata(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The PDF engine could not be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PAGECAST_PDFIUM_PATH=/path/to/libpdfium (or pass --pdfium-path) to use a\n\
specific copy, or install libpdfium where the system loader can find it.\n"
    )]
    EngineUnavailable(String),

    // ── Page stages ──────────────────────────────────────────────────────
    /// At least one page of a stage failed after all retries.
    #[error("{stage} failed for {failed}/{total} pages; first error: {}", first_error(.failures))]
    StageFailed {
        stage: Stage,
        failed: usize,
        total: usize,
        failures: Vec<PageError>,
    },

    // ── Structural ───────────────────────────────────────────────────────
    /// The manifest does not match what the rasterizer produced. Always a bug.
    #[error("Manifest build inconsistency: {detail} (expected {expected} pages, got {actual})")]
    BuildInconsistency {
        expected: usize,
        actual: usize,
        detail: String,
    },

    // ── Publishing ───────────────────────────────────────────────────────
    /// The manifest could not be stored.
    #[error("Failed to publish manifest for '{episode_id}': {source}")]
    ManifestPublishFailed {
        episode_id: String,
        #[source]
        source: StorageError,
    },

    /// The catalog refused the episode record.
    #[error("Catalog error: {0}")]
    Repository(#[from] RepositoryError),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn first_error(failures: &[PageError]) -> String {
    failures
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl IngestError {
    /// Input-validation errors are raised before any remote asset exists.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            IngestError::DocumentInvalid { .. }
                | IngestError::EmptyDocument
                | IngestError::TooManyPages { .. }
                | IngestError::InvalidEpisodeId { .. }
                | IngestError::EpisodeExists { .. }
                | IngestError::InvalidMetadata(_)
        )
    }
}

/// A page that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Re-encoding the raster page failed.
    #[error("Page {page}: transcoding failed after {attempts} attempt(s): {detail}")]
    TranscodeFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// Uploading the encoded page failed.
    #[error("Page {page}: upload failed after {attempts} attempt(s): {detail}")]
    UploadFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::TranscodeFailed { page, .. } | PageError::UploadFailed { page, .. } => *page,
        }
    }
}

/// Errors from a [`crate::storage::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The store answered with a non-success status.
    #[error("Storage rejected '{target}': HTTP {status}")]
    Rejected { target: String, status: u16 },

    /// The store answered 2xx but the body was not what we expect.
    #[error("Malformed storage response for '{target}': {detail}")]
    MalformedResponse { target: String, detail: String },

    /// The request did not finish in time.
    #[error("Storage request for '{target}' timed out after {secs}s")]
    Timeout { target: String, secs: u64 },

    /// Connection-level failure.
    #[error("Storage request for '{target}' failed: {detail}")]
    Network { target: String, detail: String },

    /// Nothing stored under that URL.
    #[error("No stored object at '{url}'")]
    NotFound { url: String },

    /// Client could not be configured.
    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// Errors from a [`crate::episode::EpisodeRepository`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Episode '{episode_id}' already exists")]
    AlreadyExists { episode_id: String },

    #[error("Episode '{episode_id}' not found")]
    NotFound { episode_id: String },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Errors reading or writing a local JSON state file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{path}' is not valid JSON state: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Read-path failures surfaced to the reader UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// No published episode with that id.
    #[error("Episode '{episode_id}' not found")]
    ManifestNotFound { episode_id: String },

    /// The manifest exists but could not be fetched or decoded.
    #[error("Failed to load episode '{episode_id}': {reason}")]
    ManifestUnavailable { episode_id: String, reason: String },

    /// The manifest was fetched but cannot be read page by page.
    #[error("Episode '{episode_id}' cannot be played: {reason}")]
    ReaderUnplayable { episode_id: String, reason: String },
}
