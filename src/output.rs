//! Result types returned by a successful publish run.

use crate::episode::Episode;
use crate::manifest::Manifest;
use serde::Serialize;

/// Everything a caller learns from a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutput {
    /// The catalog record that was created.
    pub episode: Episode,
    pub manifest: Manifest,
    /// Where the manifest JSON was stored.
    pub manifest_url: String,
    pub stats: IngestStats,
}

/// Timing and volume figures for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub total_pages: usize,
    pub rasterize_duration_ms: u64,
    pub transcode_duration_ms: u64,
    pub upload_duration_ms: u64,
    pub manifest_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Page images plus the manifest, successful attempts only.
    pub bytes_uploaded: u64,
    /// Failed attempts that were retried, across all pages and stages.
    pub retries: u32,
}
