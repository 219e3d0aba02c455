//! Configuration types for episode ingestion.
//!
//! Every knob of a publish run lives in [`IngestConfig`], built through
//! [`IngestConfigBuilder`] so callers only set what they care about. The
//! remote blob store has its own [`StorageConfig`] because it is shared by the
//! publish path and the catalog-side manifest retrieval.

use crate::error::IngestError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one publish run.
///
/// # Example
/// ```rust
/// use pagecast::{IngestConfig, OutputFormat};
///
/// let config = IngestConfig::builder()
///     .max_edge_px(1280)
///     .quality(80)
///     .format(OutputFormat::Jpeg)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Largest accepted page count. Default: 200.
    ///
    /// Documents above the cap are rejected with
    /// [`IngestError::TooManyPages`]; they are never truncated.
    pub max_pages: usize,

    /// Longest edge pdfium renders each page at, in pixels. Default: 2400.
    ///
    /// Keeps a poster-sized page from allocating a 10 000 px bitmap before the
    /// transcoder gets a chance to shrink it.
    pub max_rendered_pixels: u32,

    /// Longest edge of the delivered image, in pixels. Default: 1600.
    ///
    /// Pages larger than this are downscaled (aspect ratio preserved) before
    /// encoding. 1600 px is sharp on phone screens held in portrait and keeps
    /// a typical comic page under ~400 KB at quality 85.
    pub max_edge_px: u32,

    /// Encoder quality, 1–100. Default: 85. Ignored by lossless formats.
    pub quality: u8,

    /// Delivered image format. Default: [`OutputFormat::Jpeg`].
    pub format: OutputFormat,

    /// Concurrent transcode/upload operations. Default: 4.
    ///
    /// Bounds both memory (each in-flight page holds a decoded bitmap) and the
    /// request rate seen by the blob store.
    pub concurrency: usize,

    /// Retries per page after the first failed attempt. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single upload attempt, in seconds. Default: 30.
    ///
    /// An attempt that exceeds it counts as a failed attempt, exactly like a
    /// network error.
    pub upload_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit path to libpdfium. `None` binds the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Optional per-stage / per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_pages: 200,
            max_rendered_pixels: 2400,
            max_edge_px: 1600,
            quality: 85,
            format: OutputFormat::default(),
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            upload_timeout_secs: 30,
            password: None,
            pdfium_library_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("max_pages", &self.max_pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_edge_px", &self.max_edge_px)
            .field("quality", &self.quality)
            .field("format", &self.format)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_edge_px(mut self, px: u32) -> Self {
        self.config.max_edge_px = px.max(16);
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.config.quality = q.clamp(1, 100);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(IngestError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.max_edge_px > c.max_rendered_pixels {
            return Err(IngestError::InvalidConfig(format!(
                "max_edge_px ({}) cannot exceed max_rendered_pixels ({})",
                c.max_edge_px, c.max_rendered_pixels
            )));
        }
        if c.upload_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "upload_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Image format delivered to readers.
///
/// | Format | Lossy | Quality knob | Notes |
/// |--------|-------|--------------|-------|
/// | `Jpeg` | yes | honoured | smallest files for scanned/illustrated pages (default) |
/// | `WebpLossless` | no | ignored | crisp line art, larger than JPEG |
/// | `Png` | no | ignored | largest; use for debugging output |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    WebpLossless,
    Png,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebpLossless => "image/webp",
            OutputFormat::Png => "image/png",
        }
    }

    /// File extension used in idempotent asset names.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebpLossless => "webp",
            OutputFormat::Png => "png",
        }
    }
}

/// Connection settings for the remote blob store.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Upload endpoint accepting `multipart/form-data` with a `file` field.
    pub endpoint: String,

    /// Sent as the `X-API-Key` header when present.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds. Default: 30.
    pub timeout_secs: u64,
}

impl StorageConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout_secs: 30,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    /// Read `PAGECAST_STORAGE_URL`, `PAGECAST_STORAGE_API_KEY` and
    /// `PAGECAST_STORAGE_TIMEOUT` from the environment.
    ///
    /// Returns `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("PAGECAST_STORAGE_URL")
            .ok()
            .filter(|s| !s.is_empty())?;
        let mut config = Self::new(endpoint);
        if let Ok(key) = std::env::var("PAGECAST_STORAGE_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Some(secs) = std::env::var("PAGECAST_STORAGE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config = config.with_timeout_secs(secs);
        }
        Some(config)
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = IngestConfig::builder().build().expect("defaults build");
        assert_eq!(config.quality, 85);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.format, OutputFormat::Jpeg);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let config = IngestConfig::builder()
            .quality(0)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.quality, 1);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn edge_larger_than_render_is_rejected() {
        let err = IngestConfig::builder()
            .max_rendered_pixels(1000)
            .max_edge_px(2000)
            .build()
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn zero_page_cap_is_rejected() {
        assert!(IngestConfig::builder().max_pages(0).build().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = IngestConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));

        let storage = StorageConfig::new("https://blobs.example/upload").with_api_key("k3y");
        assert!(!format!("{storage:?}").contains("k3y"));
    }

    #[test]
    fn output_format_naming() {
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::WebpLossless.mime_type(), "image/webp");
    }
}
