//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use pagecast::error::StorageError;
use pagecast::{
    BlobStore, IngestConfig, IngestError, IngestProgressCallback, IngestState, MemoryBlobStore,
    RasterPage, Rasterizer, Stage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Smallest byte string the header check accepts.
pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n% test document\n";

/// Synthesises `pages` solid-colour pages instead of calling pdfium.
pub struct FakeRasterizer {
    pub pages: usize,
    pub width: u32,
    pub height: u32,
    /// Page rendered as a 70 000 × 1 strip, wider than JPEG can encode.
    pub oversized: Option<usize>,
    pub calls: AtomicUsize,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            width: 120,
            height: 180,
            oversized: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_oversized_page(pages: usize, page_num: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            width: 120,
            height: 180,
            oversized: Some(page_num),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _document: &[u8],
        _episode_id: &str,
    ) -> Result<Vec<RasterPage>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=self.pages)
            .map(|page_num| {
                let shade = (page_num * 40 % 256) as u8;
                let (w, h) = if self.oversized == Some(page_num) {
                    (70_000, 1)
                } else {
                    (self.width, self.height)
                };
                let img = RgbImage::from_pixel(w, h, Rgb([shade, 90, 200]));
                RasterPage {
                    page_num,
                    image: DynamicImage::ImageRgb8(img),
                }
            })
            .collect())
    }
}

/// Wraps a [`MemoryBlobStore`], failing or delaying uploads whose filename
/// contains a marker.
pub struct FlakyStore {
    pub inner: Arc<MemoryBlobStore>,
    /// filename fragment → number of leading attempts that fail (`usize::MAX` = always)
    failures: HashMap<String, usize>,
    /// filename fragment → delay applied to every attempt before the nth
    delays: HashMap<String, (Duration, usize)>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryBlobStore>) -> Self {
        Self {
            inner,
            failures: HashMap::new(),
            delays: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing(mut self, fragment: &str, times: usize) -> Self {
        self.failures.insert(fragment.to_string(), times);
        self
    }

    pub fn delaying(mut self, fragment: &str, delay: Duration, first_n: usize) -> Self {
        self.delays.insert(fragment.to_string(), (delay, first_n));
        self
    }

    pub fn attempts(&self, filename: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(filename)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn upload(
        &self,
        filename: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(filename.to_string()).or_insert(0);
            *n += 1;
            *n
        };

        for (fragment, (delay, first_n)) in &self.delays {
            if filename.contains(fragment.as_str()) && attempt <= *first_n {
                tokio::time::sleep(*delay).await;
            }
        }
        for (fragment, times) in &self.failures {
            if filename.contains(fragment.as_str()) && attempt <= *times {
                return Err(StorageError::Rejected {
                    target: filename.to_string(),
                    status: 503,
                });
            }
        }
        self.inner.upload(filename, bytes, mime_type).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.fetch(url).await
    }
}

/// Records every state the orchestrator reports.
#[derive(Default)]
pub struct StateRecorder {
    pub states: Mutex<Vec<IngestState>>,
    pub retries: Mutex<Vec<(Stage, usize, u32)>>,
    pub page_errors: Mutex<Vec<(Stage, usize)>>,
}

impl StateRecorder {
    pub fn states(&self) -> Vec<IngestState> {
        self.states.lock().unwrap().clone()
    }
}

impl IngestProgressCallback for StateRecorder {
    fn on_state_change(&self, state: &IngestState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_page_retry(&self, stage: Stage, page_num: usize, attempt: u32, _error: &str) {
        self.retries.lock().unwrap().push((stage, page_num, attempt));
    }

    fn on_page_error(&self, stage: Stage, page_num: usize, _total: usize, _error: &str) {
        self.page_errors.lock().unwrap().push((stage, page_num));
    }
}

/// Fast retries so failure tests finish quickly.
pub fn fast_config(recorder: Option<Arc<StateRecorder>>) -> IngestConfig {
    let mut builder = IngestConfig::builder()
        .max_retries(2)
        .retry_backoff_ms(1)
        .concurrency(3)
        .max_edge_px(100);
    if let Some(rec) = recorder {
        builder = builder.progress_callback(rec);
    }
    builder.build().expect("valid test config")
}
