//! Async driver around [`ReaderEngine`].
//!
//! Each [`LoadRequest`] becomes a tokio task that fetches the page through a
//! [`PageFetcher`] and reports back on an `mpsc` channel. Completions are
//! applied to the engine only from the driver's own methods, so the engine
//! still sees one event at a time. At most `max_in_flight` fetches run at
//! once; tasks are started in preload order and a fair semaphore keeps them
//! roughly in that order.

use super::engine::{
    LoadCompletion, LoadOutcome, LoadRequest, LoadStatus, ReaderEngine, ReaderEvent, ReaderView,
};
use super::resolve::PlayableManifest;
use super::session::ReadingSessionStore;
use crate::error::StorageError;
use crate::storage::BlobStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

/// Default number of concurrent page fetches.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Fetches the bytes of one page image.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError>;
}

/// Plain HTTP GET with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpPageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("pagecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                StorageError::Timeout {
                    target: url.to_string(),
                    secs: self.timeout_secs,
                }
            } else {
                StorageError::Network {
                    target: url.to_string(),
                    detail: e.to_string(),
                }
            }
        };
        let response = self.client.get(url).send().await.map_err(map_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                target: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await.map_err(map_err)?.to_vec())
    }
}

/// Reads pages back through a [`BlobStore`], e.g. `memory://` URLs.
pub struct BlobStorePageFetcher {
    store: Arc<dyn BlobStore>,
}

impl BlobStorePageFetcher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PageFetcher for BlobStorePageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.store.fetch(url).await
    }
}

struct Fetched {
    completion: LoadCompletion,
    bytes: Option<Vec<u8>>,
}

/// Owns an engine and runs its page loads.
///
/// Must be created inside a tokio runtime.
pub struct ReaderDriver {
    engine: ReaderEngine,
    fetcher: Arc<dyn PageFetcher>,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Fetched>,
    rx: mpsc::UnboundedReceiver<Fetched>,
    in_flight: usize,
    pages: HashMap<usize, Vec<u8>>,
}

impl ReaderDriver {
    pub fn open(
        manifest: PlayableManifest,
        sessions: Arc<dyn ReadingSessionStore>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self::with_max_in_flight(manifest, sessions, fetcher, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_max_in_flight(
        manifest: PlayableManifest,
        sessions: Arc<dyn ReadingSessionStore>,
        fetcher: Arc<dyn PageFetcher>,
        max_in_flight: usize,
    ) -> Self {
        let (engine, loads) = ReaderEngine::open(manifest, sessions);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut driver = Self {
            engine,
            fetcher,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tx,
            rx,
            in_flight: 0,
            pages: HashMap::new(),
        };
        driver.spawn_loads(loads);
        driver
    }

    pub fn engine(&self) -> &ReaderEngine {
        &self.engine
    }

    pub fn view(&self) -> ReaderView {
        self.engine.view()
    }

    /// Bytes of a loaded page.
    pub fn page_bytes(&self, page: usize) -> Option<&[u8]> {
        self.pages.get(&page).map(Vec::as_slice)
    }

    /// Fetches started but not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Apply a user event and start whatever loads it schedules.
    pub fn handle(&mut self, event: ReaderEvent) -> ReaderView {
        let loads = self.engine.handle(event);
        self.spawn_loads(loads);
        self.engine.view()
    }

    /// Wait for the next completion and apply it. Returns whether the current
    /// page changed, or `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<bool> {
        if self.in_flight == 0 {
            return None;
        }
        let fetched = self.rx.recv().await?;
        Some(self.apply(fetched))
    }

    /// Apply every completion that has already arrived, without waiting.
    pub fn poll_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(fetched) = self.rx.try_recv() {
            self.apply(fetched);
            applied += 1;
        }
        applied
    }

    /// Wait until the current page is loaded or failed.
    pub async fn wait_current(&mut self) -> LoadStatus {
        loop {
            let status = self.engine.view().status;
            if matches!(status, LoadStatus::Loaded | LoadStatus::Failed) {
                return status;
            }
            if self.next_completion().await.is_none() {
                return self.engine.view().status;
            }
        }
    }

    /// Wait for every outstanding fetch.
    pub async fn settle(&mut self) {
        while self.next_completion().await.is_some() {}
    }

    fn apply(&mut self, fetched: Fetched) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        let page = fetched.completion.page;
        if let Some(bytes) = fetched.bytes {
            self.pages.insert(page, bytes);
        }
        self.engine.complete(fetched.completion)
    }

    fn spawn_loads(&mut self, loads: Vec<LoadRequest>) {
        for load in loads {
            self.in_flight += 1;
            let fetcher = Arc::clone(&self.fetcher);
            let permits = Arc::clone(&self.permits);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                debug!("Loading page {} from {}", load.page, load.url);
                let (outcome, bytes) = match fetcher.fetch(&load.url).await {
                    Ok(bytes) => (LoadOutcome::Loaded, Some(bytes)),
                    Err(e) => (LoadOutcome::Failed(e.to_string()), None),
                };
                // The receiver only goes away with the driver.
                let _ = tx.send(Fetched {
                    completion: LoadCompletion {
                        page: load.page,
                        origin: load.origin,
                        outcome,
                    },
                    bytes,
                });
            });
        }
    }
}
