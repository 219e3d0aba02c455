//! Progress-callback trait for publish runs.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive the
//! orchestrator's state transitions and per-page events.
//!
//! State changes are reported from the orchestrator as pages settle, so `k/N`
//! counters always move one at a time. Retry notices come from inside the
//! page futures and may interleave between pages.
//!
//! # Example
//!
//! ```rust
//! use pagecast::{IngestProgressCallback, IngestConfig, IngestState};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl IngestProgressCallback for Log {
//!     fn on_state_change(&self, state: &IngestState) {
//!         eprintln!("-> {state}");
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(Arc::new(Log) as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::ingest::{IngestState, Stage};
use std::sync::Arc;

/// Called by the ingestion orchestrator as a run advances.
///
/// All methods default to no-ops so implementations override only what they
/// need.
pub trait IngestProgressCallback: Send + Sync {
    /// Called on every state transition, including `k/N` progress updates
    /// inside the Transcoding and Uploading stages.
    fn on_state_change(&self, state: &IngestState) {
        let _ = state;
    }

    /// Called when an attempt for a page failed and will be retried.
    fn on_page_retry(&self, stage: Stage, page_num: usize, attempt: u32, error: &str) {
        let _ = (stage, page_num, attempt, error);
    }

    /// Called when a page exhausted its retry budget.
    fn on_page_error(&self, stage: Stage, page_num: usize, total_pages: usize, error: &str) {
        let _ = (stage, page_num, total_pages, error);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
