//! Per-page pipeline stages for episode ingestion.
//!
//! Each submodule implements exactly one transformation step so each can be
//! tested on its own and swapped (e.g. a different rasterizer) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ transcode ──▶ storage (upload)
//! (stage)   (pdfium)   (resize+encode)
//! ```
//!
//! 1. [`input`]     — validate the PDF header and stage bytes in a scoped temp dir
//! 2. [`render`]    — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`transcode`] — cap the longest edge and encode to the delivery format
//! 4. [`retry`]     — bounded per-page retry shared by transcode and upload
//!
//! Uploading lives in [`crate::storage`], the only module with network I/O
//! on the publish path.

pub mod input;
pub mod render;
pub mod retry;
pub mod transcode;
