//! Read path: manifest resolution and the paginated reader.
//!
//! ```text
//! episode id ──▶ resolve (ManifestSource) ──▶ PlayableManifest
//!                                                  │
//!               ReadingSessionStore ◀──────▶ ReaderEngine ◀── ReaderEvent
//!                                                  │
//!                                   ReaderDriver ──▶ PageFetcher (tokio tasks)
//! ```

pub mod driver;
pub mod engine;
pub mod resolve;
pub mod session;

pub use self::driver::{BlobStorePageFetcher, HttpPageFetcher, PageFetcher, ReaderDriver};
pub use self::engine::{
    Control, LoadCompletion, LoadOutcome, LoadRequest, LoadStatus, NavDirection, ReaderEngine,
    ReaderEvent, ReaderView, SwipeDirection,
};
pub use self::resolve::{
    resolve, CatalogManifestSource, HttpManifestSource, ManifestSource, PlayableManifest,
};
pub use self::session::{
    JsonFileSessionStore, MemorySessionStore, ReadingSession, ReadingSessionStore,
};
