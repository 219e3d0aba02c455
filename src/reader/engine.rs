//! Paginated reader state machine.
//!
//! The engine is synchronous and does no I/O of its own except saving
//! progress: it consumes [`ReaderEvent`]s and [`LoadCompletion`]s and returns
//! the [`LoadRequest`]s a driver should start. Because every input arrives
//! through `&mut self`, there is a single logical event loop and no shared
//! mutable state.
//!
//! Rules:
//! * `Next` on the last page and `Previous` on the first are no-ops.
//! * Entering a page schedules every `NotLoaded` page, current first, then
//!   by distance (ties go in the direction of travel). A `Failed` current
//!   page is scheduled again.
//! * A completion always updates its own page's status; a late failure never
//!   downgrades a `Loaded` page. It only affects the displayed view when its
//!   page is still current.
//! * The index is saved on every change; save errors are logged and ignored.

use super::resolve::PlayableManifest;
use super::session::ReadingSessionStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Load state of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

/// Direction of the last page change, for page-turn presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavDirection {
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Next,
    Previous,
}

/// User input the engine understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderEvent {
    /// Swipe left turns forward, swipe right turns back.
    Swipe(SwipeDirection),
    /// Tap at `x` on a surface `width` wide: left half back, right half forward.
    Tap { x: f32, width: f32 },
    Control(Control),
}

/// A page fetch the driver should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub page: usize,
    pub url: String,
    /// Index that was current when the request was made.
    pub origin: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed(String),
}

/// Result of a [`LoadRequest`], fed back into [`ReaderEngine::complete`].
///
/// Whether a completion is stale is decided by `page` alone: it touches the
/// view only if that page is still current. `origin` is echoed from the
/// request for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCompletion {
    pub page: usize,
    pub origin: usize,
    pub outcome: LoadOutcome,
}

/// Snapshot for rendering controls and the current page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderView {
    pub episode_id: String,
    pub title: String,
    pub index: usize,
    pub total_pages: usize,
    /// 1-based, e.g. `"3 / 12"`.
    pub label: String,
    /// `(index + 1) / total_pages`.
    pub progress: f32,
    pub current_url: String,
    pub status: LoadStatus,
    /// Error of the current page's last failed load.
    pub error: Option<String>,
    pub direction: NavDirection,
    pub at_first: bool,
    pub at_last: bool,
}

/// Reader state for one opened episode.
pub struct ReaderEngine {
    manifest: PlayableManifest,
    current: usize,
    statuses: Vec<LoadStatus>,
    errors: Vec<Option<String>>,
    direction: NavDirection,
    sessions: Arc<dyn ReadingSessionStore>,
}

impl std::fmt::Debug for ReaderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderEngine")
            .field("episode_id", &self.manifest.episode_id())
            .field("current", &self.current)
            .field("statuses", &self.statuses)
            .finish()
    }
}

impl ReaderEngine {
    /// Open `manifest` at the saved position and return the initial loads.
    ///
    /// A saved index past the end is clamped to the last page (and the
    /// clamped value saved); no saved session starts at 0.
    pub fn open(
        manifest: PlayableManifest,
        sessions: Arc<dyn ReadingSessionStore>,
    ) -> (Self, Vec<LoadRequest>) {
        let total = manifest.total_pages();
        let last = total - 1;
        let saved = match sessions.load(manifest.episode_id()) {
            Ok(s) => s.map(|s| s.current_page_index),
            Err(e) => {
                warn!(
                    "Could not read reading progress for '{}': {}",
                    manifest.episode_id(),
                    e
                );
                None
            }
        };
        let current = saved.map_or(0, |i| i.min(last));

        let mut engine = Self {
            manifest,
            current,
            statuses: vec![LoadStatus::NotLoaded; total],
            errors: vec![None; total],
            direction: NavDirection::Forward,
            sessions,
        };
        if saved.is_some_and(|i| i > last) {
            debug!("Saved index {:?} clamped to {}", saved, last);
            engine.persist();
        }
        let loads = engine.schedule();
        (engine, loads)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn total_pages(&self) -> usize {
        self.statuses.len()
    }

    pub fn manifest(&self) -> &PlayableManifest {
        &self.manifest
    }

    pub fn status(&self, page: usize) -> Option<LoadStatus> {
        self.statuses.get(page).copied()
    }

    pub fn direction(&self) -> NavDirection {
        self.direction
    }

    /// Apply a user event; returns the loads to start (empty on a no-op).
    pub fn handle(&mut self, event: ReaderEvent) -> Vec<LoadRequest> {
        match event {
            ReaderEvent::Swipe(SwipeDirection::Left) | ReaderEvent::Control(Control::Next) => {
                self.next_page()
            }
            ReaderEvent::Swipe(SwipeDirection::Right)
            | ReaderEvent::Control(Control::Previous) => self.previous_page(),
            ReaderEvent::Tap { x, width } => {
                if width.is_nan() || width <= 0.0 || !x.is_finite() {
                    return Vec::new();
                }
                if x < width / 2.0 {
                    self.previous_page()
                } else {
                    self.next_page()
                }
            }
        }
    }

    pub fn next_page(&mut self) -> Vec<LoadRequest> {
        if self.current + 1 >= self.total_pages() {
            return Vec::new();
        }
        self.enter(self.current + 1, NavDirection::Forward)
    }

    pub fn previous_page(&mut self) -> Vec<LoadRequest> {
        if self.current == 0 {
            return Vec::new();
        }
        self.enter(self.current - 1, NavDirection::Back)
    }

    /// Record a finished load. Returns `true` when the displayed page changed
    /// state, i.e. the completion was for the current page.
    pub fn complete(&mut self, completion: LoadCompletion) -> bool {
        let page = completion.page;
        let Some(status) = self.statuses.get_mut(page) else {
            warn!("Completion for unknown page index {}", page);
            return false;
        };

        match completion.outcome {
            LoadOutcome::Loaded => {
                *status = LoadStatus::Loaded;
                self.errors[page] = None;
            }
            LoadOutcome::Failed(reason) => {
                if *status == LoadStatus::Loaded {
                    debug!("Ignoring late failure for already loaded page {}", page);
                    return false;
                }
                *status = LoadStatus::Failed;
                self.errors[page] = Some(reason);
            }
        }

        let is_current = page == self.current;
        if !is_current {
            debug!(
                "Page {} settled (requested while on {}), now on {}",
                page, completion.origin, self.current
            );
        }
        is_current
    }

    pub fn view(&self) -> ReaderView {
        let total = self.total_pages();
        ReaderView {
            episode_id: self.manifest.episode_id().to_string(),
            title: self.manifest.title().to_string(),
            index: self.current,
            total_pages: total,
            label: format!("{} / {}", self.current + 1, total),
            progress: (self.current + 1) as f32 / total as f32,
            current_url: self
                .manifest
                .page_url(self.current)
                .unwrap_or_default()
                .to_string(),
            status: self.statuses[self.current],
            error: self.errors[self.current].clone(),
            direction: self.direction,
            at_first: self.current == 0,
            at_last: self.current + 1 == total,
        }
    }

    fn enter(&mut self, index: usize, direction: NavDirection) -> Vec<LoadRequest> {
        self.current = index;
        self.direction = direction;
        self.persist();
        self.schedule()
    }

    fn persist(&self) {
        if let Err(e) = self
            .sessions
            .save_position(self.manifest.episode_id(), self.current)
        {
            warn!(
                "Could not save reading progress for '{}': {}",
                self.manifest.episode_id(),
                e
            );
        }
    }

    /// Mark pages `Loading` in preload order and emit their requests.
    fn schedule(&mut self) -> Vec<LoadRequest> {
        let origin = self.current;
        let mut loads = Vec::new();
        for page in preload_order(origin, self.total_pages(), self.direction) {
            let wanted = match self.statuses[page] {
                LoadStatus::NotLoaded => true,
                LoadStatus::Failed => page == origin,
                LoadStatus::Loading | LoadStatus::Loaded => false,
            };
            if !wanted {
                continue;
            }
            let Some(url) = self.manifest.page_url(page) else {
                continue;
            };
            self.statuses[page] = LoadStatus::Loading;
            loads.push(LoadRequest {
                page,
                url: url.to_string(),
                origin,
            });
        }
        loads
    }
}

/// Every index in `0..total`, `current` first, then by distance; at equal
/// distance the page in `direction` comes first.
pub fn preload_order(current: usize, total: usize, direction: NavDirection) -> Vec<usize> {
    let mut order = Vec::with_capacity(total);
    if current >= total {
        return order;
    }
    order.push(current);
    for distance in 1..total {
        let ahead = current.checked_add(distance).filter(|&i| i < total);
        let behind = current.checked_sub(distance);
        let (first, second) = match direction {
            NavDirection::Forward => (ahead, behind),
            NavDirection::Back => (behind, ahead),
        };
        order.extend(first);
        order.extend(second);
        if order.len() == total {
            break;
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use crate::reader::session::MemorySessionStore;

    fn playable(n: usize) -> PlayableManifest {
        let builder = ManifestBuilder::new("ep-1", "Pilot", n)
            .pages((1..=n).map(|p| (p, format!("https://cdn/ep-1-page-{p}.jpg"))));
        PlayableManifest::new(builder.build().unwrap()).unwrap()
    }

    fn open(n: usize, store: Arc<MemorySessionStore>) -> (ReaderEngine, Vec<LoadRequest>) {
        ReaderEngine::open(playable(n), store)
    }

    #[test]
    fn preload_order_by_distance() {
        assert_eq!(preload_order(2, 5, NavDirection::Forward), [2, 3, 1, 4, 0]);
        assert_eq!(preload_order(2, 5, NavDirection::Back), [2, 1, 3, 0, 4]);
        assert_eq!(preload_order(0, 3, NavDirection::Forward), [0, 1, 2]);
        assert_eq!(preload_order(2, 3, NavDirection::Forward), [2, 1, 0]);
    }

    #[test]
    fn opens_at_zero_and_preloads_everything() {
        let (engine, loads) = open(3, Arc::new(MemorySessionStore::new()));
        assert_eq!(engine.current_index(), 0);
        let pages: Vec<usize> = loads.iter().map(|l| l.page).collect();
        assert_eq!(pages, [0, 1, 2]);
        assert!(loads.iter().all(|l| l.origin == 0));
        assert_eq!(engine.status(1), Some(LoadStatus::Loading));
    }

    #[test]
    fn saved_index_is_restored_or_clamped() {
        let store = Arc::new(MemorySessionStore::new().with_session("ep-1", 2));
        let (engine, _) = open(4, store);
        assert_eq!(engine.current_index(), 2);

        let store = Arc::new(MemorySessionStore::new().with_session("ep-1", 99));
        let (engine, _) = open(4, store.clone());
        assert_eq!(engine.current_index(), 3);
        assert_eq!(store.load("ep-1").unwrap().unwrap().current_page_index, 3);
    }

    #[test]
    fn boundaries_are_noops() {
        let store = Arc::new(MemorySessionStore::new());
        let (mut engine, _) = open(2, store.clone());
        assert!(engine.previous_page().is_empty());
        assert_eq!(engine.current_index(), 0);
        assert!(store.load("ep-1").unwrap().is_none());

        engine.next_page();
        assert_eq!(engine.current_index(), 1);
        assert!(engine.handle(ReaderEvent::Control(Control::Next)).is_empty());
        assert_eq!(engine.current_index(), 1);
        assert!(engine.view().at_last);
    }

    #[test]
    fn gestures_map_to_directions() {
        let (mut engine, _) = open(5, Arc::new(MemorySessionStore::new()));
        engine.handle(ReaderEvent::Swipe(SwipeDirection::Left));
        assert_eq!(engine.current_index(), 1);
        engine.handle(ReaderEvent::Tap { x: 700.0, width: 800.0 });
        assert_eq!(engine.current_index(), 2);
        engine.handle(ReaderEvent::Tap { x: 100.0, width: 800.0 });
        assert_eq!(engine.current_index(), 1);
        assert_eq!(engine.direction(), NavDirection::Back);
        engine.handle(ReaderEvent::Swipe(SwipeDirection::Right));
        assert_eq!(engine.current_index(), 0);
        engine.handle(ReaderEvent::Tap { x: 10.0, width: 0.0 });
        assert_eq!(engine.current_index(), 0);
    }

    #[test]
    fn every_move_is_persisted() {
        let store = Arc::new(MemorySessionStore::new());
        let (mut engine, _) = open(3, store.clone());
        engine.next_page();
        engine.next_page();
        assert_eq!(store.load("ep-1").unwrap().unwrap().current_page_index, 2);
        engine.previous_page();
        assert_eq!(store.load("ep-1").unwrap().unwrap().current_page_index, 1);
    }

    #[test]
    fn navigation_keeps_likes_and_bookmarks() {
        let store = Arc::new(MemorySessionStore::new());
        store.toggle_liked("ep-1").unwrap();
        store.toggle_bookmarked("ep-1").unwrap();
        let (mut engine, _) = open(3, store.clone());
        engine.next_page();
        let session = store.load("ep-1").unwrap().unwrap();
        assert_eq!(session.current_page_index, 1);
        assert!(session.liked && session.bookmarked);
    }

    #[test]
    fn stale_completion_updates_status_but_not_view() {
        let (mut engine, _) = open(3, Arc::new(MemorySessionStore::new()));
        engine.next_page();
        let changed = engine.complete(LoadCompletion {
            page: 0,
            origin: 0,
            outcome: LoadOutcome::Loaded,
        });
        assert!(!changed);
        assert_eq!(engine.status(0), Some(LoadStatus::Loaded));
        assert_eq!(engine.view().status, LoadStatus::Loading);

        assert!(engine.complete(LoadCompletion {
            page: 1,
            origin: 0,
            outcome: LoadOutcome::Loaded,
        }));
        assert_eq!(engine.view().status, LoadStatus::Loaded);
    }

    #[test]
    fn late_failure_never_downgrades() {
        let (mut engine, _) = open(2, Arc::new(MemorySessionStore::new()));
        engine.complete(LoadCompletion {
            page: 0,
            origin: 0,
            outcome: LoadOutcome::Loaded,
        });
        engine.complete(LoadCompletion {
            page: 0,
            origin: 0,
            outcome: LoadOutcome::Failed("late".into()),
        });
        assert_eq!(engine.status(0), Some(LoadStatus::Loaded));
        assert!(engine.view().error.is_none());
    }

    #[test]
    fn failed_current_page_is_retried_on_entry() {
        let (mut engine, _) = open(2, Arc::new(MemorySessionStore::new()));
        engine.complete(LoadCompletion {
            page: 0,
            origin: 0,
            outcome: LoadOutcome::Failed("HTTP 503".into()),
        });
        assert_eq!(engine.view().status, LoadStatus::Failed);
        assert_eq!(engine.view().error.as_deref(), Some("HTTP 503"));

        engine.complete(LoadCompletion {
            page: 1,
            origin: 0,
            outcome: LoadOutcome::Loaded,
        });
        assert!(engine.next_page().is_empty());
        let loads = engine.previous_page();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].page, 0);
        assert_eq!(engine.status(0), Some(LoadStatus::Loading));
    }

    #[test]
    fn view_label_and_progress() {
        let (mut engine, _) = open(4, Arc::new(MemorySessionStore::new()));
        engine.next_page();
        let view = engine.view();
        assert_eq!(view.label, "2 / 4");
        assert!((view.progress - 0.5).abs() < f32::EPSILON);
        assert_eq!(view.current_url, "https://cdn/ep-1-page-2.jpg");
        assert!(!view.at_first);
        assert!(!view.at_last);
    }
}
