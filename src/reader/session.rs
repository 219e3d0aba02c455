//! Client-local reading state, keyed by episode id.
//!
//! The engine saves the current page index on every navigation and reads it
//! back once when an episode is opened. Likes and bookmarks live in the same
//! record and are only changed through the toggle methods; saving the index
//! leaves them as they are. Sessions are never deleted automatically.

use crate::error::PersistError;
use crate::persist;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Saved state for one episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingSession {
    pub current_page_index: usize,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub bookmarked: bool,
}

impl ReadingSession {
    pub fn at(current_page_index: usize) -> Self {
        Self {
            current_page_index,
            ..Self::default()
        }
    }
}

/// Where reading sessions are kept.
///
/// Calls are synchronous: the engine persists inline while handling an
/// event, and implementations are expected to be quick local writes.
pub trait ReadingSessionStore: Send + Sync {
    fn load(&self, episode_id: &str) -> Result<Option<ReadingSession>, PersistError>;

    fn save(&self, episode_id: &str, session: ReadingSession) -> Result<(), PersistError>;

    /// Read-modify-write of one session, starting from the default when
    /// none is saved. Returns the stored value.
    fn update(
        &self,
        episode_id: &str,
        change: &mut dyn FnMut(&mut ReadingSession),
    ) -> Result<ReadingSession, PersistError> {
        let mut session = self.load(episode_id)?.unwrap_or_default();
        change(&mut session);
        self.save(episode_id, session)?;
        Ok(session)
    }

    /// Store `index` without touching likes or bookmarks.
    fn save_position(&self, episode_id: &str, index: usize) -> Result<(), PersistError> {
        self.update(episode_id, &mut |s: &mut ReadingSession| s.current_page_index = index)
            .map(|_| ())
    }

    /// Flip the like flag; returns the new value.
    fn toggle_liked(&self, episode_id: &str) -> Result<bool, PersistError> {
        self.update(episode_id, &mut |s: &mut ReadingSession| s.liked = !s.liked)
            .map(|s| s.liked)
    }

    /// Flip the bookmark flag; returns the new value.
    fn toggle_bookmarked(&self, episode_id: &str) -> Result<bool, PersistError> {
        self.update(episode_id, &mut |s: &mut ReadingSession| s.bookmarked = !s.bookmarked)
            .map(|s| s.bookmarked)
    }

    fn is_liked(&self, episode_id: &str) -> Result<bool, PersistError> {
        Ok(self.load(episode_id)?.is_some_and(|s| s.liked))
    }

    fn is_bookmarked(&self, episode_id: &str) -> Result<bool, PersistError> {
        Ok(self.load(episode_id)?.is_some_and(|s| s.bookmarked))
    }
}

/// Sessions held in process memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, ReadingSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session, as if a previous visit had saved it.
    pub fn with_session(self, episode_id: impl Into<String>, current_page_index: usize) -> Self {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(episode_id.into(), ReadingSession::at(current_page_index));
        self
    }
}

impl ReadingSessionStore for MemorySessionStore {
    fn load(&self, episode_id: &str) -> Result<Option<ReadingSession>, PersistError> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(episode_id)
            .copied())
    }

    fn save(&self, episode_id: &str, session: ReadingSession) -> Result<(), PersistError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(episode_id.to_string(), session);
        Ok(())
    }

    fn update(
        &self,
        episode_id: &str,
        change: &mut dyn FnMut(&mut ReadingSession),
    ) -> Result<ReadingSession, PersistError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.entry(episode_id.to_string()).or_default();
        change(session);
        Ok(*session)
    }
}

/// All sessions in one JSON object,
/// `{ "<episode_id>": { "current_page_index": n, "liked": b, "bookmarked": b } }`.
/// Files written before likes and bookmarks existed load with both `false`.
#[derive(Debug)]
pub struct JsonFileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, ReadingSession>, PersistError> {
        Ok(persist::read_json(&self.path)?.unwrap_or_default())
    }
}

impl ReadingSessionStore for JsonFileSessionStore {
    fn load(&self, episode_id: &str) -> Result<Option<ReadingSession>, PersistError> {
        Ok(self.read_all()?.get(episode_id).copied())
    }

    fn save(&self, episode_id: &str, session: ReadingSession) -> Result<(), PersistError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut all = self.read_all()?;
        all.insert(episode_id.to_string(), session);
        persist::write_json_atomic(&self.path, &all)
    }

    fn update(
        &self,
        episode_id: &str,
        change: &mut dyn FnMut(&mut ReadingSession),
    ) -> Result<ReadingSession, PersistError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut all = self.read_all()?;
        let session = all.entry(episode_id.to_string()).or_default();
        change(session);
        let updated = *session;
        persist::write_json_atomic(&self.path, &all)?;
        Ok(updated)
    }
}
