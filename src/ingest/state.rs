//! Pipeline states, legal transitions and per-page outcomes.
//!
//! ```text
//! Pending → Rasterizing → Transcoding{k/N} → Uploading{k/N}
//!         → BuildingManifest → PublishingManifest → Completed
//!
//! any non-terminal state ──▶ Failed{stage, reason}
//! ```
//!
//! A stage is left only once every page in it has succeeded; the `k/N`
//! counters move one page at a time.

use crate::error::{IngestError, PageError};
use crate::progress::ProgressCallback;
use std::fmt;
use tracing::debug;

/// The pipeline step a failure or retry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validating,
    Rasterizing,
    Transcoding,
    Uploading,
    BuildingManifest,
    PublishingManifest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "Validating",
            Stage::Rasterizing => "Rasterizing",
            Stage::Transcoding => "Transcoding",
            Stage::Uploading => "Uploading",
            Stage::BuildingManifest => "BuildingManifest",
            Stage::PublishingManifest => "PublishingManifest",
        };
        f.write_str(name)
    }
}

/// Observable state of one publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    Pending,
    Rasterizing,
    Transcoding { done: usize, total: usize },
    Uploading { done: usize, total: usize },
    BuildingManifest,
    PublishingManifest,
    Completed,
    Failed { stage: Stage, reason: String },
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Completed | IngestState::Failed { .. })
    }

    /// Stage this state is part of; `None` once terminal.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            IngestState::Pending => Some(Stage::Validating),
            IngestState::Rasterizing => Some(Stage::Rasterizing),
            IngestState::Transcoding { .. } => Some(Stage::Transcoding),
            IngestState::Uploading { .. } => Some(Stage::Uploading),
            IngestState::BuildingManifest => Some(Stage::BuildingManifest),
            IngestState::PublishingManifest => Some(Stage::PublishingManifest),
            IngestState::Completed | IngestState::Failed { .. } => None,
        }
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(&self, next: &IngestState) -> bool {
        use IngestState::*;
        match (self, next) {
            (Completed, _) | (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Pending, Rasterizing) => true,
            (Rasterizing, Transcoding { done: 0, total }) => *total > 0,
            (Transcoding { done, total }, Transcoding { done: d2, total: t2 }) => {
                t2 == total && *d2 == done + 1 && d2 <= total
            }
            (Transcoding { done, total }, Uploading { done: 0, total: t2 }) => {
                done == total && t2 == total
            }
            (Uploading { done, total }, Uploading { done: d2, total: t2 }) => {
                t2 == total && *d2 == done + 1 && d2 <= total
            }
            (Uploading { done, total }, BuildingManifest) => done == total,
            (BuildingManifest, PublishingManifest) => true,
            (PublishingManifest, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestState::Pending => f.write_str("pending"),
            IngestState::Rasterizing => f.write_str("rasterizing"),
            IngestState::Transcoding { done, total } => write!(f, "transcoding {done}/{total}"),
            IngestState::Uploading { done, total } => write!(f, "uploading {done}/{total}"),
            IngestState::BuildingManifest => f.write_str("building manifest"),
            IngestState::PublishingManifest => f.write_str("publishing manifest"),
            IngestState::Completed => f.write_str("completed"),
            IngestState::Failed { stage, reason } => write!(f, "failed during {stage}: {reason}"),
        }
    }
}

/// Owns the current state and reports every transition.
pub(crate) struct StateTracker {
    state: IngestState,
    callback: ProgressCallback,
}

impl StateTracker {
    pub(crate) fn new(callback: ProgressCallback) -> Self {
        let state = IngestState::Pending;
        callback.on_state_change(&state);
        Self { state, callback }
    }

    pub(crate) fn state(&self) -> &IngestState {
        &self.state
    }

    pub(crate) fn callback(&self) -> &ProgressCallback {
        &self.callback
    }

    pub(crate) fn advance(&mut self, next: IngestState) -> Result<(), IngestError> {
        if !self.state.can_transition_to(&next) {
            return Err(IngestError::Internal(format!(
                "illegal state transition {} → {}",
                self.state, next
            )));
        }
        debug!("State: {} → {}", self.state, next);
        self.state = next;
        self.callback.on_state_change(&self.state);
        Ok(())
    }

    /// Bump the `k/N` counter of the current page stage.
    pub(crate) fn page_done(&mut self) -> Result<(), IngestError> {
        let next = match self.state {
            IngestState::Transcoding { done, total } => IngestState::Transcoding {
                done: done + 1,
                total,
            },
            IngestState::Uploading { done, total } => IngestState::Uploading {
                done: done + 1,
                total,
            },
            ref other => {
                return Err(IngestError::Internal(format!(
                    "page completion reported while {other}"
                )))
            }
        };
        self.advance(next)
    }

    /// Enter `Failed`, recording the stage that was running. No-op when
    /// already terminal.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        if let Some(stage) = self.state.stage() {
            self.state = IngestState::Failed {
                stage,
                reason: reason.into(),
            };
            self.callback.on_state_change(&self.state);
        }
    }
}

/// Tagged result of one page's work in a stage.
#[derive(Debug)]
pub enum PageOutcome<T> {
    Succeeded {
        page_num: usize,
        value: T,
        retries: u32,
    },
    Failed(PageError),
}

/// Pre-sized, write-once result slots indexed by 1-based page number.
#[derive(Debug)]
pub(crate) struct PageSlots<T> {
    slots: Vec<Option<T>>,
}

impl<T> PageSlots<T> {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(total).collect(),
        }
    }

    pub(crate) fn fill(&mut self, page_num: usize, value: T) -> Result<(), IngestError> {
        let total = self.slots.len();
        let slot = page_num
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| IngestError::BuildInconsistency {
                expected: total,
                actual: page_num,
                detail: format!("page {page_num} is outside 1..={total}"),
            })?;
        if slot.is_some() {
            return Err(IngestError::BuildInconsistency {
                expected: total,
                actual: total + 1,
                detail: format!("page {page_num} produced twice"),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    /// Values in page order; every slot must be filled.
    pub(crate) fn into_ordered(self) -> Result<Vec<T>, IngestError> {
        let expected = self.slots.len();
        let filled = self.slots.iter().filter(|s| s.is_some()).count();
        if filled != expected {
            let missing = self.slots.iter().position(Option::is_none).map_or(0, |i| i + 1);
            return Err(IngestError::BuildInconsistency {
                expected,
                actual: filled,
                detail: format!("page {missing} has no result"),
            });
        }
        Ok(self.slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::IngestProgressCallback;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl IngestProgressCallback for Recorder {
        fn on_state_change(&self, state: &IngestState) {
            self.0.lock().unwrap().push(state.to_string());
        }
    }

    #[test]
    fn happy_path_is_legal() {
        let rec = Arc::new(Recorder::default());
        let mut t = StateTracker::new(rec.clone());
        t.advance(IngestState::Rasterizing).unwrap();
        t.advance(IngestState::Transcoding { done: 0, total: 2 }).unwrap();
        t.page_done().unwrap();
        t.page_done().unwrap();
        t.advance(IngestState::Uploading { done: 0, total: 2 }).unwrap();
        t.page_done().unwrap();
        t.page_done().unwrap();
        t.advance(IngestState::BuildingManifest).unwrap();
        t.advance(IngestState::PublishingManifest).unwrap();
        t.advance(IngestState::Completed).unwrap();
        assert!(t.state().is_terminal());

        let seen = rec.0.lock().unwrap();
        assert_eq!(seen.first().unwrap(), "pending");
        assert!(seen.contains(&"uploading 2/2".to_string()));
        assert_eq!(seen.last().unwrap(), "completed");
    }

    #[test]
    fn cannot_skip_pages_or_stages() {
        let s = IngestState::Transcoding { done: 1, total: 3 };
        assert!(!s.can_transition_to(&IngestState::Uploading { done: 0, total: 3 }));
        assert!(!s.can_transition_to(&IngestState::Transcoding { done: 3, total: 3 }));
        assert!(!IngestState::Pending.can_transition_to(&IngestState::Completed));
        assert!(!IngestState::Rasterizing
            .can_transition_to(&IngestState::Transcoding { done: 0, total: 0 }));
    }

    #[test]
    fn terminal_states_are_final() {
        let failed = IngestState::Failed {
            stage: Stage::Uploading,
            reason: "x".into(),
        };
        assert!(!failed.can_transition_to(&IngestState::Completed));
        assert!(!IngestState::Completed.can_transition_to(&failed));
    }

    #[test]
    fn fail_records_running_stage() {
        let mut t = StateTracker::new(Arc::new(crate::progress::NoopProgressCallback));
        t.advance(IngestState::Rasterizing).unwrap();
        t.fail("boom");
        assert_eq!(
            t.state(),
            &IngestState::Failed {
                stage: Stage::Rasterizing,
                reason: "boom".into()
            }
        );
        t.fail("again");
        assert!(matches!(t.state(), IngestState::Failed { reason, .. } if reason == "boom"));
    }

    #[test]
    fn slots_are_write_once_and_ordered() {
        let mut slots = PageSlots::new(3);
        slots.fill(3, "c").unwrap();
        slots.fill(1, "a").unwrap();
        assert!(slots.fill(1, "again").is_err());
        assert!(slots.fill(4, "d").is_err());
        slots.fill(2, "b").unwrap();
        assert_eq!(slots.into_ordered().unwrap(), ["a", "b", "c"]);
    }

    #[test]
    fn unfilled_slot_is_inconsistent() {
        let mut slots = PageSlots::new(2);
        slots.fill(1, 10).unwrap();
        let err = slots.into_ordered().unwrap_err();
        assert!(err.to_string().contains("page 2 has no result"));
    }
}
