use std::path::{Path, PathBuf};
use std::time::Instant;

use super::state::ItemState;
use crate::error::FailureKind;
use crate::retry::Attempts;

/// One image's processing record for the duration of a run.
///
/// Owned by exactly one worker; dropped once its outcome is in the ledger.
#[derive(Debug)]
pub struct WorkItem {
    pub path: PathBuf,
    pub id: String,
    /// Original file bytes. Repairs always re-condition from these.
    pub bytes: Vec<u8>,
    pub state: ItemState,
    pub state_history: Vec<ItemState>,
    pub attempts: Attempts,
    pub last_failure: Option<FailureKind>,
    pub started_at: Instant,
}

impl WorkItem {
    pub fn new(path: &Path) -> Self {
        Self {
            id: path.display().to_string(),
            path: path.to_path_buf(),
            bytes: Vec::new(),
            state: ItemState::Pending,
            state_history: Vec::new(),
            attempts: Attempts::default(),
            last_failure: None,
            started_at: Instant::now(),
        }
    }

    /// Move to `next`, recording the previous state.
    ///
    /// Returns `false` and leaves the item untouched when the transition
    /// is not legal.
    pub fn advance(&mut self, next: ItemState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state_history.push(self.state);
        self.state = next;
        true
    }

    /// Record a classified failure against the per-cause counters.
    pub fn record_failure(&mut self, kind: FailureKind) {
        self.last_failure = Some(kind);
        self.attempts.record(kind);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
