use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a single work item.
///
/// Each item flows through: PENDING → CONDITIONING → SUBMITTING → SUCCEEDED,
/// looping back to SUBMITTING through AWAITING_RETRY or REPAIRING on
/// recoverable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    Pending,
    Conditioning,
    Submitting,
    AwaitingRetry,
    Repairing,
    Succeeded,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Pending => write!(f, "PENDING"),
            ItemState::Conditioning => write!(f, "CONDITIONING"),
            ItemState::Submitting => write!(f, "SUBMITTING"),
            ItemState::AwaitingRetry => write!(f, "AWAITING_RETRY"),
            ItemState::Repairing => write!(f, "REPAIRING"),
            ItemState::Succeeded => write!(f, "SUCCEEDED"),
            ItemState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Succeeded | ItemState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Any non-terminal state may fail (read errors, conditioning errors,
    /// cancellation). Terminal states have no successors.
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Conditioning) => true,
            (Conditioning, Submitting) => true,
            (Submitting, Succeeded | AwaitingRetry | Repairing) => true,
            (AwaitingRetry, Submitting) => true,
            (Repairing, Submitting) => true,
            _ => false,
        }
    }
}
