//! The run ledger: one immutable [`Outcome`] per work item, and the summary
//! derived from it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::baidu::Recognition;
use crate::error::FailureKind;

/// Terminal result for a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        recognition: Recognition,
        char_count: usize,
        attempts: u32,
        elapsed_ms: u64,
    },
    Failure {
        kind: FailureKind,
        message: String,
        attempts: u32,
        elapsed_ms: u64,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Success { attempts, .. } | Outcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            Outcome::Success { elapsed_ms, .. } | Outcome::Failure { elapsed_ms, .. } => {
                *elapsed_ms
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub outcome: Outcome,
}

#[derive(Default)]
struct Entries {
    order: Vec<LedgerEntry>,
    seen: HashSet<String>,
}

/// Append-only map from work item identifier to outcome, in recording order.
///
/// Clones share the same entries. All workers write through one coarse
/// lock, which is never held across an await.
#[derive(Clone)]
pub struct RunLedger {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    expected: usize,
    entries: Arc<Mutex<Entries>>,
}

impl RunLedger {
    pub fn new(expected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            expected,
            entries: Arc::new(Mutex::new(Entries::default())),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records `outcome` for `id`. Returns `false` if `id` already has one;
    /// the first outcome stands.
    pub fn record(&self, id: impl Into<String>, outcome: Outcome) -> bool {
        let id = id.into();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.seen.insert(id.clone()) {
            return false;
        }
        entries.order.push(LedgerEntry { id, outcome });
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outcome(&self, id: &str) -> Option<Outcome> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.outcome.clone())
    }

    /// Snapshot of all entries in recording order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn summary(&self) -> RunSummary {
        let entries = self.entries();
        let completed_at = Utc::now();

        let total = entries.len();
        let succeeded = entries.iter().filter(|e| e.outcome.is_success()).count();
        let failed = total - succeeded;

        let mut failures_by_kind = BTreeMap::new();
        let mut failed_items = Vec::new();
        let mut total_chars = 0;
        for entry in &entries {
            match &entry.outcome {
                Outcome::Success { char_count, .. } => total_chars += char_count,
                Outcome::Failure {
                    kind,
                    message,
                    attempts,
                    ..
                } => {
                    *failures_by_kind.entry(*kind).or_insert(0) += 1;
                    failed_items.push(FailedItem {
                        id: entry.id.clone(),
                        kind: *kind,
                        message: message.clone(),
                        attempts: *attempts,
                    });
                }
            }
        }

        let item_elapsed_ms: u64 = entries.iter().map(|e| e.outcome.elapsed_ms()).sum();

        RunSummary {
            run_id: self.run_id.to_string(),
            started_at: self.started_at,
            completed_at,
            total,
            succeeded,
            failed,
            not_dispatched: self.expected.saturating_sub(total),
            failures_by_kind,
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64 * 100.0
            },
            wall_clock_ms: (completed_at - self.started_at).num_milliseconds().max(0) as u64,
            item_elapsed_ms,
            average_item_ms: if total == 0 {
                0
            } else {
                item_elapsed_ms / total as u64
            },
            total_chars,
            failed_items,
        }
    }
}

/// A failed item, listed so a caller can target remediation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

/// Aggregate statistics for a run. Serializable so a caller can persist it
/// and resubmit failures later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Inputs never started because the run was cancelled.
    pub not_dispatched: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// Percentage of recorded items that succeeded.
    pub success_rate: f64,
    pub wall_clock_ms: u64,
    /// Sum of per-item elapsed time.
    pub item_elapsed_ms: u64,
    pub average_item_ms: u64,
    pub total_chars: usize,
    pub failed_items: Vec<FailedItem>,
}

impl RunSummary {
    /// Failed item identifiers, optionally restricted to `kinds`.
    pub fn failed_ids(&self, kinds: &[FailureKind]) -> Vec<String> {
        self.failed_items
            .iter()
            .filter(|item| kinds.is_empty() || kinds.contains(&item.kind))
            .map(|item| item.id.clone())
            .collect()
    }
}
