//! Sync status surface.
//!
//! Collects the outcome of every cycle, the latest error per list and entry,
//! and a queue of dismissible notices for the user. Nothing here retries:
//! records that failed stay flagged and the next cycle picks them up.

use crate::{error::ErrorKind, EntryId, ListId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Notices kept before the oldest is dropped.
const MAX_NOTICES: usize = 32;

/// What the scheduler is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    /// Sync is turned off; only local bookkeeping runs.
    Disabled,
}

/// The kind of work a cycle performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleKind {
    /// Push only
    Update,
    /// Push then pull
    Sync,
    /// Local cleanup while sync is disabled
    LocalOnly,
    EnableSync,
    DisableSync,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "camelCase")]
pub enum CycleOutcome {
    Completed,
    /// Finished, but some records failed and stay queued
    Partial,
    /// Stopped early
    Aborted(ErrorKind),
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub lists_pushed: usize,
    pub entries_pushed: usize,
    /// Records deleted locally without a network call
    pub purged: usize,
    pub lists_merged: usize,
    pub entries_merged: usize,
    /// Remote records that could not be merged
    pub skipped: usize,
    pub failures: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    /// A report for a cycle starting now.
    pub fn start(kind: CycleKind) -> Self {
        let now = Utc::now();
        Self {
            kind,
            started_at: now,
            finished_at: now,
            lists_pushed: 0,
            entries_pushed: 0,
            purged: 0,
            lists_merged: 0,
            entries_merged: 0,
            skipped: 0,
            failures: 0,
            outcome: CycleOutcome::Completed,
        }
    }

    /// Close the report with an outcome derived from its counters.
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        if self.outcome == CycleOutcome::Completed && (self.failures > 0 || self.skipped > 0) {
            self.outcome = CycleOutcome::Partial;
        }
        self
    }

    /// Close the report as aborted.
    pub fn abort(mut self, kind: ErrorKind) -> Self {
        self.finished_at = Utc::now();
        self.outcome = CycleOutcome::Aborted(kind);
        self
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Aborted(_))
    }
}

/// A non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StatusState {
    phase: Phase,
    last_cycle: Option<CycleReport>,
    cycles: u64,
    list_errors: BTreeMap<ListId, ErrorKind>,
    entry_errors: BTreeMap<EntryId, ErrorKind>,
    notices: VecDeque<Notice>,
    next_notice: u64,
}

/// Shared handle to the sync status.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    inner: Arc<Mutex<StatusState>>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        // Status is informational; a poisoned lock still holds usable data.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    /// Store the report of a finished cycle.
    pub fn finish_cycle(&self, report: CycleReport) {
        let mut state = self.lock();
        state.cycles += 1;
        if state.phase != Phase::Disabled {
            state.phase = Phase::Idle;
        }
        state.last_cycle = Some(report);
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.lock().last_cycle.clone()
    }

    /// Number of cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.lock().cycles
    }

    pub fn record_list_error(&self, list_id: ListId, kind: ErrorKind) {
        self.lock().list_errors.insert(list_id, kind);
    }

    pub fn clear_list_error(&self, list_id: ListId) {
        self.lock().list_errors.remove(&list_id);
    }

    pub fn list_error(&self, list_id: ListId) -> Option<ErrorKind> {
        self.lock().list_errors.get(&list_id).cloned()
    }

    pub fn record_entry_error(&self, entry_id: EntryId, kind: ErrorKind) {
        self.lock().entry_errors.insert(entry_id, kind);
    }

    pub fn clear_entry_error(&self, entry_id: EntryId) {
        self.lock().entry_errors.remove(&entry_id);
    }

    pub fn entry_error(&self, entry_id: EntryId) -> Option<ErrorKind> {
        self.lock().entry_errors.get(&entry_id).cloned()
    }

    /// Raise a notice unless one of the same kind is still undismissed.
    pub fn notify(&self, kind: ErrorKind, message: impl Into<String>) {
        let mut state = self.lock();
        if state.notices.iter().any(|n| n.kind == kind) {
            return;
        }
        state.next_notice += 1;
        let notice = Notice {
            id: state.next_notice,
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        };
        if state.notices.len() == MAX_NOTICES {
            state.notices.pop_front();
        }
        state.notices.push_back(notice);
    }

    /// Undismissed notices, oldest first.
    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.iter().cloned().collect()
    }

    pub fn dismiss(&self, id: u64) {
        self.lock().notices.retain(|n| n.id != id);
    }

    pub fn dismiss_all(&self) {
        self.lock().notices.clear();
    }

    /// Forget per-record errors, used when sync is reset.
    pub fn clear_record_errors(&self) {
        let mut state = self.lock();
        state.list_errors.clear();
        state.entry_errors.clear();
    }
}
