use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gilfoyle_core::ReviewRunKey;
use serde::Serialize;

/// Lifecycle of one review run.
///
/// A key with no registry entry is `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Admitted,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Admitted => write!(f, "admitted"),
            RunState::InProgress => write!(f, "in_progress"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// How a run ended, as reported to [`RunCoordinator::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    Failed,
}

/// Why a trigger did not start a run. Expected control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyRunning,
    AlreadyCompletedForRevision,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AlreadyRunning => write!(f, "already_running"),
            RejectReason::AlreadyCompletedForRevision => {
                write!(f, "already_completed_for_revision")
            }
        }
    }
}

/// Result of [`RunCoordinator::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectReason),
}

/// One registry row, as returned by [`RunCoordinator::snapshot`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub key: ReviewRunKey,
    pub state: RunState,
    pub admitted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct RunEntry {
    state: RunState,
    admitted_at: DateTime<Utc>,
    finished_at: Option<Instant>,
}

impl RunEntry {
    fn expired(&self, retention: Duration, now: Instant) -> bool {
        self.finished_at
            .is_some_and(|done| now.saturating_duration_since(done) >= retention)
    }
}

/// Per-key run registry deciding whether a trigger may start a review.
///
/// At most one run per [`ReviewRunKey`] is active at any time. A completed
/// key keeps rejecting triggers until the retention window has passed; a
/// failed key can be admitted again at once and is listed as `Failed` until
/// swept.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gilfoyle_core::ReviewRunKey;
/// use gilfoyle_review::coordinator::{
///     Admission, RejectReason, RunCoordinator, TerminalState,
/// };
///
/// let coordinator = RunCoordinator::new(Duration::from_secs(3600));
/// let key = ReviewRunKey::new(3, 7, "abc123");
///
/// assert_eq!(coordinator.admit(&key), Admission::Admitted);
/// assert_eq!(
///     coordinator.admit(&key),
///     Admission::Rejected(RejectReason::AlreadyRunning)
/// );
///
/// coordinator.complete(&key, TerminalState::Completed);
/// assert_eq!(
///     coordinator.admit(&key),
///     Admission::Rejected(RejectReason::AlreadyCompletedForRevision)
/// );
/// ```
#[derive(Debug)]
pub struct RunCoordinator {
    runs: Mutex<HashMap<ReviewRunKey, RunEntry>>,
    retention: Duration,
}

impl RunCoordinator {
    pub fn new(retention: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReviewRunKey, RunEntry>> {
        // The map stays consistent across a panicking holder: every mutation
        // is a single insert or remove.
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically check and claim `key`.
    pub fn admit(&self, key: &ReviewRunKey) -> Admission {
        let mut runs = self.lock();
        let now = Instant::now();
        if runs
            .get(key)
            .is_some_and(|entry| entry.expired(self.retention, now))
        {
            runs.remove(key);
        }

        match runs.get(key).map(|entry| entry.state) {
            Some(RunState::Admitted | RunState::InProgress) => {
                Admission::Rejected(RejectReason::AlreadyRunning)
            }
            Some(RunState::Completed) => {
                Admission::Rejected(RejectReason::AlreadyCompletedForRevision)
            }
            Some(RunState::Idle | RunState::Failed) | None => {
                runs.insert(
                    key.clone(),
                    RunEntry {
                        state: RunState::Admitted,
                        admitted_at: Utc::now(),
                        finished_at: None,
                    },
                );
                Admission::Admitted
            }
        }
    }

    /// Mark an admitted run as executing.
    pub fn start(&self, key: &ReviewRunKey) {
        if let Some(entry) = self.lock().get_mut(key) {
            if entry.state == RunState::Admitted {
                entry.state = RunState::InProgress;
            }
        }
    }

    /// Record the end of a run and release its slot.
    pub fn complete(&self, key: &ReviewRunKey, outcome: TerminalState) {
        let mut runs = self.lock();
        match outcome {
            TerminalState::Completed => {
                let entry = runs.entry(key.clone()).or_insert_with(|| RunEntry {
                    state: RunState::Completed,
                    admitted_at: Utc::now(),
                    finished_at: None,
                });
                entry.state = RunState::Completed;
                entry.finished_at = Some(Instant::now());
            }
            TerminalState::Failed => {
                // Kept for `state` and `snapshot` until swept; `admit` accepts
                // a failed key at once.
                let entry = runs.entry(key.clone()).or_insert_with(|| RunEntry {
                    state: RunState::Failed,
                    admitted_at: Utc::now(),
                    finished_at: None,
                });
                entry.state = RunState::Failed;
                entry.finished_at = Some(Instant::now());
            }
        }
    }

    /// Mark `key` as reviewed without a run of its own, so triggers for it
    /// are suppressed like any completed revision.
    ///
    /// Leaves the entry alone while a run for `key` is active.
    pub fn record_completed(&self, key: &ReviewRunKey) {
        let mut runs = self.lock();
        if matches!(
            runs.get(key).map(|entry| entry.state),
            Some(RunState::Admitted | RunState::InProgress)
        ) {
            return;
        }
        runs.insert(
            key.clone(),
            RunEntry {
                state: RunState::Completed,
                admitted_at: Utc::now(),
                finished_at: Some(Instant::now()),
            },
        );
    }

    /// Current state of `key`, treating expired entries as idle.
    pub fn state(&self, key: &ReviewRunKey) -> RunState {
        let runs = self.lock();
        match runs.get(key) {
            Some(entry) if !entry.expired(self.retention, Instant::now()) => entry.state,
            _ => RunState::Idle,
        }
    }

    /// Drop terminal entries whose retention window has passed.
    pub fn sweep(&self) -> usize {
        let mut runs = self.lock();
        let now = Instant::now();
        let before = runs.len();
        runs.retain(|_, entry| !entry.expired(self.retention, now));
        before - runs.len()
    }

    /// Live registry entries ordered by key.
    pub fn snapshot(&self) -> Vec<RunSnapshot> {
        let runs = self.lock();
        let now = Instant::now();
        let mut rows: Vec<RunSnapshot> = runs
            .iter()
            .filter(|(_, entry)| !entry.expired(self.retention, now))
            .map(|(key, entry)| RunSnapshot {
                key: key.clone(),
                state: entry.state,
                admitted_at: entry.admitted_at,
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn key(sha: &str) -> ReviewRunKey {
        ReviewRunKey::new(3, 7, sha)
    }

    #[test]
    fn concurrent_admits_collapse_to_one() {
        let coordinator = Arc::new(RunCoordinator::new(Duration::from_secs(60)));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coordinator.admit(&key("abc123"))
                })
            })
            .collect();
        let results: Vec<Admission> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted = results
            .iter()
            .filter(|r| **r == Admission::Admitted)
            .count();
        assert_eq!(admitted, 1);
        assert!(results.iter().all(|r| *r == Admission::Admitted
            || *r == Admission::Rejected(RejectReason::AlreadyRunning)));
    }

    #[test]
    fn new_revision_is_a_distinct_key() {
        let coordinator = RunCoordinator::new(Duration::from_secs(60));
        assert_eq!(coordinator.admit(&key("abc123")), Admission::Admitted);
        assert_eq!(coordinator.admit(&key("def456")), Admission::Admitted);
    }

    #[test]
    fn lifecycle_states() {
        let coordinator = RunCoordinator::new(Duration::from_secs(60));
        let k = key("abc123");
        assert_eq!(coordinator.state(&k), RunState::Idle);
        coordinator.admit(&k);
        assert_eq!(coordinator.state(&k), RunState::Admitted);
        coordinator.start(&k);
        assert_eq!(coordinator.state(&k), RunState::InProgress);
        assert_eq!(
            coordinator.admit(&k),
            Admission::Rejected(RejectReason::AlreadyRunning)
        );
        coordinator.complete(&k, TerminalState::Completed);
        assert_eq!(coordinator.state(&k), RunState::Completed);
    }

    #[test]
    fn completed_key_readmitted_after_retention() {
        let coordinator = RunCoordinator::new(Duration::from_millis(20));
        let k = key("abc123");
        coordinator.admit(&k);
        coordinator.complete(&k, TerminalState::Completed);
        assert_eq!(
            coordinator.admit(&k),
            Admission::Rejected(RejectReason::AlreadyCompletedForRevision)
        );
        thread::sleep(Duration::from_millis(40));
        assert_eq!(coordinator.admit(&k), Admission::Admitted);
    }

    #[test]
    fn failed_run_releases_immediately() {
        let coordinator = RunCoordinator::new(Duration::from_secs(3600));
        let k = key("abc123");
        coordinator.admit(&k);
        coordinator.start(&k);
        coordinator.complete(&k, TerminalState::Failed);
        assert_eq!(coordinator.state(&k), RunState::Failed);
        assert_eq!(coordinator.snapshot()[0].state, RunState::Failed);
        assert_eq!(coordinator.admit(&k), Admission::Admitted);
        assert_eq!(coordinator.state(&k), RunState::Admitted);
    }

    #[test]
    fn failed_entry_is_swept_after_retention() {
        let coordinator = RunCoordinator::new(Duration::from_millis(20));
        let k = key("abc123");
        coordinator.admit(&k);
        coordinator.complete(&k, TerminalState::Failed);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(coordinator.sweep(), 1);
        assert_eq!(coordinator.state(&k), RunState::Idle);
    }

    #[test]
    fn record_completed_suppresses_but_never_overrides_active_run() {
        let coordinator = RunCoordinator::new(Duration::from_secs(60));
        coordinator.record_completed(&key("def456"));
        assert_eq!(
            coordinator.admit(&key("def456")),
            Admission::Rejected(RejectReason::AlreadyCompletedForRevision)
        );

        coordinator.admit(&key("fed789"));
        coordinator.record_completed(&key("fed789"));
        assert_eq!(coordinator.state(&key("fed789")), RunState::Admitted);
    }

    #[test]
    fn sweep_evicts_only_expired() {
        let coordinator = RunCoordinator::new(Duration::from_millis(20));
        coordinator.admit(&key("done"));
        coordinator.complete(&key("done"), TerminalState::Completed);
        coordinator.admit(&key("running"));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(coordinator.sweep(), 1);
        let rows = coordinator.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.head_sha, "running");
        assert_eq!(rows[0].state, RunState::Admitted);
    }

    #[test]
    fn snapshot_is_ordered() {
        let coordinator = RunCoordinator::new(Duration::from_secs(60));
        coordinator.admit(&ReviewRunKey::new(9, 1, "a"));
        coordinator.admit(&ReviewRunKey::new(2, 5, "b"));
        let rows = coordinator.snapshot();
        assert_eq!(rows[0].key.project_id, 2);
        assert_eq!(rows[1].key.project_id, 9);
    }
}
