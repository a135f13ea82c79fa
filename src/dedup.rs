//! Per-path admission state.
//!
//! Every path that has ever been admitted gets one [`DedupEntry`]. The
//! debouncer moves it to `Queued`, workers move it through `Processing` to
//! `Cooldown`. `Cooldown` turns back into `Idle` lazily, the next time the
//! entry is looked at after the window has elapsed.
//!
//! Entries live in a `DashMap`, so admissions for unrelated paths only
//! contend when they hash to the same shard.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::types::{Priority, Trigger};

/// Lifecycle of a path inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupState {
    Idle,
    Queued,
    Processing,
    Cooldown,
}

impl DedupState {
    /// Queued or being processed right now.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DedupState::Queued | DedupState::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub state: DedupState,
    pub last_queued_at: Option<Instant>,
    pub last_processed_at: Option<Instant>,
}

impl Default for DedupEntry {
    fn default() -> Self {
        Self {
            state: DedupState::Idle,
            last_queued_at: None,
            last_processed_at: None,
        }
    }
}

impl DedupEntry {
    /// Resolve an expired cooldown to `Idle`.
    fn settle(&mut self, now: Instant, cooldown: Duration) {
        if self.state == DedupState::Cooldown && !self.cooling(now, cooldown) {
            self.state = DedupState::Idle;
        }
    }

    /// True while `now` is still inside the cooldown window.
    fn cooling(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_processed_at
            .is_some_and(|at| now.saturating_duration_since(at) <= cooldown)
    }
}

/// Why the tracker refused an admission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    #[error("already {0:?}")]
    InFlight(DedupState),

    #[error("modified {elapsed:?} after last processing, cooldown is {cooldown:?}")]
    Cooldown { elapsed: Duration, cooldown: Duration },
}

/// Thread-safe map of path -> [`DedupEntry`].
#[derive(Debug)]
pub struct DedupTracker {
    entries: DashMap<PathBuf, DedupEntry>,
    max_entries: usize,
    // Signalled whenever a path leaves the in-flight states
    settled: Mutex<()>,
    settled_cv: Condvar,
}

impl DedupTracker {
    /// Create a tracker that prunes settled entries once it holds more than
    /// `max_entries` paths.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            settled: Mutex::new(()),
            settled_cv: Condvar::new(),
        }
    }

    /// Apply the in-flight and cooldown rules and, on success, mark the path
    /// `Queued`.
    ///
    /// The check and the transition happen under the entry's shard lock, so
    /// two producers racing on one path cannot both be admitted.
    pub fn try_admit(
        &self,
        path: &Path,
        trigger: Trigger,
        now: Instant,
        cooldown: Duration,
    ) -> Result<Priority, AdmissionRejection> {
        let decision = {
            let mut entry = self.entries.entry(path.to_path_buf()).or_default();
            entry.settle(now, cooldown);

            if entry.state.is_in_flight() {
                Err(AdmissionRejection::InFlight(entry.state))
            } else {
                let decision = match trigger {
                    Trigger::Created => Ok(Priority::High),
                    Trigger::Direct(priority) => Ok(priority),
                    Trigger::Modified => match entry.last_processed_at {
                        Some(at) if entry.cooling(now, cooldown) => {
                            Err(AdmissionRejection::Cooldown {
                                elapsed: now.saturating_duration_since(at),
                                cooldown,
                            })
                        }
                        _ => Ok(Priority::Medium),
                    },
                };

                if decision.is_ok() {
                    entry.state = DedupState::Queued;
                    entry.last_queued_at = Some(now);
                }
                decision
            }
        };

        if self.entries.len() > self.max_entries {
            let removed = self.prune(now, cooldown);
            crate::debug_event!("dedup", "pruned", "{removed} settled paths");
        }

        decision
    }

    /// Undo an admission the queue refused.
    pub fn rollback(&self, path: &Path) {
        if let Some(mut entry) = self.entries.get_mut(path) {
            if entry.state == DedupState::Queued {
                entry.state = DedupState::Idle;
            }
        }
        self.notify_settled();
    }

    /// Re-mark a path `Queued` for a retry, bypassing admission rules.
    pub fn mark_requeued(&self, path: &Path, now: Instant) {
        let mut entry = self.entries.entry(path.to_path_buf()).or_default();
        entry.state = DedupState::Queued;
        entry.last_queued_at = Some(now);
    }

    pub fn mark_processing(&self, path: &Path) {
        self.entries.entry(path.to_path_buf()).or_default().state = DedupState::Processing;
    }

    /// Record a terminal outcome and start the cooldown window.
    pub fn mark_completed(&self, path: &Path, now: Instant) {
        {
            let mut entry = self.entries.entry(path.to_path_buf()).or_default();
            entry.state = DedupState::Cooldown;
            entry.last_processed_at = Some(now);
        }
        self.notify_settled();
    }

    /// Block until no path is queued or processing, or `timeout` passes.
    ///
    /// Returns whether the tracker settled. `Duration::MAX` waits without a
    /// deadline.
    pub fn wait_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.settled.lock();
        loop {
            if self.in_flight() == 0 {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self.settled_cv.wait_until(&mut guard, deadline).timed_out() {
                        return self.in_flight() == 0;
                    }
                }
                None => self.settled_cv.wait(&mut guard),
            }
        }
    }

    fn notify_settled(&self) {
        // Taking the lock orders this wakeup after a waiter's check
        let _guard = self.settled.lock();
        self.settled_cv.notify_all();
    }

    /// Effective state of a path, with expired cooldowns reported as `Idle`.
    pub fn state(&self, path: &Path, now: Instant, cooldown: Duration) -> DedupState {
        match self.entries.get(path) {
            Some(entry) => {
                let mut entry = entry.clone();
                entry.settle(now, cooldown);
                entry.state
            }
            None => DedupState::Idle,
        }
    }

    pub fn entry(&self, path: &Path) -> Option<DedupEntry> {
        self.entries.get(path).map(|e| e.clone())
    }

    /// Number of paths currently queued or processing.
    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.value().state.is_in_flight())
            .count()
    }

    /// Drop entries that are neither in flight nor inside their cooldown.
    pub fn prune(&self, now: Instant, cooldown: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.settle(now, cooldown);
            entry.state.is_in_flight() || entry.cooling(now, cooldown)
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const COOLDOWN: Duration = Duration::from_secs(60);

    fn path() -> PathBuf {
        PathBuf::from("/watch/song.wav")
    }

    #[test]
    fn test_created_admits_high_and_marks_queued() {
        let tracker = DedupTracker::default();
        let now = Instant::now();

        let priority = tracker
            .try_admit(&path(), Trigger::Created, now, COOLDOWN)
            .unwrap();
        assert_eq!(priority, Priority::High);

        let entry = tracker.entry(&path()).unwrap();
        assert_eq!(entry.state, DedupState::Queued);
        assert_eq!(entry.last_queued_at, Some(now));
    }

    #[test]
    fn test_in_flight_refuses_second_admission() {
        let tracker = DedupTracker::default();
        let now = Instant::now();
        tracker
            .try_admit(&path(), Trigger::Created, now, COOLDOWN)
            .unwrap();

        assert_eq!(
            tracker.try_admit(&path(), Trigger::Created, now, COOLDOWN),
            Err(AdmissionRejection::InFlight(DedupState::Queued))
        );

        tracker.mark_processing(&path());
        assert_eq!(
            tracker.try_admit(&path(), Trigger::Direct(Priority::Low), now, COOLDOWN),
            Err(AdmissionRejection::InFlight(DedupState::Processing))
        );
    }

    #[test]
    fn test_modified_respects_cooldown() {
        let tracker = DedupTracker::default();
        let t0 = Instant::now();
        tracker.mark_completed(&path(), t0);

        let early = tracker.try_admit(
            &path(),
            Trigger::Modified,
            t0 + Duration::from_secs(30),
            COOLDOWN,
        );
        assert!(matches!(early, Err(AdmissionRejection::Cooldown { .. })));
        assert_eq!(
            tracker.state(&path(), t0 + Duration::from_secs(30), COOLDOWN),
            DedupState::Cooldown
        );

        let late = tracker.try_admit(
            &path(),
            Trigger::Modified,
            t0 + Duration::from_secs(65),
            COOLDOWN,
        );
        assert_eq!(late, Ok(Priority::Medium));
    }

    #[test]
    fn test_created_bypasses_cooldown() {
        let tracker = DedupTracker::default();
        let t0 = Instant::now();
        tracker.mark_completed(&path(), t0);

        let priority = tracker
            .try_admit(&path(), Trigger::Created, t0 + Duration::from_secs(1), COOLDOWN)
            .unwrap();
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn test_rollback_returns_to_idle_but_keeps_history() {
        let tracker = DedupTracker::default();
        let t0 = Instant::now();
        tracker.mark_completed(&path(), t0);

        let t1 = t0 + Duration::from_secs(61);
        tracker
            .try_admit(&path(), Trigger::Modified, t1, COOLDOWN)
            .unwrap();
        tracker.rollback(&path());

        let entry = tracker.entry(&path()).unwrap();
        assert_eq!(entry.state, DedupState::Idle);
        assert_eq!(entry.last_processed_at, Some(t0));
    }

    #[test]
    fn test_prune_keeps_in_flight_and_cooling() {
        let tracker = DedupTracker::default();
        let t0 = Instant::now();
        let now = t0 + Duration::from_secs(120);

        let queued = PathBuf::from("/w/queued.wav");
        let cooling = PathBuf::from("/w/cooling.wav");
        let expired = PathBuf::from("/w/expired.wav");

        tracker
            .try_admit(&queued, Trigger::Created, now, COOLDOWN)
            .unwrap();
        tracker.mark_completed(&cooling, now);
        tracker.mark_completed(&expired, t0);

        let removed = tracker.prune(now, COOLDOWN);
        assert_eq!(removed, 1);
        assert!(tracker.entry(&queued).is_some());
        assert!(tracker.entry(&cooling).is_some());
        assert!(tracker.entry(&expired).is_none());
    }

    #[test]
    fn test_bounded_tracker_prunes_on_admission() {
        let tracker = DedupTracker::new(2);
        let old = Instant::now();
        let now = old + Duration::from_secs(600);

        tracker.mark_completed(Path::new("/w/a.wav"), old);
        tracker.mark_completed(Path::new("/w/b.wav"), old);
        tracker
            .try_admit(Path::new("/w/c.wav"), Trigger::Created, now, COOLDOWN)
            .unwrap();

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.in_flight(), 1);
    }
    #[test]
    fn test_racing_admissions_admit_exactly_once() {
        let tracker = Arc::new(DedupTracker::default());
        let now = Instant::now();
        let admitted = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        if tracker
                            .try_admit(&path(), Trigger::Created, now, COOLDOWN)
                            .is_ok()
                        {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_wait_settled_wakes_on_completion() {
        let tracker = Arc::new(DedupTracker::default());
        tracker
            .try_admit(&path(), Trigger::Created, Instant::now(), COOLDOWN)
            .unwrap();
        assert!(!tracker.wait_settled(Duration::from_millis(20)));

        let finisher = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                tracker.mark_processing(&path());
                tracker.mark_completed(&path(), Instant::now());
            })
        };

        assert!(tracker.wait_settled(Duration::from_secs(5)));
        finisher.join().unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_wait_settled_wakes_on_rollback() {
        let tracker = DedupTracker::default();
        tracker
            .try_admit(&path(), Trigger::Created, Instant::now(), COOLDOWN)
            .unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(50));
                tracker.rollback(&path());
            });
            assert!(tracker.wait_settled(Duration::MAX));
        });
    }
}
