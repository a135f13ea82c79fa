//! Admission of file events into the queue.
//!
//! Saving a file usually produces a burst of notifications. The debouncer
//! turns that burst into at most one task per meaningful change:
//!
//! 1. Refuse files that fail basic admission (extension, empty, validator).
//! 2. Refuse paths that are already queued or processing.
//! 3. `Created` is admitted at `High`, cooldown or not.
//! 4. `Modified` is admitted at `Medium` only once the cooldown since the
//!    last processing has elapsed.
//!
//! Capacity is the queue's business. When the queue refuses, the path's
//! state is rolled back so the next event can try again.

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::Clock;
use crate::dedup::{AdmissionRejection, DedupState, DedupTracker};
use crate::processing::{ErrorKind, FileValidator, InvalidFile, SupportedFiles};
use crate::queue::{EnqueueError, PriorityQueue};
use crate::stats::StatsRegistry;
use crate::types::{FileEventKind, PendingTask, Priority, Trigger};

/// Result of one admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueDecision {
    Admitted { priority: Priority, sequence: u64 },
    Rejected(Rejection),
}

impl EnqueueDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, EnqueueDecision::Admitted { .. })
    }

    pub fn priority(&self) -> Option<Priority> {
        match self {
            EnqueueDecision::Admitted { priority, .. } => Some(*priority),
            EnqueueDecision::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            EnqueueDecision::Admitted { .. } => None,
            EnqueueDecision::Rejected(r) => Some(r),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("invalid file: {reason}")]
    Invalid { reason: String },

    #[error("already {0:?}")]
    InFlight(DedupState),

    #[error("inside cooldown window")]
    Debounced,

    #[error("queue is full ({capacity} tasks)")]
    CapacityExceeded { capacity: usize },

    #[error("pipeline is shutting down")]
    Closed,
}

impl Rejection {
    /// Error classification, for rejections that count as errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Rejection::Invalid { .. } => Some(ErrorKind::Validation),
            Rejection::CapacityExceeded { .. } => Some(ErrorKind::CapacityExceeded),
            Rejection::InFlight(_) | Rejection::Debounced | Rejection::Closed => None,
        }
    }
}

impl From<InvalidFile> for Rejection {
    fn from(e: InvalidFile) -> Self {
        Rejection::Invalid { reason: e.reason }
    }
}

/// Anything that accepts raw file events.
pub trait FileEventTarget: Send + Sync {
    fn on_file_event(&self, path: &Path, kind: FileEventKind) -> EnqueueDecision;
}

/// Turns file events into queued tasks.
pub struct EventDebouncer {
    tracker: Arc<DedupTracker>,
    queue: Arc<PriorityQueue>,
    stats: Arc<StatsRegistry>,
    validator: Arc<dyn FileValidator>,
    clock: Arc<dyn Clock>,
    files: SupportedFiles,
    cooldown: Duration,
}

impl std::fmt::Debug for EventDebouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDebouncer")
            .field("files", &self.files)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl EventDebouncer {
    pub fn new(
        tracker: Arc<DedupTracker>,
        queue: Arc<PriorityQueue>,
        stats: Arc<StatsRegistry>,
        validator: Arc<dyn FileValidator>,
        clock: Arc<dyn Clock>,
        files: SupportedFiles,
        cooldown: Duration,
    ) -> Self {
        Self {
            tracker,
            queue,
            stats,
            validator,
            clock,
            files,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn files(&self) -> &SupportedFiles {
        &self.files
    }

    /// Run every admission rule for `path` and enqueue it if they pass.
    pub fn admit(&self, path: &Path, trigger: Trigger) -> EnqueueDecision {
        if let Err(e) = self.basic_admission(path) {
            self.stats.record_invalid();
            tracing::warn!("[debouncer] skipping invalid file {}: {e}", path.display());
            return EnqueueDecision::Rejected(e.into());
        }

        let now = self.clock.now();
        let priority = match self.tracker.try_admit(path, trigger, now, self.cooldown) {
            Ok(priority) => priority,
            Err(AdmissionRejection::InFlight(state)) => {
                self.stats.record_in_flight_reject();
                crate::debug_event!("debouncer", "in flight", "{} ({state:?})", path.display());
                return EnqueueDecision::Rejected(Rejection::InFlight(state));
            }
            Err(AdmissionRejection::Cooldown { elapsed, .. }) => {
                self.stats.record_debounced();
                crate::debug_event!(
                    "debouncer",
                    "cooldown",
                    "{} modified {}s after processing",
                    path.display(),
                    elapsed.as_secs()
                );
                return EnqueueDecision::Rejected(Rejection::Debounced);
            }
        };

        match self.queue.enqueue(PendingTask::new(path, priority)) {
            Ok(sequence) => {
                self.stats.record_enqueued();
                crate::log_event!(
                    "debouncer",
                    "enqueued",
                    "{} ({priority}, queue size {})",
                    path.display(),
                    self.queue.size()
                );
                EnqueueDecision::Admitted { priority, sequence }
            }
            Err(EnqueueError::CapacityExceeded(full)) => {
                self.tracker.rollback(path);
                self.stats.record_capacity_rejection();
                tracing::warn!(
                    "[debouncer] queue full ({}), skipping {}",
                    full.capacity,
                    path.display()
                );
                EnqueueDecision::Rejected(Rejection::CapacityExceeded {
                    capacity: full.capacity,
                })
            }
            Err(EnqueueError::Closed) => {
                self.tracker.rollback(path);
                self.stats.record_closed_rejection();
                crate::log_event!("debouncer", "queue closed, skipping", "{}", path.display());
                EnqueueDecision::Rejected(Rejection::Closed)
            }
        }
    }

    /// Extension, excluded folders, zero-byte, then the external validator.
    fn basic_admission(&self, path: &Path) -> Result<(), InvalidFile> {
        self.files.check(path)?;

        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => return Err(InvalidFile::new("is a directory")),
            Ok(meta) if meta.len() == 0 => return Err(InvalidFile::new("file is empty")),
            Ok(_) => {}
            Err(_) => return Err(InvalidFile::new("file does not exist")),
        }

        // A panicking validator must not take the event thread down with it
        match catch_unwind(AssertUnwindSafe(|| self.validator.validate(path))) {
            Ok(result) => result,
            Err(_) => Err(InvalidFile::new("validator panicked")),
        }
    }
}

impl FileEventTarget for EventDebouncer {
    fn on_file_event(&self, path: &Path, kind: FileEventKind) -> EnqueueDecision {
        self.admit(path, kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::processing::BasicValidator;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        clock: Arc<ManualClock>,
        tracker: Arc<DedupTracker>,
        queue: Arc<PriorityQueue>,
        stats: Arc<StatsRegistry>,
        debouncer: EventDebouncer,
    }

    fn fixture(capacity: usize) -> Fixture {
        fixture_with(capacity, Arc::new(BasicValidator))
    }

    fn fixture_with(capacity: usize, validator: Arc<dyn FileValidator>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let clock = Arc::new(ManualClock::new());
        let tracker = Arc::new(DedupTracker::default());
        let queue = Arc::new(PriorityQueue::new(capacity));
        let stats = Arc::new(StatsRegistry::new());
        let debouncer = EventDebouncer::new(
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&stats),
            validator,
            clock.clone(),
            SupportedFiles::new(["wav", "mp3"], ["processed", "backups"]),
            Duration::from_secs(60),
        );
        Fixture {
            _dir: dir,
            root,
            clock,
            tracker,
            queue,
            stats,
            debouncer,
        }
    }

    fn touch(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"ID3\x03\x00\x00\x00\x00\x00\x00audio").unwrap();
        path
    }

    #[test]
    fn test_basic_admission_failures() {
        let fx = fixture(4);
        let txt = touch(&fx.root, "notes.txt");
        let empty = fx.root.join("empty.wav");
        fs::write(&empty, b"").unwrap();
        let output = touch(&fx.root, "processed/processed_a.wav");

        for path in [&txt, &empty, &output, &fx.root.join("missing.wav")] {
            let decision = fx.debouncer.on_file_event(path, FileEventKind::Created);
            assert!(
                matches!(decision, EnqueueDecision::Rejected(Rejection::Invalid { .. })),
                "{} should be invalid, got {decision:?}",
                path.display()
            );
        }
        assert_eq!(fx.stats.snapshot().rejected_invalid, 4);
        assert!(fx.queue.is_empty());
        assert!(fx.tracker.is_empty());
    }

    #[test]
    fn test_created_then_duplicate_is_in_flight() {
        let fx = fixture(4);
        let song = touch(&fx.root, "song.wav");

        let first = fx.debouncer.on_file_event(&song, FileEventKind::Created);
        assert_eq!(first.priority(), Some(Priority::High));

        let second = fx.debouncer.on_file_event(&song, FileEventKind::Modified);
        assert_eq!(
            second,
            EnqueueDecision::Rejected(Rejection::InFlight(DedupState::Queued))
        );
        assert_eq!(fx.queue.size(), 1);
    }

    #[test]
    fn test_modified_cooldown_scenario() {
        let fx = fixture(4);
        let x = touch(&fx.root, "x.wav");

        // Processed at t=0
        fx.tracker.mark_completed(&x, fx.clock.now());

        fx.clock.set_elapsed(Duration::from_secs(30));
        assert_eq!(
            fx.debouncer.on_file_event(&x, FileEventKind::Modified),
            EnqueueDecision::Rejected(Rejection::Debounced)
        );

        fx.clock.set_elapsed(Duration::from_secs(65));
        let decision = fx.debouncer.on_file_event(&x, FileEventKind::Modified);
        assert_eq!(decision.priority(), Some(Priority::Medium));
        assert_eq!(fx.stats.snapshot().debounced, 1);
    }

    #[test]
    fn test_created_bypasses_active_cooldown() {
        let fx = fixture(4);
        let x = touch(&fx.root, "x.wav");
        fx.tracker.mark_completed(&x, fx.clock.now());
        fx.clock.advance(Duration::from_secs(5));

        let decision = fx.debouncer.on_file_event(&x, FileEventKind::Created);
        assert_eq!(decision.priority(), Some(Priority::High));
    }

    #[test]
    fn test_capacity_rejection_rolls_back() {
        let fx = fixture(2);
        let a = touch(&fx.root, "a.wav");
        let b = touch(&fx.root, "b.wav");
        let c = touch(&fx.root, "c.wav");

        assert!(fx.debouncer.admit(&a, Trigger::Direct(Priority::Medium)).is_admitted());
        assert!(fx.debouncer.admit(&b, Trigger::Direct(Priority::Medium)).is_admitted());

        let decision = fx.debouncer.on_file_event(&c, FileEventKind::Created);
        assert_eq!(
            decision,
            EnqueueDecision::Rejected(Rejection::CapacityExceeded { capacity: 2 })
        );
        assert_eq!(decision.rejection().unwrap().kind(), Some(ErrorKind::CapacityExceeded));
        assert_eq!(fx.queue.size(), 2);
        assert_eq!(
            fx.tracker.state(&c, fx.clock.now(), Duration::from_secs(60)),
            DedupState::Idle
        );

        // Once there is room the same path is eligible again
        fx.queue.dequeue(Duration::ZERO).unwrap();
        assert!(fx.debouncer.on_file_event(&c, FileEventKind::Created).is_admitted());
    }

    #[test]
    fn test_closed_queue_rejection_is_counted() {
        let fx = fixture(4);
        let song = touch(&fx.root, "song.wav");
        fx.queue.close();

        let decision = fx.debouncer.on_file_event(&song, FileEventKind::Created);
        assert_eq!(decision, EnqueueDecision::Rejected(Rejection::Closed));
        assert_eq!(fx.stats.snapshot().rejected_closed, 1);
        assert_eq!(
            fx.tracker.state(&song, fx.clock.now(), Duration::from_secs(60)),
            DedupState::Idle
        );
    }

    struct PanickingValidator;

    impl FileValidator for PanickingValidator {
        fn validate(&self, _path: &Path) -> Result<(), InvalidFile> {
            panic!("decoder blew up");
        }
    }

    #[test]
    fn test_panicking_validator_is_contained() {
        let fx = fixture_with(4, Arc::new(PanickingValidator));
        let song = touch(&fx.root, "song.mp3");

        let decision = fx.debouncer.on_file_event(&song, FileEventKind::Created);
        assert_eq!(
            decision,
            EnqueueDecision::Rejected(Rejection::Invalid {
                reason: "validator panicked".into()
            })
        );
    }
}
