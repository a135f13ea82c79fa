//! Wires queue, dedup tracker, debouncer, workers and stats together.
//!
//! The orchestrator owns every piece of shared state. Producers (the folder
//! watcher, the scanner, CLI callers) go through it or through the debouncer
//! it exposes; nothing is held in module-level statics.
//!
//! ```text
//! FolderWatcher ─┐
//! scan_existing ─┼─> EventDebouncer ─> PriorityQueue ─> WorkerPool ─> OutcomeSink(s)
//! enqueue_file  ─┘        │                                 │
//!                     DedupTracker <────────────────────────┘
//! ```

use parking_lot::Mutex;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::dedup::{DedupState, DedupTracker};
use crate::processing::{
    BasicValidator, FileProcessor, FileValidator, OutcomeSink, ProcessingSettings, SupportedFiles,
};
use crate::queue::PriorityQueue;
use crate::stats::{StatsRegistry, StatsSnapshot};
use crate::types::{FileEventKind, Priority, Trigger};
use crate::watcher::{EnqueueDecision, EventDebouncer, FileEventTarget, ScanReport};
use crate::worker::{StopReport, WorkerContext, WorkerPool, WorkerState};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Orchestrator is already running")]
    AlreadyRunning,

    #[error("Orchestrator was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("Orchestrator was never started")]
    NotStarted,

    #[error("{0} is required")]
    MissingCollaborator(&'static str),

    #[error("Failed to spawn worker threads: {0}")]
    Spawn(#[from] io::Error),
}

enum Lifecycle {
    Ready,
    Running(WorkerPool),
    Stopped,
}

/// The scheduling core.
pub struct Orchestrator {
    settings: Settings,
    queue: Arc<PriorityQueue>,
    tracker: Arc<DedupTracker>,
    stats: Arc<StatsRegistry>,
    clock: Arc<dyn Clock>,
    debouncer: Arc<EventDebouncer>,
    worker_ctx: Arc<WorkerContext>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_workers", &self.settings.workers.max_workers)
            .field("queue_size", &self.queue.size())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Spawn `workers.max_workers` workers.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => return Err(OrchestratorError::AlreadyRunning),
            Lifecycle::Stopped => return Err(OrchestratorError::AlreadyStopped),
            Lifecycle::Ready => {}
        }

        let pool = WorkerPool::start(
            Arc::clone(&self.worker_ctx),
            self.settings.workers.max_workers,
        )?;
        *lifecycle = Lifecycle::Running(pool);

        crate::log_event!(
            "orchestrator",
            "started",
            "{} workers, queue capacity {}, cooldown {}s",
            self.settings.workers.max_workers,
            self.queue.capacity(),
            self.settings.dedup.cooldown_window_secs
        );
        Ok(())
    }

    /// Stop the workers, waiting up to `drain_timeout` for in-flight tasks.
    pub fn stop(&self, drain_timeout: Duration) -> Result<StopReport, OrchestratorError> {
        let pool = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(pool) => pool,
                Lifecycle::Ready => {
                    *lifecycle = Lifecycle::Ready;
                    return Err(OrchestratorError::NotStarted);
                }
                Lifecycle::Stopped => return Err(OrchestratorError::AlreadyStopped),
            }
        };

        Ok(pool.stop(drain_timeout))
    }

    /// Stop using the configured `drain_timeout_secs`.
    pub fn shutdown(&self) -> Result<StopReport, OrchestratorError> {
        self.stop(self.settings.workers.drain_timeout())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Queue a file by hand. Validation and the in-flight rule apply; the
    /// cooldown rule does not.
    pub fn enqueue_file(&self, path: impl AsRef<Path>, priority: Priority) -> EnqueueDecision {
        self.debouncer.admit(path.as_ref(), Trigger::Direct(priority))
    }

    /// Queue every supported file already in `folder` at `Low` priority.
    pub fn scan_existing(&self, folder: impl AsRef<Path>) -> ScanReport {
        crate::watcher::scan_existing(
            &self.debouncer,
            folder.as_ref(),
            self.settings.watch.recursive,
        )
    }

    /// Block until no task is queued or processing, or `timeout` passes.
    ///
    /// Wakes when a worker records a terminal outcome. `Duration::MAX` waits
    /// without a deadline.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.wait_settled(timeout)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.queued = self.queue.size() as u64;
        snapshot
    }

    pub fn queue_size(&self) -> usize {
        self.queue.size()
    }

    pub fn dedup_state(&self, path: impl AsRef<Path>) -> DedupState {
        self.tracker
            .state(path.as_ref(), self.clock.now(), self.debouncer.cooldown())
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(pool) => pool.states(),
            _ => Vec::new(),
        }
    }

    /// The debouncer, for wiring into a [`FolderWatcher`](crate::watcher::FolderWatcher).
    pub fn debouncer(&self) -> Arc<EventDebouncer> {
        Arc::clone(&self.debouncer)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl FileEventTarget for Orchestrator {
    fn on_file_event(&self, path: &Path, kind: FileEventKind) -> EnqueueDecision {
        self.debouncer.on_file_event(path, kind)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Lifecycle::Running(pool) =
            std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped)
        {
            pool.stop(Duration::ZERO);
        }
    }
}

/// Builder for [`Orchestrator`].
///
/// Only the processor is required. The validator defaults to
/// [`BasicValidator`] and the clock to [`SystemClock`].
pub struct OrchestratorBuilder {
    settings: Settings,
    validator: Option<Arc<dyn FileValidator>>,
    processor: Option<Arc<dyn FileProcessor>>,
    sinks: Vec<Arc<dyn OutcomeSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            validator: None,
            processor: None,
            sinks: Vec::new(),
            clock: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn FileValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn FileProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Add an outcome sink. May be called more than once.
    pub fn sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let processor = self
            .processor
            .ok_or(OrchestratorError::MissingCollaborator("processor"))?;
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(BasicValidator));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let settings = self.settings;

        let queue = Arc::new(PriorityQueue::new(settings.queue.max_queue_size));
        let tracker = Arc::new(DedupTracker::new(settings.dedup.max_tracked_paths));
        let stats = Arc::new(StatsRegistry::new());

        let debouncer = Arc::new(EventDebouncer::new(
            Arc::clone(&tracker),
            Arc::clone(&queue),
            Arc::clone(&stats),
            validator,
            Arc::clone(&clock),
            SupportedFiles::from_settings(&settings),
            settings.dedup.cooldown_window(),
        ));

        let worker_ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            tracker: Arc::clone(&tracker),
            stats: Arc::clone(&stats),
            processor,
            sinks: self.sinks,
            clock: Arc::clone(&clock),
            settings: ProcessingSettings::from_settings(&settings),
            dequeue_timeout: settings.workers.dequeue_timeout(),
            max_retries: settings.workers.max_retries,
        });

        Ok(Orchestrator {
            settings,
            queue,
            tracker,
            stats,
            clock,
            debouncer,
            worker_ctx,
            lifecycle: Mutex::new(Lifecycle::Ready),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
