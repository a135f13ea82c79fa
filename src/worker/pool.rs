//! Worker threads that drain the priority queue.

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::state::{WorkerState, WorkerStates};
use crate::clock::Clock;
use crate::dedup::DedupTracker;
use crate::processing::{
    FileProcessor, OutcomeSink, ProcessingError, ProcessingOutcome, ProcessingSettings,
};
use crate::queue::PriorityQueue;
use crate::stats::StatsRegistry;
use crate::types::Task;

/// Everything a worker needs, shared by all of them.
pub struct WorkerContext {
    pub queue: Arc<PriorityQueue>,
    pub tracker: Arc<DedupTracker>,
    pub stats: Arc<StatsRegistry>,
    pub processor: Arc<dyn FileProcessor>,
    pub sinks: Vec<Arc<dyn OutcomeSink>>,
    pub clock: Arc<dyn Clock>,
    pub settings: ProcessingSettings,
    /// How long one dequeue blocks before the shutdown flag is re-checked
    pub dequeue_timeout: Duration,
    /// Extra attempts allowed for transient I/O failures
    pub max_retries: u32,
}

/// Result of [`WorkerPool::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Every worker exited before the drain timeout
    pub drained: bool,
    pub stopped_workers: usize,
    /// Workers still inside a processing call when the timeout hit
    pub abandoned_workers: usize,
    /// Tasks left in the queue, never started
    pub pending_tasks: usize,
}

/// A fixed set of worker threads.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    shutdown: Arc<AtomicBool>,
    states: Arc<WorkerStates>,
    handles: Vec<JoinHandle<()>>,
    exited: Receiver<usize>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("states", &self.states.all())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `workers` threads (at least one).
    pub fn start(ctx: Arc<WorkerContext>, workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let states = Arc::new(WorkerStates::new(workers));
        let (exit_tx, exited) = unbounded();

        let mut pool = Self {
            ctx,
            shutdown,
            states,
            handles: Vec::with_capacity(workers),
            exited,
        };

        for id in 0..workers {
            let ctx = Arc::clone(&pool.ctx);
            let shutdown = Arc::clone(&pool.shutdown);
            let states = Arc::clone(&pool.states);
            let exit_tx = exit_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("tapewatch-worker-{id}"))
                .spawn(move || run_worker(id, &ctx, &shutdown, &states, exit_tx));

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    // Release the workers that did start
                    pool.shutdown.store(true, Ordering::Release);
                    return Err(e);
                }
            }
        }

        crate::log_event!("workers", "started", "{workers} workers");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.states.all()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop taking new tasks and wait up to `drain_timeout` for in-flight
    /// ones.
    ///
    /// The queue is closed, so tasks that were never started stay in it and
    /// are reported as pending. Workers still busy at the deadline are
    /// detached; their outcome is still recorded if they finish later.
    pub fn stop(mut self, drain_timeout: Duration) -> StopReport {
        self.shutdown.store(true, Ordering::Release);
        self.ctx.queue.close();

        let total = self.handles.len();
        let deadline = Instant::now().checked_add(drain_timeout);
        let mut stopped = 0;
        while stopped < total {
            let exited = match deadline {
                Some(deadline) => self.exited.recv_deadline(deadline).is_ok(),
                None => self.exited.recv().is_ok(),
            };
            if !exited {
                break;
            }
            stopped += 1;
        }

        // Unfinished handles are dropped, detaching the thread
        for handle in self.handles.drain(..) {
            if handle.is_finished() && handle.join().is_err() {
                tracing::error!("[workers] worker thread panicked outside a task");
            }
        }

        let report = StopReport {
            drained: stopped == total,
            stopped_workers: stopped,
            abandoned_workers: total - stopped,
            pending_tasks: self.ctx.queue.size(),
        };

        if report.drained {
            crate::log_event!(
                "workers",
                "stopped",
                "{} workers, {} tasks left in queue",
                report.stopped_workers,
                report.pending_tasks
            );
        } else {
            tracing::warn!(
                "[workers] drain timed out after {:?}: {} workers still busy, {} tasks left in queue",
                drain_timeout,
                report.abandoned_workers,
                report.pending_tasks
            );
        }
        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Marks the worker stopped however its loop ends.
struct ExitGuard<'a> {
    id: usize,
    stats: &'a StatsRegistry,
    states: &'a WorkerStates,
    exit_tx: Sender<usize>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.states.set(self.id, WorkerState::Stopped);
        self.stats.worker_stopped();
        let _ = self.exit_tx.send(self.id);
    }
}

fn run_worker(
    id: usize,
    ctx: &WorkerContext,
    shutdown: &AtomicBool,
    states: &WorkerStates,
    exit_tx: Sender<usize>,
) {
    ctx.stats.worker_started();
    let _guard = ExitGuard {
        id,
        stats: &ctx.stats,
        states,
        exit_tx,
    };
    crate::debug_event!("workers", "worker up", "#{id}");

    while !shutdown.load(Ordering::Acquire) {
        states.set(id, WorkerState::Dequeuing);
        let Some(task) = ctx.queue.dequeue(ctx.dequeue_timeout) else {
            if ctx.queue.is_closed() {
                break;
            }
            states.set(id, WorkerState::Idle);
            continue;
        };
        ctx.stats.record_dequeued();

        states.set(id, WorkerState::Executing);
        let outcome = execute(id, ctx, task);

        states.set(id, WorkerState::Recording);
        record(ctx, &outcome);
        if !outcome.retry_scheduled() {
            ctx.tracker.mark_completed(outcome.path(), ctx.clock.now());
        }
        states.set(id, WorkerState::Idle);
    }

    crate::debug_event!("workers", "worker down", "#{id}");
}

/// Run one task to an outcome. Never panics on behalf of the processor.
fn execute(worker_id: usize, ctx: &WorkerContext, task: Task) -> ProcessingOutcome {
    ctx.tracker.mark_processing(task.path());
    ctx.stats.task_started();
    crate::debug_event!(
        "workers",
        "processing",
        "#{worker_id} {} ({}, attempt {})",
        task.path().display(),
        task.priority(),
        task.attempt()
    );

    let started = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| {
        ctx.processor.process(task.path(), &ctx.settings)
    }))
    .unwrap_or_else(|payload| Err(ProcessingError::from_panic(payload)));
    let took = started.elapsed();
    ctx.stats.task_finished();

    match result {
        Ok(file) => ProcessingOutcome::succeeded(task, worker_id, file, took),
        Err(err) => {
            let retry_scheduled =
                err.is_retryable() && task.attempt() < ctx.max_retries && requeue(ctx, &task);
            ProcessingOutcome::failed(task, worker_id, &err, took, retry_scheduled)
        }
    }
}

/// Put a failed task back with `attempt + 1`. False if the queue refused it.
fn requeue(ctx: &WorkerContext, task: &Task) -> bool {
    ctx.tracker.mark_requeued(task.path(), ctx.clock.now());
    match ctx.queue.enqueue(task.retry()) {
        Ok(_) => {
            ctx.stats.record_enqueued();
            true
        }
        Err(e) => {
            tracing::warn!(
                "[workers] cannot retry {}: {e}",
                task.path().display()
            );
            false
        }
    }
}

fn record(ctx: &WorkerContext, outcome: &ProcessingOutcome) {
    ctx.stats.record_outcome(outcome);

    if outcome.success() {
        crate::log_event!(
            "workers",
            "processed",
            "{} in {}ms",
            outcome.path().display(),
            outcome.duration_ms()
        );
    } else if outcome.retry_scheduled() {
        tracing::warn!(
            "[workers] retrying {}: {}",
            outcome.path().display(),
            outcome.message().unwrap_or_default()
        );
    } else {
        tracing::error!(
            "[workers] failed {}: {}",
            outcome.path().display(),
            outcome.message().unwrap_or_default()
        );
    }

    for sink in &ctx.sinks {
        match catch_unwind(AssertUnwindSafe(|| sink.log_outcome(outcome))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("[workers] outcome sink failed: {e}"),
            Err(_) => tracing::warn!("[workers] outcome sink panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::dedup::DedupState;
    use crate::processing::{MemorySink, ProcessedFile};
    use crate::types::{PendingTask, Priority, Trigger};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};

    /// Records call order; `fail` paths error, `panic` paths panic.
    #[derive(Default)]
    struct ScriptedProcessor {
        calls: Mutex<Vec<PathBuf>>,
        delay: Duration,
    }

    impl FileProcessor for ScriptedProcessor {
        fn process(
            &self,
            path: &Path,
            _settings: &ProcessingSettings,
        ) -> Result<ProcessedFile, ProcessingError> {
            self.calls.lock().push(path.to_path_buf());
            thread::sleep(self.delay);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("panic") {
                panic!("decoder exploded");
            }
            if name.starts_with("fault") {
                return Err(ProcessingError::fault("unsupported codec"));
            }
            if name.starts_with("flaky") {
                return Err(io::Error::from(io::ErrorKind::TimedOut).into());
            }
            Ok(ProcessedFile::default())
        }
    }

    struct Harness {
        ctx: Arc<WorkerContext>,
        processor: Arc<ScriptedProcessor>,
        sink: Arc<MemorySink>,
    }

    fn harness(capacity: usize, delay: Duration) -> Harness {
        let processor = Arc::new(ScriptedProcessor {
            delay,
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::new());
        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(PriorityQueue::new(capacity)),
            tracker: Arc::new(DedupTracker::default()),
            stats: Arc::new(StatsRegistry::new()),
            processor: processor.clone(),
            sinks: vec![sink.clone()],
            clock: Arc::new(SystemClock),
            settings: ProcessingSettings::default(),
            dequeue_timeout: Duration::from_millis(20),
            max_retries: 1,
        });
        Harness {
            ctx,
            processor,
            sink,
        }
    }

    fn submit(ctx: &WorkerContext, path: &str, priority: Priority) {
        let path = Path::new(path);
        ctx.tracker
            .try_admit(path, Trigger::Direct(priority), ctx.clock.now(), Duration::ZERO)
            .unwrap();
        ctx.queue.enqueue(PendingTask::new(path, priority)).unwrap();
        ctx.stats.record_enqueued();
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_single_worker_follows_priority_order() {
        let h = harness(10, Duration::ZERO);
        submit(&h.ctx, "/in/low.wav", Priority::Low);
        submit(&h.ctx, "/in/med.wav", Priority::Medium);
        submit(&h.ctx, "/in/high.wav", Priority::High);

        let pool = WorkerPool::start(h.ctx.clone(), 1).unwrap();
        wait_for(|| h.sink.len() == 3);
        let report = pool.stop(Duration::from_secs(2));

        assert_eq!(
            *h.processor.calls.lock(),
            vec![
                PathBuf::from("/in/high.wav"),
                PathBuf::from("/in/med.wav"),
                PathBuf::from("/in/low.wav"),
            ]
        );
        assert!(report.drained);
        assert_eq!(report.pending_tasks, 0);
        assert_eq!(
            h.ctx.tracker.entry(Path::new("/in/high.wav")).unwrap().state,
            DedupState::Cooldown
        );
    }

    #[test]
    fn test_panics_and_faults_leave_workers_alive() {
        let h = harness(10, Duration::ZERO);
        let pool = WorkerPool::start(h.ctx.clone(), 2).unwrap();
        wait_for(|| h.ctx.stats.snapshot().active_workers == 2);

        submit(&h.ctx, "/in/panic.wav", Priority::High);
        submit(&h.ctx, "/in/fault.wav", Priority::High);
        submit(&h.ctx, "/in/ok.wav", Priority::High);
        wait_for(|| h.sink.len() == 3);

        let snap = h.ctx.stats.snapshot();
        assert_eq!(snap.active_workers, 2);
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.failed, 2);

        let panicked = h
            .sink
            .outcomes()
            .into_iter()
            .find(|o| o.path() == Path::new("/in/panic.wav"))
            .unwrap();
        assert!(!panicked.success());
        assert!(panicked.message().unwrap().contains("decoder exploded"));

        pool.stop(Duration::from_secs(2));
        assert_eq!(h.ctx.stats.snapshot().active_workers, 0);
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let h = harness(10, Duration::ZERO);
        submit(&h.ctx, "/in/flaky.wav", Priority::Medium);

        let pool = WorkerPool::start(h.ctx.clone(), 1).unwrap();
        wait_for(|| h.sink.len() == 2);
        pool.stop(Duration::from_secs(2));

        let outcomes = h.sink.outcomes();
        assert!(outcomes[0].retry_scheduled());
        assert_eq!(outcomes[0].task().attempt(), 0);
        assert!(!outcomes[1].retry_scheduled());
        assert_eq!(outcomes[1].task().attempt(), 1);
        assert_eq!(h.processor.calls.lock().len(), 2);

        let snap = h.ctx.stats.snapshot();
        assert_eq!(snap.retried, 1);
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn test_stop_reports_pending_and_abandoned() {
        let h = harness(10, Duration::from_millis(400));
        submit(&h.ctx, "/in/a.wav", Priority::High);
        submit(&h.ctx, "/in/b.wav", Priority::High);

        let pool = WorkerPool::start(h.ctx.clone(), 1).unwrap();
        wait_for(|| h.processor.calls.lock().len() == 1);

        let report = pool.stop(Duration::from_millis(10));
        assert!(!report.drained);
        assert_eq!(report.abandoned_workers, 1);
        assert_eq!(report.pending_tasks, 1);

        // The abandoned worker still records its outcome
        wait_for(|| h.sink.len() == 1);
        wait_for(|| h.ctx.stats.snapshot().active_workers == 0);
        assert_eq!(h.processor.calls.lock().len(), 1);
    }

    #[test]
    fn test_idle_workers_stop_promptly() {
        let h = harness(10, Duration::ZERO);
        let pool = WorkerPool::start(h.ctx.clone(), 3).unwrap();
        assert_eq!(pool.size(), 3);
        wait_for(|| h.ctx.stats.snapshot().active_workers == 3);

        let report = pool.stop(Duration::from_secs(2));
        assert_eq!(
            report,
            StopReport {
                drained: true,
                stopped_workers: 3,
                abandoned_workers: 0,
                pending_tasks: 0,
            }
        );
        assert!(h.ctx.queue.is_closed());
    }
}
