//! Watch-folder scheduling core for an audio mastering pipeline.
//!
//! File events become prioritized tasks in a bounded queue, a fixed pool of
//! workers drains it, and every attempt ends in exactly one recorded
//! [`ProcessingOutcome`]. The processing itself sits behind
//! [`FileProcessor`] and is opaque to the core.

pub mod cli;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod logging;
pub mod orchestrator;
pub mod processing;
pub mod queue;
pub mod stats;
pub mod types;
pub mod watcher;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use dedup::{DedupState, DedupTracker};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorError};
pub use processing::{
    ErrorKind, FileProcessor, FileValidator, OutcomeSink, ProcessedFile, ProcessingError,
    ProcessingOutcome, ProcessingSettings,
};
pub use queue::{CapacityExceeded, EnqueueError, PriorityQueue};
pub use stats::{StatsRegistry, StatsSnapshot};
pub use types::{FileEventKind, PendingTask, Priority, Task, Trigger};
pub use watcher::{EnqueueDecision, EventDebouncer, FileEventTarget, FolderWatcher, Rejection};
pub use worker::{StopReport, WorkerPool, WorkerState};
