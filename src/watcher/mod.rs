//! Event intake: filesystem notifications, debouncing and folder scans.
//!
//! # Architecture
//!
//! ```text
//! FolderWatcher (notify)          scan_existing (walkdir)
//!   - one RecommendedWatcher        - pre-existing files
//!   - dispatcher thread             - Low priority
//!         |                               |
//!         +---------- EventDebouncer -----+
//!                       - basic admission
//!                       - DedupTracker rules
//!                       - PriorityQueue::enqueue
//! ```

mod debouncer;
mod error;
mod folder;
mod scan;

pub use debouncer::{EnqueueDecision, EventDebouncer, FileEventTarget, Rejection};
pub use error::WatchError;
pub use folder::{FolderWatcher, classify};
pub use scan::{ScanReport, find_audio_files, scan_existing};
