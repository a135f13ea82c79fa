//! Fixed pool of long-lived worker threads.
//!
//! Workers block only inside `PriorityQueue::dequeue`. Everything the
//! processing collaborator does, including panicking, is contained at the
//! task boundary and turned into a `ProcessingOutcome`.

mod pool;
mod state;

pub use pool::{StopReport, WorkerContext, WorkerPool};
pub use state::{WorkerState, WorkerStates};
