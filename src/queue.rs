//! Bounded, thread-safe priority queue of tasks.
//!
//! Ordering is strict priority with FIFO inside a level. The FIFO part comes
//! from a sequence number assigned under the same lock that guards the heap,
//! so two producers can never observe the same number.
//!
//! A full queue refuses work instead of blocking: producers are usually the
//! filesystem event thread, which is shared by every watched folder.

use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::types::{PendingTask, Task};

/// The queue was at capacity when the enqueue was attempted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue is full ({capacity} tasks)")]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// Why an enqueue was refused. Both variants are ordinary return values.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error(transparent)]
    CapacityExceeded(#[from] CapacityExceeded),

    #[error("queue is closed")]
    Closed,
}

/// Heap entry ordered by `(priority, sequence)`.
#[derive(Debug)]
struct Queued(Task);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.order_key() == other.0.order_key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.order_key().cmp(&other.0.order_key())
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    // Min-heap through Reverse: smallest (priority, sequence) on top.
    heap: BinaryHeap<Reverse<Queued>>,
    next_sequence: u64,
    closed: bool,
}

/// Priority queue shared by producers and the worker pool.
#[derive(Debug)]
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl PriorityQueue {
    /// Create a queue holding at most `capacity` tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Add a task, returning the sequence number it was given.
    ///
    /// Never blocks. When the queue is full the task is refused and the size
    /// is left unchanged.
    pub fn enqueue(&self, pending: PendingTask) -> Result<u64, EnqueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }
        if inner.heap.len() >= self.capacity {
            return Err(CapacityExceeded {
                capacity: self.capacity,
            }
            .into());
        }

        inner.next_sequence += 1;
        let sequence = inner.next_sequence;
        inner
            .heap
            .push(Reverse(Queued(Task::from_pending(pending, sequence))));
        drop(inner);

        self.available.notify_one();
        Ok(sequence)
    }

    /// Take the highest-priority task, waiting up to `timeout` for one.
    ///
    /// Returns `None` on timeout or once the queue has been closed.
    pub fn dequeue(&self, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return None;
            }
            if let Some(Reverse(Queued(task))) = inner.heap.pop() {
                return Some(task);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                if inner.closed {
                    return None;
                }
                return inner.heap.pop().map(|Reverse(Queued(task))| task);
            }
        }
    }

    /// Current number of queued tasks.
    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse further enqueues and wake every waiting consumer.
    ///
    /// Tasks still in the heap stay there and are reported by [`size`](Self::size).
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
