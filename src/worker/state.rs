//! Per-worker lifecycle state, readable from any thread.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// `Idle -> Dequeuing -> Executing -> Recording -> Idle`, until `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Dequeuing = 1,
    Executing = 2,
    Recording = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Dequeuing,
            2 => WorkerState::Executing,
            3 => WorkerState::Recording,
            _ => WorkerState::Stopped,
        }
    }
}

/// One atomic slot per worker.
#[derive(Debug)]
pub struct WorkerStates {
    slots: Box<[AtomicU8]>,
}

impl WorkerStates {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        }
    }

    pub fn set(&self, worker: usize, state: WorkerState) {
        if let Some(slot) = self.slots.get(worker) {
            slot.store(state as u8, Ordering::Release);
        }
    }

    pub fn get(&self, worker: usize) -> Option<WorkerState> {
        self.slots
            .get(worker)
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
    }

    pub fn all(&self) -> Vec<WorkerState> {
        self.slots
            .iter()
            .map(|slot| WorkerState::from_u8(slot.load(Ordering::Acquire)))
            .collect()
    }

    pub fn count(&self, state: WorkerState) -> usize {
        self.all().into_iter().filter(|s| *s == state).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
