//! Counters and timers for monitoring.
//!
//! Each counter is an independent atomic. A snapshot reads them one by one,
//! so fields may disagree by an in-progress update; nothing uses the
//! snapshot for control decisions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::processing::ProcessingOutcome;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Tasks currently waiting in the queue
    pub queued: u64,
    /// Terminal outcomes, successful or not
    pub processed: u64,
    /// Terminal failures
    pub failed: u64,
    /// Attempts that failed and were re-queued
    pub retried: u64,
    /// Worker loops currently alive
    pub active_workers: usize,
    /// Workers inside a processing call right now
    pub busy_workers: usize,
    pub avg_duration_ms: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub rejected_capacity: u64,
    /// Admissions refused because the queue was closed by a stop
    pub rejected_closed: u64,
    pub rejected_invalid: u64,
    pub debounced: u64,
    pub in_flight_rejects: u64,
    pub uptime_secs: u64,
}

#[derive(Debug)]
pub struct StatsRegistry {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    rejected_capacity: AtomicU64,
    rejected_closed: AtomicU64,
    rejected_invalid: AtomicU64,
    debounced: AtomicU64,
    in_flight_rejects: AtomicU64,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    started: Instant,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            queued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
            busy_workers: AtomicUsize::new(0),
            rejected_capacity: AtomicU64::new(0),
            rejected_closed: AtomicU64::new(0),
            rejected_invalid: AtomicU64::new(0),
            debounced: AtomicU64::new(0),
            in_flight_rejects: AtomicU64::new(0),
            last_activity: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Account for one finished attempt.
    pub fn record_outcome(&self, outcome: &ProcessingOutcome) {
        if outcome.retry_scheduled() {
            self.retried.fetch_add(1, Ordering::Relaxed);
        } else {
            self.processed.fetch_add(1, Ordering::Relaxed);
            self.total_duration_ms
                .fetch_add(outcome.duration_ms(), Ordering::Relaxed);
            if !outcome.success() {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.touch();
    }

    pub fn record_enqueued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_dequeued(&self) {
        // Saturating: a snapshot must never wrap around
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_capacity_rejection(&self) {
        self.rejected_capacity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed_rejection(&self) {
        self.rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.rejected_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_debounced(&self) {
        self.debounced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_in_flight_reject(&self) {
        self.in_flight_rejects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    fn touch(&self) {
        *self.last_activity.lock() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let avg_duration_ms = if processed > 0 {
            total_ms as f64 / processed as f64
        } else {
            0.0
        };

        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            processed,
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            busy_workers: self.busy_workers.load(Ordering::Relaxed),
            avg_duration_ms,
            last_activity: *self.last_activity.lock(),
            rejected_capacity: self.rejected_capacity.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            debounced: self.debounced.load(Ordering::Relaxed),
            in_flight_rejects: self.in_flight_rejects.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
