use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Scheduling priority of a task. Lower discriminant is dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 0,
    Medium = 1,
    Low = 2,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Raw filesystem notification kinds the debouncer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
}

/// What caused an admission attempt.
///
/// `Direct` covers manual enqueues and the one-time scan of pre-existing
/// files: the caller picks the priority and the cooldown rule is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Created,
    Modified,
    Direct(Priority),
}

impl From<FileEventKind> for Trigger {
    fn from(kind: FileEventKind) -> Self {
        match kind {
            FileEventKind::Created => Trigger::Created,
            FileEventKind::Modified => Trigger::Modified,
        }
    }
}

/// A task waiting for a sequence number.
///
/// The queue turns this into a [`Task`] under its lock so that sequence
/// numbers are strictly increasing in admission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub path: PathBuf,
    pub priority: Priority,
    pub attempt: u32,
}

impl PendingTask {
    pub fn new(path: impl Into<PathBuf>, priority: Priority) -> Self {
        Self {
            path: path.into(),
            priority,
            attempt: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// One unit of work. Immutable once created by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    path: PathBuf,
    priority: Priority,
    sequence: u64,
    enqueued_at: DateTime<Utc>,
    attempt: u32,
}

impl Task {
    pub(crate) fn from_pending(pending: PendingTask, sequence: u64) -> Self {
        Self {
            path: pending.path,
            priority: pending.priority,
            sequence,
            enqueued_at: Utc::now(),
            attempt: pending.attempt,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Ordering key used by the queue: `(priority, sequence)`.
    pub fn order_key(&self) -> (Priority, u64) {
        (self.priority, self.sequence)
    }

    /// The follow-up task for a retry: same path and priority, next attempt.
    pub fn retry(&self) -> PendingTask {
        PendingTask::new(self.path.clone(), self.priority).with_attempt(self.attempt + 1)
    }
}
