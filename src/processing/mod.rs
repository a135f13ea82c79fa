//! Boundary between the scheduling core and the audio pipeline.
//!
//! The core never looks inside processing. It talks to three collaborators:
//!
//! ```text
//! FileValidator  - may this file enter the queue?
//! FileProcessor  - run the pipeline on one file (may be slow)
//! OutcomeSink    - persist the result record
//! ```
//!
//! Whatever a processor returns or raises ends up as one immutable
//! [`ProcessingOutcome`].

mod error;
pub mod sink;
pub mod staging;
pub mod validate;

pub use error::{ErrorKind, ProcessingError, is_transient_io};
pub use sink::{JsonlSink, MemorySink, SinkError};
pub use staging::StagingProcessor;
pub use validate::{BasicValidator, InvalidFile, SupportedFiles};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{OutputConfig, ProcessingConfig, Settings};
use crate::types::Task;

/// Typed options handed to every processing call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessingSettings {
    pub pipeline: ProcessingConfig,
    pub output: OutputConfig,
}

impl ProcessingSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            pipeline: settings.processing.clone(),
            output: settings.output.clone(),
        }
    }
}

/// Admission check run before a file is queued.
pub trait FileValidator: Send + Sync {
    fn validate(&self, path: &Path) -> Result<(), InvalidFile>;
}

/// The processing pipeline for one file.
///
/// Implementations should return errors rather than panic. Panics are
/// caught by the worker and recorded as faults anyway.
pub trait FileProcessor: Send + Sync {
    fn process(
        &self,
        path: &Path,
        settings: &ProcessingSettings,
    ) -> Result<ProcessedFile, ProcessingError>;
}

/// Append-only record of outcomes.
pub trait OutcomeSink: Send + Sync {
    fn log_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), SinkError>;
}

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedFile {
    pub output_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
}

/// Terminal record of one attempt at one task.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    task: Task,
    worker_id: usize,
    success: bool,
    error_kind: Option<ErrorKind>,
    message: Option<String>,
    duration_ms: u64,
    output_path: Option<PathBuf>,
    backup_path: Option<PathBuf>,
    /// The task was re-queued with `attempt + 1` after this failure.
    retry_scheduled: bool,
    finished_at: DateTime<Utc>,
}

impl ProcessingOutcome {
    pub fn succeeded(task: Task, worker_id: usize, file: ProcessedFile, took: Duration) -> Self {
        Self {
            task,
            worker_id,
            success: true,
            error_kind: None,
            message: None,
            duration_ms: took.as_millis() as u64,
            output_path: file.output_path,
            backup_path: file.backup_path,
            retry_scheduled: false,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        task: Task,
        worker_id: usize,
        error: &ProcessingError,
        took: Duration,
        retry_scheduled: bool,
    ) -> Self {
        Self {
            task,
            worker_id,
            success: false,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
            duration_ms: took.as_millis() as u64,
            output_path: None,
            backup_path: None,
            retry_scheduled,
            finished_at: Utc::now(),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn path(&self) -> &Path {
        self.task.path()
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled
    }

    /// Success or a failure that will not be retried.
    pub fn is_terminal(&self) -> bool {
        !self.retry_scheduled
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}
