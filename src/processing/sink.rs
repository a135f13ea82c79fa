//! Outcome sinks.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::{OutcomeSink, ProcessingOutcome};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write outcome log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One JSON object per line, appended.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    /// Open (or create) the log file in append mode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutcomeSink for JsonlSink {
    fn log_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        // One write per record keeps lines whole across workers
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| SinkError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Keeps outcomes in memory. Handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    outcomes: Mutex<Vec<ProcessingOutcome>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<ProcessingOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }
}

impl OutcomeSink for MemorySink {
    fn log_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), SinkError> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }
}
