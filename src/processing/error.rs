//! Error taxonomy for work flowing through the pipeline.

use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::io;
use thiserror::Error;

/// Classification recorded on every failed outcome and rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// File refused before or at the start of processing. Never retried.
    Validation,
    /// File vanished, disk full and similar. Retried once.
    TransientIo,
    /// Anything else the pipeline raised, panics included. Not retried.
    ProcessingFault,
    /// The queue was full. Producer-visible, not a task failure.
    CapacityExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::ProcessingFault => "processing_fault",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
        };
        f.write_str(name)
    }
}

/// Errors returned by a [`FileProcessor`](super::FileProcessor).
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    #[error("transient I/O failure: {source}")]
    TransientIo {
        #[source]
        source: io::Error,
    },

    #[error("processing fault: {reason}")]
    Fault { reason: String },
}

impl ProcessingError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn fault(reason: impl Into<String>) -> Self {
        Self::Fault {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Validation { .. } => ErrorKind::Validation,
            ProcessingError::TransientIo { .. } => ErrorKind::TransientIo,
            ProcessingError::Fault { .. } => ErrorKind::ProcessingFault,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::TransientIo { .. })
    }

    /// Convert a caught panic payload into a fault.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panicked: {s}")
        } else {
            "panicked with a non-string payload".to_string()
        };
        Self::Fault { reason }
    }
}

/// I/O kinds that are worth one more attempt.
pub fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound
            | io::ErrorKind::StorageFull
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}

impl From<io::Error> for ProcessingError {
    fn from(e: io::Error) -> Self {
        if is_transient_io(e.kind()) {
            ProcessingError::TransientIo { source: e }
        } else {
            ProcessingError::Fault {
                reason: e.to_string(),
            }
        }
    }
}
