//! One-time scan of files already sitting in a folder.

use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::debouncer::EventDebouncer;
use crate::processing::SupportedFiles;
use crate::types::{Priority, Trigger};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub found: usize,
    pub admitted: usize,
    pub rejected: usize,
}

impl std::ops::AddAssign for ScanReport {
    fn add_assign(&mut self, other: Self) {
        self.found += other.found;
        self.admitted += other.admitted;
        self.rejected += other.rejected;
    }
}

/// Supported files under `folder`, sorted.
pub fn find_audio_files(folder: &Path, files: &SupportedFiles, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut found: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(Result::ok) // Skip entries we can't access
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| files.matches(path))
        .collect();

    found.sort();
    found
}

/// Enqueue every pre-existing file in `folder` at `Low` priority.
///
/// Bypasses the created/modified distinction, but validation and the
/// in-flight rule still apply.
pub fn scan_existing(debouncer: &EventDebouncer, folder: &Path, recursive: bool) -> ScanReport {
    if !folder.is_dir() {
        tracing::warn!("[scan] folder does not exist: {}", folder.display());
        return ScanReport::default();
    }

    let paths = find_audio_files(folder, debouncer.files(), recursive);
    let mut report = ScanReport {
        found: paths.len(),
        ..ScanReport::default()
    };

    for path in paths {
        if debouncer
            .admit(&path, Trigger::Direct(Priority::Low))
            .is_admitted()
        {
            report.admitted += 1;
        } else {
            report.rejected += 1;
        }
    }

    crate::log_event!(
        "scan",
        "finished",
        "{}: {} found, {} queued, {} skipped",
        folder.display(),
        report.found,
        report.admitted,
        report.rejected
    );
    report
}
