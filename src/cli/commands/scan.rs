//! Scan command - process a folder's backlog once.

use anyhow::bail;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use super::{build_orchestrator, status_line};
use crate::config::Settings;
use crate::types::Priority;
use crate::watcher::{Rejection, find_audio_files};

const BACKOFF: Duration = Duration::from_millis(50);

pub fn run_scan(
    mut settings: Settings,
    folder: PathBuf,
    workers: Option<usize>,
    outcome_log: Option<PathBuf>,
) -> anyhow::Result<()> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }
    if let Some(workers) = workers {
        settings.workers.max_workers = workers;
    }

    let orchestrator = build_orchestrator(&settings, outcome_log)?;
    orchestrator.start()?;

    let debouncer = orchestrator.debouncer();
    let paths = find_audio_files(&folder, debouncer.files(), settings.watch.recursive);
    println!("Found {} files in {}", paths.len(), folder.display());

    // Unlike the watcher, a one-off scan waits for room instead of dropping
    let mut skipped = 0;
    for path in &paths {
        loop {
            match orchestrator.enqueue_file(path, Priority::Low).rejection() {
                None => break,
                Some(Rejection::CapacityExceeded { .. }) => thread::sleep(BACKOFF),
                Some(_) => {
                    skipped += 1;
                    break;
                }
            }
        }
    }

    orchestrator.wait_idle(Duration::MAX);
    let stopped = orchestrator.shutdown()?;
    let snap = orchestrator.snapshot();
    println!("{}", status_line(&snap));
    if skipped > 0 {
        println!("Skipped {skipped} files");
    }
    if !stopped.drained {
        eprintln!(
            "Warning: {} workers were still busy at shutdown",
            stopped.abandoned_workers
        );
    }

    if snap.failed > 0 {
        bail!("{} files failed to process", snap.failed);
    }
    Ok(())
}
