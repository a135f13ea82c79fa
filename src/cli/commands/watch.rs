//! Watch command - run the pipeline until Ctrl+C.

use anyhow::{Context, bail};
use crossbeam_channel::{RecvTimeoutError, bounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{build_orchestrator, status_line};
use crate::config::{MasteringPreset, Settings};
use crate::watcher::{FileEventTarget, FolderWatcher};

/// Command-line overrides for `watch`.
#[derive(Debug, Default)]
pub struct WatchOptions {
    pub folders: Vec<PathBuf>,
    pub workers: Option<usize>,
    pub process_existing: bool,
    pub no_backup: bool,
    pub preset: Option<MasteringPreset>,
    pub outcome_log: Option<PathBuf>,
    pub stats_interval: u64,
}

impl WatchOptions {
    /// Fold the overrides into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        for folder in &self.folders {
            if !settings.watch.folders.contains(folder) {
                settings.watch.folders.push(folder.clone());
            }
        }
        if let Some(workers) = self.workers {
            settings.workers.max_workers = workers;
        }
        if self.no_backup {
            settings.output.backup_original = false;
        }
        if let Some(preset) = self.preset {
            settings.processing.preset = preset;
        }
    }
}

pub fn run_watch(mut settings: Settings, options: WatchOptions) -> anyhow::Result<()> {
    options.apply(&mut settings);
    if settings.watch.folders.is_empty() {
        bail!("No folders to watch. Pass -w DIR or set watch.folders in settings.toml");
    }

    let orchestrator = Arc::new(build_orchestrator(&settings, options.outcome_log.clone())?);
    orchestrator.start()?;

    let target: Arc<dyn FileEventTarget> = orchestrator.clone();
    let mut watcher = FolderWatcher::start(target, settings.watch.recursive)?;
    for folder in &settings.watch.folders {
        watcher
            .add_folder(folder)
            .with_context(|| format!("cannot watch {}", folder.display()))?;
        println!("Watching {}", folder.display());
    }

    if options.process_existing {
        for folder in &settings.watch.folders {
            let report = orchestrator.scan_existing(folder);
            println!(
                "Queued {} of {} existing files in {}",
                report.admitted,
                report.found,
                folder.display()
            );
        }
    }

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("cannot install Ctrl+C handler")?;

    println!(
        "Processing with {} workers, preset {:?}. Press Ctrl+C to stop.",
        settings.workers.max_workers, settings.processing.preset
    );

    if options.stats_interval == 0 {
        let _ = stop_rx.recv();
    } else {
        let interval = Duration::from_secs(options.stats_interval);
        loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    println!("{}", status_line(&orchestrator.snapshot()));
                }
            }
        }
    }

    println!(
        "Stopping, waiting up to {}s for running tasks...",
        settings.workers.drain_timeout_secs
    );
    let events = watcher.stop();
    let report = orchestrator.shutdown()?;

    println!("{}", status_line(&orchestrator.snapshot()));
    println!("{events} file events seen");
    if report.pending_tasks > 0 {
        println!("{} queued files were not started", report.pending_tasks);
    }
    if !report.drained {
        eprintln!(
            "Warning: {} workers still busy at shutdown",
            report.abandoned_workers
        );
    }
    Ok(())
}
