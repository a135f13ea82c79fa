//! Command implementations for the CLI.

pub mod init;
pub mod scan;
pub mod watch;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::processing::{BasicValidator, JsonlSink, StagingProcessor};
use crate::stats::StatsSnapshot;

/// Orchestrator wired with the default collaborators and a JSONL outcome log.
pub(crate) fn build_orchestrator(
    settings: &Settings,
    outcome_log: Option<PathBuf>,
) -> anyhow::Result<Orchestrator> {
    let log_path = outcome_log.unwrap_or_else(|| settings.output.outcome_log.clone());
    let sink = JsonlSink::open(&log_path)
        .with_context(|| format!("cannot open outcome log {}", log_path.display()))?;

    let orchestrator = Orchestrator::builder()
        .settings(settings.clone())
        .validator(Arc::new(BasicValidator))
        .processor(Arc::new(StagingProcessor))
        .sink(Arc::new(sink))
        .build()?;
    Ok(orchestrator)
}

/// One-line status for the terminal.
pub(crate) fn status_line(snap: &StatsSnapshot) -> String {
    format!(
        "queued {} | busy {}/{} | processed {} (failed {}, retried {}) | avg {:.0}ms",
        snap.queued,
        snap.busy_workers,
        snap.active_workers,
        snap.processed,
        snap.failed,
        snap.retried,
        snap.avg_duration_ms
    )
}
