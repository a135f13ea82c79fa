//! End-to-end runs with the default collaborators.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{test_settings, write_wav};
use tapewatch::processing::{JsonlSink, MemorySink, StagingProcessor};
use tapewatch::{DedupState, Orchestrator, Priority, Rejection};

#[test]
fn test_files_are_staged_backed_up_and_logged() {
    let dir = TempDir::new().unwrap();
    let incoming = dir.path().join("incoming");
    fs::create_dir_all(&incoming).unwrap();
    let log = dir.path().join("outcomes.jsonl");

    let a = write_wav(&incoming, "take1.wav");
    let b = write_wav(&incoming, "take2.wav");

    let orchestrator = Orchestrator::builder()
        .settings(test_settings(2))
        .processor(Arc::new(StagingProcessor))
        .sink(Arc::new(JsonlSink::open(&log).unwrap()))
        .build()
        .unwrap();
    orchestrator.start().unwrap();

    assert!(orchestrator.enqueue_file(&a, Priority::High).is_admitted());
    assert!(orchestrator.enqueue_file(&b, Priority::Medium).is_admitted());
    assert!(orchestrator.wait_idle(Duration::from_secs(10)));

    let report = orchestrator.stop(Duration::from_secs(5)).unwrap();
    assert!(report.drained);

    let snap = orchestrator.snapshot();
    assert_eq!(snap.processed, 2);
    assert_eq!(snap.failed, 0);

    let processed: Vec<_> = fs::read_dir(incoming.join("processed"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(processed.len(), 2);
    assert!(processed.iter().all(|n| n.starts_with("processed_take")));

    assert!(incoming.join("backups/original_take1.wav").exists());
    assert!(incoming.join("backups/original_take2.wav").exists());
    assert!(a.exists(), "originals are kept unless auto_delete_original");

    let lines = fs::read_to_string(&log).unwrap();
    let records: Vec<serde_json::Value> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["success"] == true));

    assert_eq!(orchestrator.dedup_state(&a), DedupState::Cooldown);
}

#[test]
fn test_scan_enqueues_backlog_at_low_priority() {
    let dir = TempDir::new().unwrap();
    let backlog = dir.path();
    write_wav(backlog, "one.wav");
    write_wav(backlog, "two.flac");
    fs::write(backlog.join("notes.txt"), b"not audio").unwrap();
    fs::write(backlog.join("empty.wav"), b"").unwrap();

    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::builder()
        .settings(test_settings(1))
        .processor(Arc::new(StagingProcessor))
        .sink(sink.clone())
        .build()
        .unwrap();

    let report = orchestrator.scan_existing(backlog);
    assert_eq!(report.found, 3);
    assert_eq!(report.admitted, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(orchestrator.queue_size(), 2);

    orchestrator.start().unwrap();
    assert!(orchestrator.wait_idle(Duration::from_secs(10)));
    orchestrator.stop(Duration::from_secs(5)).unwrap();

    let outcomes = sink.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.task().priority() == Priority::Low));
    assert!(outcomes.iter().all(|o| o.success()));
}

#[test]
fn test_enqueue_after_stop_is_refused() {
    let dir = TempDir::new().unwrap();
    let file = write_wav(dir.path(), "late.wav");

    let orchestrator = Orchestrator::builder()
        .settings(test_settings(1))
        .processor(Arc::new(StagingProcessor))
        .build()
        .unwrap();
    orchestrator.start().unwrap();
    orchestrator.stop(Duration::from_secs(5)).unwrap();

    let decision = orchestrator.enqueue_file(&file, Priority::High);
    assert!(matches!(decision.rejection(), Some(Rejection::Closed)));
    assert_eq!(orchestrator.snapshot().rejected_closed, 1);
    // Refused work leaves the path eligible
    assert_eq!(orchestrator.dedup_state(&file), DedupState::Idle);
}
