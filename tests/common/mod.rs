//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tapewatch::Settings;

/// Smallest byte pattern content sniffing recognizes as WAV.
pub fn write_wav(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::from(*b"RIFF\x24\x00\x00\x00WAVEfmt ");
    bytes.extend_from_slice(&[0u8; 32]);
    fs::write(&path, bytes).unwrap();
    path
}

/// Settings tuned for fast tests: short dequeue timeout, small drain.
pub fn test_settings(workers: usize) -> Settings {
    let mut settings = Settings::default();
    settings.workers.max_workers = workers;
    settings.workers.dequeue_timeout_ms = 20;
    settings.workers.drain_timeout_secs = 5;
    settings
}

/// Poll `done` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}
