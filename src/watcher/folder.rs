//! Filesystem notifications for watched folders.
//!
//! One `notify` watcher covers every folder. Its callback only forwards raw
//! events into a channel; a dispatcher thread classifies them and hands them
//! to a [`FileEventTarget`], so slow admission checks never run on the
//! notify backend's thread.

use crossbeam_channel::{Receiver, unbounded};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::debouncer::FileEventTarget;
use super::error::WatchError;
use crate::types::FileEventKind;

/// Watches folders and feeds their events to a target.
pub struct FolderWatcher {
    watcher: Option<RecommendedWatcher>,
    dispatcher: Option<JoinHandle<usize>>,
    folders: Vec<PathBuf>,
    recursive: bool,
}

impl std::fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderWatcher")
            .field("folders", &self.folders)
            .field("recursive", &self.recursive)
            .finish_non_exhaustive()
    }
}

impl FolderWatcher {
    /// Create the watcher and its dispatcher thread. No folders yet.
    pub fn start(target: Arc<dyn FileEventTarget>, recursive: bool) -> Result<Self, WatchError> {
        let (tx, rx) = unbounded();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        let dispatcher = thread::Builder::new()
            .name("tapewatch-events".to_string())
            .spawn(move || dispatch(rx, target))
            .map_err(|e| WatchError::InitFailed {
                reason: format!("cannot spawn dispatcher: {e}"),
            })?;

        Ok(Self {
            watcher: Some(watcher),
            dispatcher: Some(dispatcher),
            folders: Vec::new(),
            recursive,
        })
    }

    /// Start watching `folder`, creating it first if needed.
    pub fn add_folder(&mut self, folder: impl AsRef<Path>) -> Result<(), WatchError> {
        let folder = folder.as_ref();
        let watcher = self.watcher.as_mut().ok_or(WatchError::Stopped)?;

        if !folder.exists() {
            fs::create_dir_all(folder).map_err(|source| WatchError::CreateFolder {
                path: folder.to_path_buf(),
                source,
            })?;
            crate::log_event!("watcher", "created folder", "{}", folder.display());
        }

        let mode = if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        watcher
            .watch(folder, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: folder.to_path_buf(),
                reason: e.to_string(),
            })?;

        crate::log_event!(
            "watcher",
            "watching",
            "{} (recursive: {})",
            folder.display(),
            self.recursive
        );
        self.folders.push(folder.to_path_buf());
        Ok(())
    }

    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    /// Stop watching and wait for the dispatcher to drain.
    ///
    /// Returns how many events were dispatched over the watcher's lifetime.
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        // Dropping the watcher drops the callback and with it the sender,
        // which ends the dispatcher loop.
        drop(self.watcher.take());
        match self.dispatcher.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(rx: Receiver<notify::Result<Event>>, target: Arc<dyn FileEventTarget>) -> usize {
    let mut dispatched = 0;
    for res in rx.iter() {
        match res {
            Ok(event) => {
                for (path, kind) in classify(&event) {
                    if path.is_dir() {
                        continue;
                    }
                    target.on_file_event(&path, kind);
                    dispatched += 1;
                }
            }
            Err(e) => tracing::error!("[watcher] file watch error: {e}"),
        }
    }
    crate::debug_event!("watcher", "dispatcher stopped", "{dispatched} events");
    dispatched
}

/// Map a notify event onto the kinds the debouncer understands.
///
/// Files renamed into a watched folder count as created. A writer closing a
/// file counts as modified, so a file created empty and filled in place is
/// seen again once its content lands. Metadata changes, removals and other
/// accesses are dropped.
pub fn classify(event: &Event) -> Vec<(PathBuf, FileEventKind)> {
    let created = |paths: &[PathBuf]| {
        paths
            .iter()
            .map(|p| (p.clone(), FileEventKind::Created))
            .collect::<Vec<_>>()
    };

    match &event.kind {
        EventKind::Create(_) => created(&event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            created(&event.paths)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            created(event.paths.last().map(std::slice::from_ref).unwrap_or(&[]))
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            Vec::new()
        }
        EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .iter()
            .map(|p| (p.clone(), FileEventKind::Modified))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_classify_create_and_modify() {
        let created = classify(&event(EventKind::Create(CreateKind::File), &["/w/a.wav"]));
        assert_eq!(
            created,
            vec![(PathBuf::from("/w/a.wav"), FileEventKind::Created)]
        );

        let modified = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/w/a.wav"],
        ));
        assert_eq!(
            modified,
            vec![(PathBuf::from("/w/a.wav"), FileEventKind::Modified)]
        );
    }

    #[test]
    fn test_classify_renames() {
        let both = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/.tmp123", "/w/final.wav"],
        ));
        assert_eq!(
            both,
            vec![(PathBuf::from("/w/final.wav"), FileEventKind::Created)]
        );

        let from = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/w/old.wav"],
        ));
        assert!(from.is_empty());
    }

    #[test]
    fn test_classify_close_after_write_is_modified() {
        let closed = classify(&event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            &["/w/a.wav"],
        ));
        assert_eq!(
            closed,
            vec![(PathBuf::from("/w/a.wav"), FileEventKind::Modified)]
        );

        let read_close = classify(&event(
            EventKind::Access(AccessKind::Close(AccessMode::Read)),
            &["/w/a.wav"],
        ));
        assert!(read_close.is_empty());
    }

    #[test]
    fn test_classify_ignores_noise() {
        assert!(
            classify(&event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                &["/w/a.wav"],
            ))
            .is_empty()
        );
        assert!(classify(&event(EventKind::Remove(RemoveKind::File), &["/w/a.wav"])).is_empty());
    }
}
