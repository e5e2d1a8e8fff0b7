// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config-file watcher.
//!
//! Each project's config file is watched through its parent directory, so
//! every replacement strategy is seen: in-place write and copy-into-place
//! raise close-after-write, rename-into-place raises moved-to, and
//! create-in-place raises create. Deletion is logged but does not recycle
//! anything; the existing pool keeps serving the old configuration.

use super::events::ControlEvent;
use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

struct WatchedFile {
    project: String,
    dir: PathBuf,
    file_name: OsString,
}

/// Watches project config files and emits [`ControlEvent::ConfigChanged`].
pub struct ConfigWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched: Arc<Mutex<Vec<WatchedFile>>>,
}

impl ConfigWatcher {
    pub fn new(events: UnboundedSender<ControlEvent>) -> notify::Result<Self> {
        let watched: Arc<Mutex<Vec<WatchedFile>>> = Arc::new(Mutex::new(Vec::new()));
        let callback_watched = Arc::clone(&watched);
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => handle_fs_event(&callback_watched, &events, &event),
                Err(error) => warn!(%error, "config watch error"),
            }
        })?;
        Ok(ConfigWatcher { watcher: Mutex::new(watcher), watched })
    }

    /// Watch `config_file` for `project`. A path without a parent
    /// directory or file name is refused; a file that does not exist yet
    /// is fine, the directory watch picks it up when it appears.
    pub fn watch_project(&self, project: &str, config_file: &Path) -> notify::Result<()> {
        let (Some(dir), Some(file_name)) = (config_file.parent(), config_file.file_name()) else {
            warn!(project, path = %config_file.display(), "config path cannot be watched");
            return Ok(());
        };

        {
            let watched = self.watched.lock();
            let already = watched
                .iter()
                .any(|w| w.project == project && w.dir == dir && w.file_name == file_name);
            if already {
                return Ok(());
            }
        }

        self.watcher.lock().watch(dir, RecursiveMode::NonRecursive)?;
        info!(project, path = %config_file.display(), "watching project config file");
        self.watched.lock().push(WatchedFile {
            project: project.to_string(),
            dir: dir.to_path_buf(),
            file_name: file_name.to_os_string(),
        });
        Ok(())
    }

    /// Drop a project's watch entries; the directory watch is removed
    /// when no other project shares it.
    pub fn unwatch_project(&self, project: &str) {
        let mut watched = self.watched.lock();
        let removed: Vec<WatchedFile> = {
            let mut kept = Vec::new();
            let mut gone = Vec::new();
            for entry in watched.drain(..) {
                if entry.project == project {
                    gone.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            *watched = kept;
            gone
        };
        for entry in removed {
            if !watched.iter().any(|w| w.dir == entry.dir) {
                if let Err(error) = self.watcher.lock().unwatch(&entry.dir) {
                    debug!(dir = %entry.dir.display(), %error, "unwatch failed");
                }
            }
        }
    }
}

/// Content-replaced events: in-place write, copy-into-place (both close-
/// after-write), rename-into-place (moved-to), create-in-place.
fn is_replacement(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
            | EventKind::Create(_)
    )
}

fn handle_fs_event(
    watched: &Mutex<Vec<WatchedFile>>,
    events: &UnboundedSender<ControlEvent>,
    event: &notify::Event,
) {
    let replaced = is_replacement(&event.kind);
    let removed = matches!(event.kind, EventKind::Remove(_));
    if !replaced && !removed {
        return;
    }

    for path in &event.paths {
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else { continue };
        for entry in watched.lock().iter() {
            if entry.dir != dir || entry.file_name != file_name {
                continue;
            }
            if replaced {
                info!(project = %entry.project, path = %path.display(), "config file replaced");
                let _ = events
                    .send(ControlEvent::ConfigChanged { project: entry.project.clone() });
            } else {
                // Deletion does not stop the pool; it keeps serving the
                // old configuration
                info!(project = %entry.project, path = %path.display(), "config file deleted");
            }
        }
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
