//! File watching and change-burst coalescing for watch mode

use crate::runtime::error::ScriptError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Coalesces a burst of change notifications into a single trigger
pub struct Debouncer<T> {
    events: mpsc::UnboundedReceiver<T>,
    quiet: Duration,
}

impl<T> Debouncer<T> {
    pub fn new(events: mpsc::UnboundedReceiver<T>, quiet: Duration) -> Self {
        Self { events, quiet }
    }

    /// Wait for an event, then keep absorbing events until none arrives for
    /// the quiet period. Returns how many events the burst contained, or
    /// `None` once the sender side is gone.
    pub async fn next_burst(&mut self) -> Option<usize> {
        self.events.recv().await?;
        let mut count = 1;
        loop {
            match tokio::time::timeout(self.quiet, self.events.recv()).await {
                Ok(Some(_)) => count += 1,
                Ok(None) | Err(_) => return Some(count),
            }
        }
    }
}

/// Watches one file for modifications.
///
/// The parent directory is watched non-recursively so that editors which
/// replace the file on save keep triggering events.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    target: PathBuf,
}

impl FileWatcher {
    pub fn start(path: &Path, changes: mpsc::UnboundedSender<()>) -> Result<Self, ScriptError> {
        let target = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let directory = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = target.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    let relevant = is_relevant_kind(&event.kind)
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if relevant {
                        let _ = changes.send(());
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            notify::Config::default(),
        )
        .map_err(|e| ScriptError::internal(format!("failed to initialize file watcher: {e}")))?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ScriptError::internal(format!("failed to watch {}: {e}", directory.display()))
            })?;

        debug!("Watching {}", target.display());
        Ok(Self {
            _watcher: watcher,
            target,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    )
}
