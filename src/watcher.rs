//! Bridge from filesystem notifications to the store.
//!
//! The parent directory is watched rather than the document itself: atomic
//! replacement swaps the document's inode, and a watch pinned to the old
//! inode would go quiet after the first rename. Events are filtered back
//! down to the document's path, which also drops notifications for the
//! sibling temp files writes go through.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;

/// Suppression window the persister arms around its own writes, so the
/// bridge ignores the notifications they cause.
#[derive(Debug)]
pub(crate) struct SelfWriteMute {
    until: Mutex<Option<Instant>>,
}

impl SelfWriteMute {
    pub(crate) fn new() -> Self {
        Self {
            until: Mutex::new(None),
        }
    }

    pub(crate) fn arm(&self, window: Duration) {
        *self.until.lock().expect("mute lock poisoned") = Some(Instant::now() + window);
    }

    pub(crate) fn clear(&self) {
        *self.until.lock().expect("mute lock poisoned") = None;
    }

    pub(crate) fn is_active(&self) -> bool {
        let until = *self.until.lock().expect("mute lock poisoned");
        until.is_some_and(|until| Instant::now() < until)
    }
}

/// Starts watching `file` for external modification, invoking `on_change`
/// for every relevant event until the token is cancelled.
pub(crate) fn spawn(
    directory: &Path,
    file: PathBuf,
    token: CancellationToken,
    on_change: impl Fn() + Send + 'static,
) -> Result<(), Error> {
    let (events, mut receiver) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let _ = events.send(result);
        },
        notify::Config::default(),
    )?;
    watcher.watch(directory, RecursiveMode::NonRecursive)?;
    debug!(path = %file.display(), "watching for external changes");

    tokio::spawn(async move {
        // The watcher thread stops when this handle drops.
        let _watcher = watcher;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                received = receiver.recv() => {
                    let Some(result) = received else { break };
                    match result {
                        Ok(event) => {
                            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                                continue;
                            }
                            if !event.paths.iter().any(|path| path == &file) {
                                continue;
                            }
                            on_change();
                        }
                        Err(error) => warn!(%error, "file watch error"),
                    }
                }
            }
        }
        debug!(path = %file.display(), "file watcher stopped");
    });

    Ok(())
}
