use std::path::PathBuf;

use crate::version::SchemaVersion;

/// Notifications emitted on a store's broadcast channel.
///
/// Timer- and watcher-driven work has no caller to hand an error to, so
/// failures surface here with rendered messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The in-memory state was persisted.
    Saved { path: PathBuf },
    /// The document changed on disk and was re-read into the live instance.
    Reloaded { path: PathBuf },
    /// An outdated document was upgraded and persisted at the new version.
    Migrated {
        path: PathBuf,
        from: SchemaVersion,
        to: SchemaVersion,
    },
    SaveFailed { path: PathBuf, error: String },
    LoadFailed { path: PathBuf, error: String },
    /// Teardown finished; no further events follow.
    Closed { path: PathBuf },
}
