use thiserror::Error;

use crate::version::SchemaVersion;

/// Errors produced while loading, migrating, or persisting a configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("TOML deserialization: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration type serialized to something other than a table.
    ///
    /// Configuration types must be structs (or maps) so their fields become
    /// top-level document keys.
    #[error("configuration did not serialize to a table")]
    NotATable,

    #[error("invalid schema version `{0}`")]
    InvalidVersion(String),

    /// The document's version has no registered migrator chain leading to
    /// the current version.
    #[error("no migration path from {from} to {to}")]
    NoMigrationPath {
        from: SchemaVersion,
        to: SchemaVersion,
    },

    /// A migrator failed while transforming a document.
    #[error("migration {from} -> {to} failed: {source}")]
    Migration {
        from: SchemaVersion,
        to: SchemaVersion,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("file watcher: {0}")]
    Watch(#[from] notify::Error),

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,
}
