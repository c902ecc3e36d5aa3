//! File-backed configuration stores with debounced autosave, hot reload,
//! and schema migration.
//!
//! A [`Store`] keeps one typed configuration live against a TOML document
//! on disk: mutations persist automatically after a quiet period, external
//! edits to the file flow back into memory, outdated documents are
//! upgraded through registered [`Migrator`] chains, and every write
//! replaces the file atomically. A process-wide [`Registry`] guarantees at
//! most one live store per configuration type and path.
//!
//! Configuration types implement [`Config`], usually via the derive macro:
//!
//! ```rust
//! use live_config::Config;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize, Config)]
//! #[config(version = "1.0.0", file_name = "app.toml")]
//! struct AppConfig {
//!     endpoint: String,
//! }
//! ```

pub mod atomic;
pub mod config;
mod debounce;
pub mod document;
pub mod error;
pub mod events;
mod lifecycle;
pub mod migration;
pub mod registry;
pub mod store;
pub mod version;
mod watcher;

pub use config::Config;
pub use document::{Document, VERSION_KEY};
pub use error::Error;
pub use events::StoreEvent;
pub use migration::{BoxError, Migrator};
pub use registry::Registry;
pub use store::{DEFAULT_DEBOUNCE_INTERVAL, Store, StoreOptions};
pub use version::SchemaVersion;

// derive macro
pub use live_config_macros::Config;
