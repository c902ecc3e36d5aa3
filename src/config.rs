use serde::{Serialize, de::DeserializeOwned};

use crate::version::SchemaVersion;

/// Contract for configuration types managed by a [`Store`](crate::Store).
///
/// Implement it with the derive macro:
///
/// ```rust
/// use live_config::Config;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Clone, Serialize, Deserialize, Config)]
/// #[config(version = "1.0.0", file_name = "my_config.toml")]
/// struct MyConfig {
///     field: String,
/// }
/// ```
pub trait Config:
    Default + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Schema version new documents are written at.
    const CURRENT_VERSION: SchemaVersion;

    /// File name of the document inside the store's directory.
    const FILE_NAME: &'static str;

    /// Copies freshly loaded values into the live instance.
    ///
    /// The default replaces the whole value. Override it to carry
    /// runtime-only state across reloads.
    fn apply(&mut self, incoming: Self) {
        *self = incoming;
    }
}
