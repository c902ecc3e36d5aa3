//! Generic configuration documents.
//!
//! A [`Document`] is the ordered field map a configuration file decodes to
//! before it is projected into a typed value. Migrations transform documents
//! rather than typed values, so a document's shape is opaque here apart from
//! the reserved version field.

use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::config::Config;
use crate::error::Error;
use crate::version::SchemaVersion;

/// Reserved key carrying the schema version in every persisted document.
pub const VERSION_KEY: &str = "_version";

/// Version assumed for documents written before versioning existed.
pub(crate) const LEGACY_VERSION: SchemaVersion = SchemaVersion::new(1, 0, 0);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Table,
}

impl Document {
    /// Parses a document from configuration file text.
    ///
    /// Comments and trailing separators are part of the accepted syntax;
    /// [`render`](Self::render) never emits them.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let fields: Table = text.parse()?;
        Ok(Self { fields })
    }

    /// Serializes a typed configuration and stamps its current version.
    pub fn from_config<T: Config>(config: &T) -> Result<Self, Error> {
        let Value::Table(fields) = Value::try_from(config)? else {
            return Err(Error::NotATable);
        };
        let mut document = Self { fields };
        document.set_version(T::CURRENT_VERSION);
        Ok(document)
    }

    pub fn render(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(&self.fields)?)
    }

    /// The document's schema version.
    ///
    /// Documents without a version field read as `1.0.0`.
    pub fn version(&self) -> Result<SchemaVersion, Error> {
        match self.fields.get(VERSION_KEY) {
            None => Ok(LEGACY_VERSION),
            Some(Value::String(text)) => text.parse(),
            Some(other) => Err(Error::InvalidVersion(other.to_string())),
        }
    }

    pub fn set_version(&mut self, version: SchemaVersion) {
        self.fields
            .insert(VERSION_KEY.to_string(), Value::String(version.to_string()));
    }

    /// Projects the document into a typed configuration.
    ///
    /// The version field is stripped first so configuration types never see
    /// the envelope key.
    pub fn project<T: DeserializeOwned>(mut self) -> Result<T, Error> {
        self.fields.remove(VERSION_KEY);
        Ok(self.fields.try_into()?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Moves a field to a new key. Returns `false` if `from` is absent.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.fields.remove(from) {
            Some(value) => {
                self.fields.insert(to.to_string(), value);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        retries: i64,
    }

    impl Config for Sample {
        const CURRENT_VERSION: SchemaVersion = SchemaVersion::new(2, 0, 0);
        const FILE_NAME: &'static str = "sample.toml";
    }

    #[test]
    fn accepts_comments_and_trailing_separators() {
        let document = Document::parse(
            r#"
# leading comment
name = "alpha" # trailing comment
items = [1, 2, 3,]
"#,
        )
        .unwrap();
        assert_eq!(document.get("name"), Some(&Value::String("alpha".into())));
    }

    #[test]
    fn missing_version_reads_as_legacy() {
        let document = Document::parse("name = \"a\"").unwrap();
        assert_eq!(document.version().unwrap(), SchemaVersion::new(1, 0, 0));
    }

    #[test]
    fn non_string_version_is_invalid() {
        let document = Document::parse("_version = 2").unwrap();
        assert!(matches!(
            document.version(),
            Err(Error::InvalidVersion(_))
        ));
    }

    #[test]
    fn from_config_stamps_current_version() {
        let sample = Sample {
            name: "a".into(),
            retries: 3,
        };
        let document = Document::from_config(&sample).unwrap();
        assert_eq!(document.version().unwrap(), SchemaVersion::new(2, 0, 0));
        let text = document.render().unwrap();
        assert!(text.contains("_version = \"2.0.0\""));
    }

    #[test]
    fn projection_strips_the_version_field() {
        let document = Document::parse(
            r#"
_version = "2.0.0"
name = "a"
retries = 5
"#,
        )
        .unwrap();
        let sample: Sample = document.project().unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "a".into(),
                retries: 5
            }
        );
    }

    #[test]
    fn project_then_encode_preserves_values() {
        let original = Document::parse(
            r#"
_version = "2.0.0"
name = "roundtrip"
retries = 9
"#,
        )
        .unwrap();
        let sample: Sample = original.clone().project().unwrap();
        let encoded = Document::from_config(&sample).unwrap();
        assert_eq!(encoded.get("name"), original.get("name"));
        assert_eq!(encoded.get("retries"), original.get("retries"));
        assert_eq!(encoded.version().unwrap(), original.version().unwrap());
    }

    #[test]
    fn rename_moves_values() {
        let mut document = Document::parse("retries = 4").unwrap();
        assert!(document.rename("retries", "max_retries"));
        assert!(!document.contains("retries"));
        assert_eq!(document.get("max_retries"), Some(&Value::Integer(4)));
        assert!(!document.rename("absent", "other"));
    }
}
