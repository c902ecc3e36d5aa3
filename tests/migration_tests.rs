//! Integration tests for document migration.

use std::fs;
use std::time::Duration;

use live_config::{Config, Error, Migrator, SchemaVersion, Store, StoreEvent, StoreOptions};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Helper to create a temporary directory for tests
fn temp_config_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

const V1: SchemaVersion = SchemaVersion::new(1, 0, 0);
const V1_5: SchemaVersion = SchemaVersion::new(1, 5, 0);
const V2: SchemaVersion = SchemaVersion::new(2, 0, 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Config)]
#[config(version = "2.0.0", file_name = "record.toml")]
struct RecordConfig {
    name: String,
    max_retries: i64, // `retries` before 2.0.0
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_retries: 3,
        }
    }
}

/// The 1.0.0 -> 2.0.0 upgrade renamed `retries` to `max_retries`.
fn rename_retries() -> Migrator {
    Migrator::new(V1, V2, |mut document| {
        document.rename("retries", "max_retries");
        Ok(document)
    })
}

fn options_with(migrators: Vec<Migrator>) -> StoreOptions<RecordConfig> {
    StoreOptions::new()
        .hot_reload(false)
        .debounce_interval(Duration::from_millis(40))
        .migrators(migrators)
}

#[tokio::test]
async fn test_migrates_v1_document_and_persists_upgrade() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    let v1_contents = r#"
_version = "1.0.0"
name = "payments"
retries = 7
"#;
    fs::write(&config_path, v1_contents).expect("Failed to write config file");

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await
        .expect("Failed to open store");

    // Renamed field carries the original value.
    let config = store.get();
    assert_eq!(config.name, "payments");
    assert_eq!(config.max_retries, 7);

    // The upgraded document replaced the old one before open returned.
    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert!(contents.contains("_version = \"2.0.0\""));
    assert!(contents.contains("max_retries = 7"));
    assert!(!contents.contains("\nretries"), "old field must be gone");
    store.close().await;
}

#[tokio::test]
async fn test_versionless_document_is_treated_as_one_zero_zero() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    fs::write(&config_path, "name = \"legacy\"\nretries = 2\n")
        .expect("Failed to write config file");

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await
        .expect("Failed to open store");

    assert_eq!(store.get().max_retries, 2);
    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert!(contents.contains("_version = \"2.0.0\""));
    store.close().await;
}

#[tokio::test]
async fn test_current_version_loads_without_migration() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    let v2_contents = r#"
_version = "2.0.0"
name = "steady"
max_retries = 9
"#;
    fs::write(&config_path, v2_contents).expect("Failed to write config file");

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await
        .expect("Failed to open store");

    assert_eq!(store.get().max_retries, 9);
    // No persist-back happened, the file is byte-identical.
    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert_eq!(contents, v2_contents);
    store.close().await;
}

#[tokio::test]
async fn test_multi_step_chain_applies_in_order() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    fs::write(
        &config_path,
        "_version = \"1.0.0\"\nname = \"relay\"\nretries = 4\n",
    )
    .expect("Failed to write config file");

    // No direct route: 1.0.0 -> 1.5.0 renames, 1.5.0 -> 2.0.0 doubles.
    let first = Migrator::new(V1, V1_5, |mut document| {
        document.rename("retries", "max_retries");
        Ok(document)
    });
    let second = Migrator::new(V1_5, V2, |mut document| {
        let doubled = document
            .get("max_retries")
            .and_then(|value| value.as_integer())
            .map(|count| count * 2)
            .ok_or("max_retries missing after rename")?;
        document.insert("max_retries", doubled);
        Ok(document)
    });

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![second, first]))
        .await
        .expect("Failed to open store");

    assert_eq!(store.get().max_retries, 8, "both steps should have run");
    store.close().await;
}

#[tokio::test]
async fn test_shortest_chain_is_preferred() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    fs::write(
        &config_path,
        "_version = \"1.0.0\"\nname = \"router\"\nretries = 5\n",
    )
    .expect("Failed to write config file");

    let stepwise_a = Migrator::new(V1, V1_5, |mut document| {
        document.rename("retries", "max_retries");
        document.insert("name", "stepwise");
        Ok(document)
    });
    let stepwise_b = Migrator::new(V1_5, V2, Ok);
    let direct = Migrator::new(V1, V2, |mut document| {
        document.rename("retries", "max_retries");
        document.insert("name", "direct");
        Ok(document)
    });

    let store = Store::<RecordConfig>::open(
        temp_dir.path(),
        options_with(vec![stepwise_a, stepwise_b, direct]),
    )
    .await
    .expect("Failed to open store");

    assert_eq!(store.get().name, "direct");
    store.close().await;
}

#[tokio::test]
async fn test_unreachable_version_fails_open_and_leaves_file() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    let orphaned = "_version = \"9.0.0\"\nname = \"future\"\nmax_retries = 1\n";
    fs::write(&config_path, orphaned).expect("Failed to write config file");

    let result = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await;
    assert!(matches!(
        result,
        Err(Error::NoMigrationPath { from, to })
            if from == SchemaVersion::new(9, 0, 0) && to == V2
    ));

    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert_eq!(contents, orphaned, "failed load must not touch the file");
}

#[tokio::test]
async fn test_unreachable_version_on_reload_keeps_instance() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await
        .expect("Failed to open store");
    let mut events = store.subscribe();
    let before = store.get();

    fs::write(
        &config_path,
        "_version = \"9.0.0\"\nname = \"future\"\nmax_retries = 1\n",
    )
    .expect("Failed to write config file");

    let reloaded = store
        .reload_now(&CancellationToken::new())
        .await
        .expect("reload_now failed");
    assert!(!reloaded);

    assert_eq!(store.get(), before, "failed reload must not touch memory");
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for store event")
        .expect("event channel closed");
    assert!(matches!(event, StoreEvent::LoadFailed { .. }));
    store.close().await;
}

#[tokio::test]
async fn test_migration_reports_versions_on_the_event_channel() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    let store = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![rename_retries()]))
        .await
        .expect("Failed to open store");
    let mut events = store.subscribe();

    // Drop an outdated document in place and reload it explicitly.
    fs::write(
        &config_path,
        "_version = \"1.0.0\"\nname = \"late\"\nretries = 6\n",
    )
    .expect("Failed to write config file");
    let reloaded = store
        .reload_now(&CancellationToken::new())
        .await
        .expect("reload_now failed");
    assert!(reloaded);
    assert_eq!(store.get().max_retries, 6);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for store event")
        .expect("event channel closed");
    assert!(matches!(
        event,
        StoreEvent::Migrated { from, to, .. } if from == V1 && to == V2
    ));
    store.close().await;
}

#[tokio::test]
async fn test_failing_migrator_fails_open() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("record.toml");

    fs::write(
        &config_path,
        "_version = \"1.0.0\"\nname = \"broken\"\nretries = 1\n",
    )
    .expect("Failed to write config file");

    let failing = Migrator::new(V1, V2, |_| Err("field dropped in transit".into()));
    let result = Store::<RecordConfig>::open(temp_dir.path(), options_with(vec![failing])).await;
    assert!(matches!(
        result,
        Err(Error::Migration { from, to, .. }) if from == V1 && to == V2
    ));
}

/// Serialization refuses non-exportable values, so the persist-back of an
/// upgraded document can be made to fail after the migration itself ran.
#[derive(Debug, Clone, PartialEq, Deserialize, Config)]
#[config(version = "2.0.0", file_name = "brittle.toml")]
struct BrittleConfig {
    workers: u64,
    exportable: bool,
}

impl Default for BrittleConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            exportable: true,
        }
    }
}

impl Serialize for BrittleConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.exportable {
            return Err(serde::ser::Error::custom("value is not exportable"));
        }
        let mut state = serializer.serialize_struct("BrittleConfig", 2)?;
        state.serialize_field("workers", &self.workers)?;
        state.serialize_field("exportable", &self.exportable)?;
        state.end()
    }
}

#[tokio::test]
async fn test_failed_persist_back_leaves_instance_and_file_untouched() {
    let temp_dir = temp_config_dir();
    let config_path = temp_dir.path().join("brittle.toml");

    fs::write(
        &config_path,
        "_version = \"2.0.0\"\nworkers = 7\nexportable = true\n",
    )
    .expect("Failed to write config file");

    let options = StoreOptions::new()
        .hot_reload(false)
        .debounce_interval(Duration::from_millis(40))
        .migrator(Migrator::new(V1, V2, Ok));
    let store = Store::<BrittleConfig>::open(temp_dir.path(), options)
        .await
        .expect("Failed to open store");
    let mut events = store.subscribe();
    let before = store.get();

    // An outdated document whose upgraded form cannot be written back: the
    // migration succeeds, the persist-back does not.
    let outdated = "_version = \"1.0.0\"\nworkers = 20\nexportable = false\n";
    fs::write(&config_path, outdated).expect("Failed to write config file");

    let reloaded = store
        .reload_now(&CancellationToken::new())
        .await
        .expect("reload_now failed");
    assert!(!reloaded);

    assert_eq!(
        store.get(),
        before,
        "failed persist-back must leave the live instance untouched"
    );
    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert_eq!(contents, outdated, "failed persist-back must leave the file untouched");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for store event")
        .expect("event channel closed");
    assert!(matches!(event, StoreEvent::LoadFailed { .. }));

    // The stall is recoverable once the document can be written back.
    fs::write(
        &config_path,
        "_version = \"1.0.0\"\nworkers = 20\nexportable = true\n",
    )
    .expect("Failed to write config file");
    let reloaded = store
        .reload_now(&CancellationToken::new())
        .await
        .expect("reload_now failed");
    assert!(reloaded);
    assert_eq!(store.get().workers, 20);
    let contents = fs::read_to_string(&config_path).expect("Failed to read config file");
    assert!(contents.contains("_version = \"2.0.0\""));
    store.close().await;
}
