//! Schema migrations over generic documents.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use tracing::warn;

use crate::document::Document;
use crate::error::Error;
use crate::version::SchemaVersion;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type TransformFn = Box<dyn Fn(Document) -> Result<Document, BoxError> + Send + Sync>;

/// A single schema transformation between two versions.
///
/// Transforms receive the whole document and return the reshaped one; they
/// do not need to maintain the version field, the store stamps it after each
/// step.
pub struct Migrator {
    from: SchemaVersion,
    to: SchemaVersion,
    transform: TransformFn,
}

impl Migrator {
    pub fn new(
        from: SchemaVersion,
        to: SchemaVersion,
        transform: impl Fn(Document) -> Result<Document, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from,
            to,
            transform: Box::new(transform),
        }
    }

    pub fn from_version(&self) -> SchemaVersion {
        self.from
    }

    pub fn to_version(&self) -> SchemaVersion {
        self.to
    }

    pub(crate) fn apply(&self, document: Document) -> Result<Document, Error> {
        (self.transform)(document).map_err(|source| Error::Migration {
            from: self.from,
            to: self.to,
            source,
        })
    }
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Next-hop table toward the current version, built once per store.
///
/// Construction runs a breadth-first search from the current version over
/// reversed migrator edges, so the hop recorded for a version is the first
/// step of a shortest chain to current. Resolution then walks forward
/// without searching.
#[derive(Debug)]
pub(crate) struct MigrationPlan {
    current: SchemaVersion,
    next_hop: HashMap<SchemaVersion, usize>,
    migrators: Vec<Migrator>,
}

impl MigrationPlan {
    pub(crate) fn new(current: SchemaVersion, migrators: Vec<Migrator>) -> Self {
        let mut by_target: HashMap<SchemaVersion, Vec<usize>> = HashMap::new();
        for (index, migrator) in migrators.iter().enumerate() {
            if migrator.from == migrator.to {
                warn!(version = %migrator.from, "ignoring self-referential migrator");
                continue;
            }
            by_target.entry(migrator.to).or_default().push(index);
        }

        let mut next_hop = HashMap::new();
        let mut queue = VecDeque::from([current]);
        while let Some(version) = queue.pop_front() {
            for &index in by_target.get(&version).into_iter().flatten() {
                let from = migrators[index].from;
                if from != current && !next_hop.contains_key(&from) {
                    next_hop.insert(from, index);
                    queue.push_back(from);
                }
            }
        }

        Self {
            current,
            next_hop,
            migrators,
        }
    }

    pub(crate) fn current(&self) -> SchemaVersion {
        self.current
    }

    /// The migrator chain from `start` to the current version, in
    /// application order. Empty when `start` is already current.
    pub(crate) fn resolve(&self, start: SchemaVersion) -> Result<Vec<&Migrator>, Error> {
        let mut chain = Vec::new();
        let mut at = start;
        while at != self.current {
            let Some(&index) = self.next_hop.get(&at) else {
                return Err(Error::NoMigrationPath {
                    from: start,
                    to: self.current,
                });
            };
            let migrator = &self.migrators[index];
            chain.push(migrator);
            at = migrator.to;
        }
        Ok(chain)
    }
}
