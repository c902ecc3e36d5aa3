//! One live store per configuration type and path.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::Error;
use crate::store::{Store, StoreOptions};

type RegistryKey = (TypeId, PathBuf);

/// Type-erased registry slot; every slot holds a `Store<T>`.
trait AnyStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn is_closed(&self) -> bool;
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl<T: Config> AnyStore for Store<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_closed(&self) -> bool {
        Store::is_closed(self)
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(Store::close(self))
    }
}

/// Hands out configuration stores, at most one live store per
/// configuration type and document path.
///
/// Repeated [`get`](Registry::get) calls for the same type and directory
/// return handles to the same store, so every part of a process observes
/// the same live instance. A store that has been closed is dropped from
/// the registry and a fresh one is built on the next request. Distinct
/// registries do not share stores.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<RegistryKey, Box<dyn AnyStore>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for `T` under `directory`, opened with default options if
    /// it does not exist yet.
    pub async fn get<T: Config>(&self, directory: impl AsRef<Path>) -> Result<Store<T>, Error> {
        self.get_with(directory, StoreOptions::default()).await
    }

    /// The store for `T` under `directory`.
    ///
    /// `options` only apply when this call ends up opening the store; a
    /// live store is returned as-is. The registry lock is held across the
    /// open, so concurrent requests for the same store cannot race into
    /// building it twice.
    pub async fn get_with<T: Config>(
        &self,
        directory: impl AsRef<Path>,
        options: StoreOptions<T>,
    ) -> Result<Store<T>, Error> {
        std::fs::create_dir_all(directory.as_ref())?;
        let directory = directory.as_ref().canonicalize()?;
        let key = (TypeId::of::<T>(), directory.join(T::FILE_NAME));

        let mut entries = self.inner.entries.lock().await;
        // A closed store must never be handed out; stale entries are
        // dropped here and rebuilt below (iterating, not recursing).
        while let Some(entry) = entries.get(&key) {
            let store = entry
                .as_any()
                .downcast_ref::<Store<T>>()
                .expect("registry entry type mismatch")
                .clone();
            if !store.is_closed() {
                return Ok(store);
            }
            debug!(path = %key.1.display(), "evicting closed store");
            entries.remove(&key);
        }

        let store = Store::<T>::open(&directory, options).await?;
        store.set_unlink(Self::unlink_hook(Arc::downgrade(&self.inner), key.clone()));
        entries.insert(key, Box::new(store.clone()));
        Ok(store)
    }

    /// Closes every store the registry currently tracks.
    ///
    /// Stores are taken out of the registry first, so requests arriving
    /// while the closes run get fresh stores instead of half-closed ones.
    pub async fn close_all(&self) {
        let entries = std::mem::take(&mut *self.inner.entries.lock().await);
        for entry in entries.into_values() {
            entry.close().await;
        }
    }

    /// Detaches a store from its registry slot once it closes on its own.
    /// The removal is spawned rather than run inside the store's teardown;
    /// `get` self-heals in the meantime via the closed check. Only a slot
    /// that still holds a closed store is cleared, since the slot may have
    /// been reoccupied by a fresh store before the removal runs.
    fn unlink_hook(inner: Weak<RegistryInner>, key: RegistryKey) -> Box<dyn FnOnce() + Send> {
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                tokio::spawn(async move {
                    let mut entries = inner.entries.lock().await;
                    if entries.get(&key).is_some_and(|entry| entry.is_closed()) {
                        entries.remove(&key);
                    }
                });
            }
        })
    }
}
