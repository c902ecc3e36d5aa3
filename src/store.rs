//! The store: a typed configuration kept live against its document on disk.
//!
//! A [`Store`] owns one configuration file. It loads (or creates) the file
//! when opened, migrates outdated documents, and from then on keeps memory
//! and disk converging in both directions:
//!
//! - mutations through [`update`](Store::update) mark the store dirty and
//!   schedule a debounced save;
//! - external edits to the file schedule a debounced reload into the live
//!   instance.
//!
//! Both directions coalesce bursts, drop work that conflicts with work
//! already running, and fall silent once [`close`](Store::close) has begun.
//!
//! # Example
//!
//! ```rust,no_run
//! use live_config::{Config, Store, StoreOptions};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize, Config)]
//! #[config(version = "1.0.0", file_name = "app.toml")]
//! struct AppConfig {
//!     endpoint: String,
//!     debug: bool,
//! }
//!
//! # async fn demo() -> Result<(), live_config::Error> {
//! let store = Store::<AppConfig>::open("/etc/myapp", StoreOptions::default()).await?;
//!
//! // Mutations are visible immediately and persisted shortly after.
//! store.update(|config| config.debug = true)?;
//!
//! // Flush and stop reacting to timers and file events.
//! store.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::atomic::AtomicFile;
use crate::config::Config;
use crate::debounce::DebouncedTrigger;
use crate::document::Document;
use crate::error::Error;
use crate::events::StoreEvent;
use crate::lifecycle::LifecycleGate;
use crate::migration::{MigrationPlan, Migrator};
use crate::watcher::{self, SelfWriteMute};

/// Default quiet period for both the save and the reload trigger.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);

/// How long the watcher bridge stays muted after one of the store's own
/// writes.
const SELF_WRITE_MUTE: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_CAPACITY: usize = 64;

type Factory<T> = Box<dyn FnOnce() -> T + Send>;

/// Opening parameters for a [`Store`].
pub struct StoreOptions<T: Config> {
    migrators: Vec<Migrator>,
    factory: Factory<T>,
    autosave: bool,
    hot_reload: bool,
    debounce: Duration,
}

impl<T: Config> Default for StoreOptions<T> {
    fn default() -> Self {
        Self {
            migrators: Vec::new(),
            factory: Box::new(T::default),
            autosave: true,
            hot_reload: true,
            debounce: DEFAULT_DEBOUNCE_INTERVAL,
        }
    }
}

impl<T: Config> StoreOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migrator. Order does not matter; the store resolves the
    /// shortest chain between versions on its own.
    pub fn migrator(mut self, migrator: Migrator) -> Self {
        self.migrators.push(migrator);
        self
    }

    pub fn migrators(mut self, migrators: impl IntoIterator<Item = Migrator>) -> Self {
        self.migrators.extend(migrators);
        self
    }

    /// Produces the initial instance when no document exists yet. Defaults
    /// to `T::default`.
    pub fn factory(mut self, factory: impl FnOnce() -> T + Send + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn autosave(mut self, enabled: bool) -> Self {
        self.autosave = enabled;
        self
    }

    pub fn hot_reload(mut self, enabled: bool) -> Self {
        self.hot_reload = enabled;
        self
    }

    pub fn debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce = interval;
        self
    }
}

struct Shared<T: Config> {
    path: PathBuf,
    file: AtomicFile,
    value: RwLock<T>,
    /// Serializes every file operation; at most one save or load runs at a
    /// time.
    io: Mutex<()>,
    gate: LifecycleGate,
    dirty: AtomicBool,
    saving: AtomicBool,
    loading: AtomicBool,
    autosave: AtomicBool,
    hot_reload: AtomicBool,
    debounce_millis: AtomicU64,
    mute: SelfWriteMute,
    plan: MigrationPlan,
    events: broadcast::Sender<StoreEvent>,
    /// Cancelled at teardown; stops the watcher task and unblocks pending
    /// operations waiting on the I/O mutex.
    token: CancellationToken,
    save_trigger: DebouncedTrigger,
    load_trigger: DebouncedTrigger,
    runtime: Handle,
    unlink: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// A handle to a live configuration store.
///
/// Handles are cheap to clone; all clones drive the same store. The store
/// keeps running while any handle exists and is torn down explicitly with
/// [`close`](Store::close), which flushes unsaved changes. Dropping the last
/// handle without closing stops the background tasks but does not flush.
pub struct Store<T: Config> {
    shared: Arc<Shared<T>>,
}

impl<T: Config> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Config> Store<T> {
    /// Opens the store for `directory/T::FILE_NAME`.
    ///
    /// Creates the directory and a default document when nothing exists
    /// yet. An existing document is parsed, migrated to the current version
    /// if its stamp is older (the upgraded form is persisted before this
    /// returns), and projected into the live instance. Afterwards the file
    /// watcher and the debounce triggers are armed.
    pub async fn open(
        directory: impl AsRef<Path>,
        options: StoreOptions<T>,
    ) -> Result<Self, Error> {
        let StoreOptions {
            migrators,
            factory,
            autosave,
            hot_reload,
            debounce,
        } = options;

        std::fs::create_dir_all(directory.as_ref())?;
        let directory = directory.as_ref().canonicalize()?;
        let path = directory.join(T::FILE_NAME);
        let initial = factory();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new_cyclic(|weak: &Weak<Shared<T>>| {
            let save_trigger = DebouncedTrigger::spawn({
                let weak = weak.clone();
                move || {
                    let shared = weak.upgrade();
                    async move {
                        if let Some(shared) = shared {
                            shared.autosave_fire().await;
                        }
                    }
                }
            });
            let load_trigger = DebouncedTrigger::spawn({
                let weak = weak.clone();
                move || {
                    let shared = weak.upgrade();
                    async move {
                        if let Some(shared) = shared {
                            shared.autoload_fire().await;
                        }
                    }
                }
            });
            Shared {
                file: AtomicFile::new(path.clone()),
                path,
                value: RwLock::new(initial),
                io: Mutex::new(()),
                gate: LifecycleGate::new(),
                dirty: AtomicBool::new(false),
                saving: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                autosave: AtomicBool::new(autosave),
                hot_reload: AtomicBool::new(hot_reload),
                debounce_millis: AtomicU64::new(debounce.as_millis() as u64),
                mute: SelfWriteMute::new(),
                plan: MigrationPlan::new(T::CURRENT_VERSION, migrators),
                events,
                token: CancellationToken::new(),
                save_trigger,
                load_trigger,
                runtime: Handle::current(),
                unlink: StdMutex::new(None),
            }
        });

        shared.initial_load().await?;

        // Writes during open all happen before the watch begins; the mute
        // they armed must not swallow the first external edit.
        shared.mute.clear();
        watcher::spawn(&directory, shared.path.clone(), shared.token.child_token(), {
            let weak = Arc::downgrade(&shared);
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.file_changed();
                }
            }
        })?;

        info!(path = %shared.path.display(), "configuration store ready");
        Ok(Self { shared })
    }

    /// The document's absolute path.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Runs `mutate` on the live instance under the write lock, marks the
    /// store dirty, and schedules the debounced save (when autosave is on).
    ///
    /// Every clone of this handle observes the change as soon as this
    /// returns. An admitted call counts as in-flight, so a teardown that
    /// started underneath it waits for the mutation before the final
    /// flush. Fails with [`Error::Closed`] once teardown has begun.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> Result<R, Error> {
        let _op = self.shared.gate.enter()?;
        let result = {
            let mut live = self
                .shared
                .value
                .write()
                .expect("live configuration lock poisoned");
            mutate(&mut live)
        };
        self.shared.mark_dirty();
        Ok(result)
    }

    /// A snapshot of the live instance.
    ///
    /// Reads keep working after [`close`](Store::close); they return the
    /// last state the store held.
    pub fn get(&self) -> T {
        self.shared
            .value
            .read()
            .expect("live configuration lock poisoned")
            .clone()
    }

    /// Runs `read` against the live instance without cloning it.
    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        let live = self
            .shared
            .value
            .read()
            .expect("live configuration lock poisoned");
        read(&live)
    }

    /// Subscribes to the store's [events](StoreEvent).
    ///
    /// Slow subscribers miss events rather than blocking the store.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }

    /// Cancels any pending debounced save and saves immediately.
    ///
    /// Returns `Ok(false)` without touching the file when a reload is in
    /// flight, when `cancel` fires before the I/O mutex is acquired, or
    /// when persistence fails (failures are reported as
    /// [`StoreEvent::SaveFailed`]). Cancellation is cooperative and only
    /// observed before the write starts; a write that began always
    /// completes.
    pub async fn save_now(&self, cancel: &CancellationToken) -> Result<bool, Error> {
        let shared = &self.shared;
        let _op = shared.gate.enter()?;
        shared.save_trigger.cancel();
        if cancel.is_cancelled() || shared.loading.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(_io) = shared.lock_io_with(cancel).await else {
            return Ok(false);
        };
        Ok(shared.guarded_save())
    }

    /// Cancels any pending debounced reload and re-reads the document into
    /// the live instance immediately.
    ///
    /// Returns `Ok(false)` without touching the file when a save is in
    /// flight, when `cancel` fires before the I/O mutex is acquired, or
    /// when the load fails (failures are reported as
    /// [`StoreEvent::LoadFailed`]).
    pub async fn reload_now(&self, cancel: &CancellationToken) -> Result<bool, Error> {
        let shared = &self.shared;
        let _op = shared.gate.enter()?;
        shared.load_trigger.cancel();
        if cancel.is_cancelled() || shared.saving.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(_io) = shared.lock_io_with(cancel).await else {
            return Ok(false);
        };
        Ok(shared.guarded_load())
    }

    /// Whether mutations are still persisted automatically.
    pub fn autosave(&self) -> bool {
        self.shared.autosave.load(Ordering::SeqCst)
    }

    /// Toggles autosave. Disabling it disarms a pending debounced save;
    /// changes made while it is off persist on [`save_now`](Store::save_now)
    /// or at close.
    pub fn set_autosave(&self, enabled: bool) {
        self.shared.autosave.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.shared.save_trigger.cancel();
        }
    }

    /// Whether external file edits are folded back into the live instance.
    pub fn hot_reload(&self) -> bool {
        self.shared.hot_reload.load(Ordering::SeqCst)
    }

    /// Toggles hot reload. Disabling it disarms a pending debounced reload.
    pub fn set_hot_reload(&self, enabled: bool) {
        self.shared.hot_reload.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.shared.load_trigger.cancel();
        }
    }

    pub fn debounce_interval(&self) -> Duration {
        self.shared.debounce_interval()
    }

    /// Changes the quiet period for both triggers. Takes effect from the
    /// next schedule; an armed deadline keeps its old interval.
    pub fn set_debounce_interval(&self, interval: Duration) {
        self.shared
            .debounce_millis
            .store(interval.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether teardown has begun. A closed store rejects mutations and
    /// I/O but still serves reads.
    pub fn is_closed(&self) -> bool {
        !self.shared.gate.is_ready()
    }

    /// Tears the store down.
    ///
    /// Stops reacting to timers and file events, rejects new operations,
    /// waits for operations already admitted to finish, then persists the
    /// state one last time if it is dirty. Emits [`StoreEvent::Closed`] at
    /// the end. Idempotent; concurrent and repeated calls return without
    /// redoing any of this.
    pub async fn close(&self) {
        let shared = &self.shared;
        if !shared.gate.begin_close() {
            return;
        }
        debug!(path = %shared.path.display(), "closing configuration store");

        // Unblocks operations parked on the I/O mutex and stops the
        // watcher task.
        shared.token.cancel();
        shared.save_trigger.cancel();
        shared.load_trigger.cancel();
        shared.gate.drained().await;

        if shared.dirty.load(Ordering::SeqCst) {
            let _io = shared.io.lock().await;
            shared.guarded_save();
        }

        shared.gate.finish_close();
        if let Some(unlink) = shared
            .unlink
            .lock()
            .expect("unlink hook lock poisoned")
            .take()
        {
            unlink();
        }
        let _ = shared.events.send(StoreEvent::Closed {
            path: shared.path.clone(),
        });
        info!(path = %shared.path.display(), "configuration store closed");
    }

    /// Blocking variant of [`close`](Store::close) for synchronous callers.
    ///
    /// Spawns the teardown on the runtime the store was opened on and parks
    /// the calling thread until it finishes. Do not call this from that
    /// runtime's own worker threads (or from a current-thread runtime): the
    /// teardown can then never run, and the call deadlocks. In async code
    /// use [`close`](Store::close).
    pub fn close_blocking(&self) {
        let store = self.clone();
        let (done, finished) = std::sync::mpsc::channel();
        self.shared.runtime.spawn(async move {
            store.close().await;
            let _ = done.send(());
        });
        let _ = finished.recv();
    }

    pub(crate) fn set_unlink(&self, unlink: Box<dyn FnOnce() + Send>) {
        *self
            .shared
            .unlink
            .lock()
            .expect("unlink hook lock poisoned") = Some(unlink);
    }
}

impl<T: Config> Shared<T> {
    fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_millis.load(Ordering::SeqCst))
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        if self.autosave.load(Ordering::SeqCst) && !self.loading.load(Ordering::SeqCst) {
            self.save_trigger.schedule(self.debounce_interval());
        }
    }

    /// Watcher bridge entry point, called for every relevant file event.
    fn file_changed(&self) {
        if !self.hot_reload.load(Ordering::SeqCst) || !self.gate.is_ready() {
            return;
        }
        if self.mute.is_active() || self.saving.load(Ordering::SeqCst) {
            debug!(path = %self.path.display(), "ignoring own write to the document");
            return;
        }
        self.load_trigger.schedule(self.debounce_interval());
    }

    /// First load at open time. Creates the document when it is missing,
    /// otherwise loads and (if needed) migrates it. Errors here fail the
    /// open instead of going to the event channel.
    async fn initial_load(&self) -> Result<(), Error> {
        let _io = self.io.lock().await;
        if self.path.exists() {
            self.load_locked()?;
        } else {
            self.save_locked()?;
            info!(path = %self.path.display(), "created default configuration");
        }
        Ok(())
    }

    /// Debounced save, fired by the save trigger.
    async fn autosave_fire(&self) {
        if self.loading.load(Ordering::SeqCst) {
            debug!(path = %self.path.display(), "skipping autosave, reload in flight");
            return;
        }
        let Ok(_op) = self.gate.enter() else { return };
        let Some(_io) = self.lock_io().await else {
            return;
        };
        self.guarded_save();
    }

    /// Debounced reload, fired by the load trigger.
    async fn autoload_fire(&self) {
        if self.saving.load(Ordering::SeqCst) {
            debug!(path = %self.path.display(), "skipping reload, save in flight");
            return;
        }
        let Ok(_op) = self.gate.enter() else { return };
        let Some(_io) = self.lock_io().await else {
            return;
        };
        self.guarded_load();
    }

    /// Runs a save under an already-held I/O mutex, maintaining the
    /// `saving` flag and reporting the outcome. Returns whether the save
    /// succeeded.
    fn guarded_save(&self) -> bool {
        self.saving.store(true, Ordering::SeqCst);
        let result = self.save_locked();
        self.saving.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                let _ = self.events.send(StoreEvent::Saved {
                    path: self.path.clone(),
                });
                true
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to persist configuration");
                let _ = self.events.send(StoreEvent::SaveFailed {
                    path: self.path.clone(),
                    error: error.to_string(),
                });
                false
            }
        }
    }

    /// Runs a reload under an already-held I/O mutex, maintaining the
    /// `loading` flag and reporting the outcome. Returns whether the load
    /// succeeded.
    fn guarded_load(&self) -> bool {
        self.loading.store(true, Ordering::SeqCst);
        let result = self.load_locked();
        self.loading.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                info!(path = %self.path.display(), "configuration reloaded from disk");
                let _ = self.events.send(StoreEvent::Reloaded {
                    path: self.path.clone(),
                });
                true
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to reload configuration");
                let _ = self.events.send(StoreEvent::LoadFailed {
                    path: self.path.clone(),
                    error: error.to_string(),
                });
                false
            }
        }
    }

    /// Serializes the live instance and writes it out atomically. Caller
    /// must hold the I/O mutex.
    ///
    /// The dirty flag is cleared before the snapshot is taken; a mutation
    /// racing with the write re-marks it and gets picked up by the next
    /// save. On failure the flag is restored so the change is not lost.
    fn save_locked(&self) -> Result<(), Error> {
        let was_dirty = self.dirty.swap(false, Ordering::SeqCst);
        let render = {
            let live = self.value.read().expect("live configuration lock poisoned");
            Document::from_config(&*live).and_then(|document| document.render())
        };
        let written = render.and_then(|text| self.write_text(&text));
        match written {
            Ok(()) => {
                debug!(path = %self.path.display(), "configuration persisted");
                Ok(())
            }
            Err(error) => {
                if was_dirty {
                    self.dirty.store(true, Ordering::SeqCst);
                }
                Err(error)
            }
        }
    }

    /// Replaces the document atomically inside the self-write mute window.
    fn write_text(&self, text: &str) -> Result<(), Error> {
        self.mute.arm(SELF_WRITE_MUTE);
        self.file.write(text).map_err(Error::from)
    }

    /// Reads the document, migrates it when its version is behind, and
    /// projects it into the live instance. Caller must hold the I/O mutex.
    ///
    /// The live instance is only touched after the document has parsed,
    /// migrated, projected, and (when an upgrade ran) persisted back
    /// cleanly; any failure leaves instance, dirty flag, and file as they
    /// were.
    fn load_locked(&self) -> Result<(), Error> {
        let text = self.file.read()?;
        let mut document = Document::parse(&text)?;
        let loaded_version = document.version()?;
        let current = self.plan.current();

        let migrated = loaded_version != current;
        if migrated {
            let chain = self.plan.resolve(loaded_version)?;
            debug!(
                path = %self.path.display(),
                from = %loaded_version,
                to = %current,
                steps = chain.len(),
                "migrating configuration document",
            );
            for migrator in chain {
                document = migrator.apply(document)?;
                document.set_version(migrator.to_version());
            }
        }

        let incoming: T = document.project()?;
        if migrated {
            // The upgraded document replaces the outdated one on disk
            // before the live instance takes the new values; a failed
            // write leaves file, instance, and dirty flag as they were.
            let upgraded =
                Document::from_config(&incoming).and_then(|document| document.render())?;
            self.write_text(&upgraded)?;
            info!(
                path = %self.path.display(),
                from = %loaded_version,
                to = %current,
                "migrated configuration",
            );
        }

        {
            let mut live = self.value.write().expect("live configuration lock poisoned");
            live.apply(incoming);
        }
        self.dirty.store(false, Ordering::SeqCst);

        if migrated {
            let _ = self.events.send(StoreEvent::Migrated {
                path: self.path.clone(),
                from: loaded_version,
                to: current,
            });
        }
        Ok(())
    }

    /// Acquires the I/O mutex unless the store is torn down first.
    async fn lock_io(&self) -> Option<MutexGuard<'_, ()>> {
        tokio::select! {
            guard = self.io.lock() => Some(guard),
            () = self.token.cancelled() => None,
        }
    }

    /// Acquires the I/O mutex unless `cancel` fires or the store is torn
    /// down first.
    async fn lock_io_with(&self, cancel: &CancellationToken) -> Option<MutexGuard<'_, ()>> {
        tokio::select! {
            guard = self.io.lock() => Some(guard),
            () = cancel.cancelled() => None,
            () = self.token.cancelled() => None,
        }
    }
}

impl<T: Config> Drop for Shared<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
