//! The live config store.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → parser (injectable, JSON by default)
//!     → overrides applied path by path
//!     → Arc<ConfigMap> stored in an ArcSwap
//!
//! On change:
//!     watcher detects change (poll or notify)
//!     → reload reads and parses the file
//!     → overrides re-applied to the new mapping
//!     → single pointer swap, readers see old or new, never a mix
//!     → Reload event, then sub-views refreshed recursively
//! ```
//!
//! Writers (`set`, `set_path`, `import`, reload installation) are serialized
//! by a write lock and replace the mapping copy-on-write. Readers never take
//! a lock.

mod reload;

use crate::env::{HostProbe, ServerEnv, SystemProbe};
use crate::error::{ConfigError, Result};
use crate::events::{ConfigEvent, EventKind, ListenerId, Listeners};
use crate::overrides::OverrideSource;
use crate::parser::{ConfigParser, JsonParser};
use crate::path::{self, PathError};
use crate::value::{ConfigMap, Lookup, map_or_empty};
use crate::watcher::{self, WatchHandle, WatchStrategy};
use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use reload::FREQUENCY_KEY;

/// A hierarchical config store, optionally backed by a file on disk.
///
/// Created with [`ConfigStore::from_file`] or [`ConfigStore::from_map`].
/// Sub-views created with [`ConfigStore::sub_view`] are stores too; they
/// have no file and no overrides, and are refreshed by their parent.
pub struct ConfigStore {
    data: ArcSwap<ConfigMap>,
    source: Option<PathBuf>,
    parser: Arc<dyn ConfigParser>,
    overrides: Option<Arc<dyn OverrideSource>>,
    last_modified: Mutex<Option<SystemTime>>,
    children: Mutex<BTreeMap<String, Arc<ConfigStore>>>,
    listeners: Listeners,
    write_lock: Mutex<()>,
    /// Held across a whole reload so overlapping reloads install in order.
    reload_lock: tokio::sync::Mutex<()>,
    watch: Mutex<Option<WatchHandle>>,
    env: Mutex<Option<ServerEnv>>,
}

enum Source {
    File(PathBuf),
    Map(ConfigMap),
}

/// Builder for [`ConfigStore`].
pub struct StoreBuilder {
    source: Source,
    parser: Arc<dyn ConfigParser>,
    overrides: Option<Arc<dyn OverrideSource>>,
    watch: Option<WatchStrategy>,
}

impl StoreBuilder {
    /// Use a custom parser for the config file.
    pub fn parser(mut self, parser: impl ConfigParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Attach an override source, applied after every load.
    pub fn overrides(mut self, overrides: Arc<dyn OverrideSource>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Watch the backing file for changes. Ignored for in-memory stores.
    pub fn watch(mut self, strategy: WatchStrategy) -> Self {
        self.watch = Some(strategy);
        self
    }

    /// Load the config and start watching if requested.
    ///
    /// Loading is synchronous; a missing, unreadable or malformed file fails
    /// construction. Watching needs a running Tokio runtime.
    pub fn build(self) -> Result<Arc<ConfigStore>> {
        let (source, data, modified) = match self.source {
            Source::File(path) => {
                let (map, modified) = reload::load_file_sync(&path, self.parser.as_ref())?;
                info!(path = %path.display(), keys = map.len(), "Loaded config file");
                (Some(path), map, modified)
            }
            Source::Map(map) => (None, map, None),
        };

        let store = Arc::new(ConfigStore {
            data: ArcSwap::from_pointee(ConfigMap::new()),
            source,
            parser: self.parser,
            overrides: self.overrides,
            last_modified: Mutex::new(modified),
            children: Mutex::new(BTreeMap::new()),
            listeners: Listeners::new(),
            write_lock: Mutex::new(()),
            reload_lock: tokio::sync::Mutex::new(()),
            watch: Mutex::new(None),
            env: Mutex::new(None),
        });
        store.install(data);

        if let Some(strategy) = self.watch
            && store.source.is_some()
        {
            store.watch(strategy)?;
        }

        Ok(store)
    }
}

impl ConfigStore {
    /// Start building a store backed by the file at `path`.
    pub fn from_file(path: impl Into<PathBuf>) -> StoreBuilder {
        Self::builder(Source::File(path.into()))
    }

    /// Start building a store over an in-memory mapping, with no file.
    pub fn from_map(map: ConfigMap) -> StoreBuilder {
        Self::builder(Source::Map(map))
    }

    fn builder(source: Source) -> StoreBuilder {
        StoreBuilder {
            source,
            parser: Arc::new(JsonParser),
            overrides: None,
            watch: None,
        }
    }

    /// A store driven entirely by its parent.
    fn derived(map: ConfigMap) -> Self {
        Self {
            data: ArcSwap::from_pointee(map),
            source: None,
            parser: Arc::new(JsonParser),
            overrides: None,
            last_modified: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
            listeners: Listeners::new(),
            write_lock: Mutex::new(()),
            reload_lock: tokio::sync::Mutex::new(()),
            watch: Mutex::new(None),
            env: Mutex::new(None),
        }
    }

    // ---- reads -------------------------------------------------------

    /// The whole backing mapping.
    ///
    /// The returned snapshot never changes; after a reload or write, call
    /// again to see the new mapping.
    pub fn all(&self) -> Arc<ConfigMap> {
        self.data.load_full()
    }

    /// Look up a single top-level key. Delimiters in `key` are not special.
    pub fn get(&self, key: &str) -> Lookup {
        Lookup::from_option(self.data.load().get(key))
    }

    /// Look up a value by `.` or `/` delimited path.
    pub fn get_path(&self, path: &str) -> Lookup {
        path::get_path(&self.data.load(), path)
    }

    /// Deserialize the value at `path` into `T`.
    ///
    /// Returns `Ok(None)` when nothing is at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> serde_json::Result<Option<T>> {
        match self.get_path(path).into_value() {
            Some(value) => serde_json::from_value(value).map(Some),
            None => Ok(None),
        }
    }

    // ---- writes ------------------------------------------------------

    /// Set a top-level key.
    ///
    /// With an override source attached the value is also recorded there,
    /// so a later reload of the file does not revert it.
    pub fn set(&self, key: &str, value: Value) {
        let _guard = lock(&self.write_lock);
        if let Some(overrides) = &self.overrides {
            overrides.set_override(&path::escape_segment(key), value.clone());
        }
        let mut map = ConfigMap::clone(&self.data.load());
        map.insert(key.to_string(), value);
        self.data.store(Arc::new(map));
    }

    /// Set a value by path, creating intermediate mappings as needed.
    ///
    /// Fails, leaving the store unchanged, when the path runs into a
    /// non-mapping value.
    pub fn set_path(&self, path: &str, value: Value) -> std::result::Result<(), PathError> {
        let _guard = lock(&self.write_lock);
        let mut map = ConfigMap::clone(&self.data.load());
        path::set_path(&mut map, path, value)?;
        self.data.store(Arc::new(map));
        Ok(())
    }

    /// Shallow-merge `other` into the top level, overwriting existing keys.
    pub fn import(&self, other: ConfigMap) {
        let _guard = lock(&self.write_lock);
        let mut map = ConfigMap::clone(&self.data.load());
        for (key, value) in other {
            map.insert(key, value);
        }
        self.data.store(Arc::new(map));
    }

    /// Replace the mapping with `map` after applying every override.
    ///
    /// Overrides are fetched fresh and written over the complete new
    /// mapping before it becomes visible.
    fn install(&self, mut map: ConfigMap) {
        let _guard = lock(&self.write_lock);
        if let Some(overrides) = &self.overrides {
            for (key, value) in overrides.all_overrides() {
                if let Err(err) = path::set_path(&mut map, &key, value) {
                    warn!(error = %err, "Skipping config override");
                }
            }
        }
        self.data.store(Arc::new(map));
    }

    // ---- sub-views ---------------------------------------------------

    /// Get the sub-view rooted at top-level `key`, creating it if needed.
    ///
    /// The sub-view holds `self.get(key)` (or an empty mapping when that is
    /// not a mapping) and is refreshed, with a `Reload` event, every time
    /// this store reloads.
    pub fn sub_view(&self, key: &str) -> Arc<ConfigStore> {
        let mut children = lock(&self.children);
        if let Some(existing) = children.get(key) {
            return Arc::clone(existing);
        }
        let child = Arc::new(ConfigStore::derived(map_or_empty(self.data.load().get(key))));
        children.insert(key.to_string(), Arc::clone(&child));
        debug!(key, "Created config sub-view");
        child
    }

    /// Stop refreshing the sub-view at `key`. Returns `true` if one existed.
    pub fn remove_sub_view(&self, key: &str) -> bool {
        lock(&self.children).remove(key).is_some()
    }

    // ---- events ------------------------------------------------------

    /// Register a callback for `Reload` or `Error` events.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        self.listeners.on(kind, callback)
    }

    /// Remove a callback registered with [`ConfigStore::on`].
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    /// Receive every future event of this store on an async channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.listeners.subscribe()
    }

    pub(crate) fn emit(&self, event: ConfigEvent) {
        self.listeners.emit(event);
    }

    // ---- watching ----------------------------------------------------

    /// Start watching the backing file, replacing any running watcher.
    ///
    /// For polling, a `check_config_freq_ms` value in the loaded config takes
    /// precedence over the interval given here. A zero interval or debounce
    /// window is rejected.
    pub fn watch(self: &Arc<Self>, strategy: WatchStrategy) -> Result<()> {
        let path = self.source.clone().ok_or(ConfigError::NoSource)?;
        let strategy = match strategy {
            WatchStrategy::Poll { interval } => WatchStrategy::Poll {
                interval: self.check_frequency().unwrap_or(interval),
            },
            other => other,
        };
        let period = match strategy {
            WatchStrategy::Poll { interval } => interval,
            WatchStrategy::Notify { debounce } => debounce,
        };
        if period.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        self.stop();
        let handle = watcher::start(Arc::downgrade(self), path, strategy)?;
        *lock(&self.watch) = Some(handle);
        Ok(())
    }

    /// Stop watching the backing file. Does nothing if not watching.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.watch).take() {
            handle.stop();
        }
    }

    /// The active watch strategy, if the file is being watched.
    pub fn watch_strategy(&self) -> Option<WatchStrategy> {
        lock(&self.watch).as_ref().map(WatchHandle::strategy)
    }

    // ---- metadata ----------------------------------------------------

    /// Path of the backing file, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Modification time of the backing file as of the last check.
    pub fn last_modified(&self) -> Option<SystemTime> {
        *lock(&self.last_modified)
    }

    // ---- environment -------------------------------------------------

    /// Discover this host's name and IP address and remember them.
    pub async fn get_env(&self) -> Result<ServerEnv> {
        self.get_env_with(&SystemProbe).await
    }

    /// Like [`ConfigStore::get_env`], with a custom probe.
    pub async fn get_env_with(&self, probe: &dyn HostProbe) -> Result<ServerEnv> {
        let env = ServerEnv::discover(probe).await?;
        *lock(&self.env) = Some(env.clone());
        Ok(env)
    }

    /// Hostname found by the last successful [`ConfigStore::get_env`].
    pub fn hostname(&self) -> Option<String> {
        lock(&self.env).as_ref().map(|env| env.hostname.clone())
    }

    /// IP address found by the last successful [`ConfigStore::get_env`].
    pub fn ip(&self) -> Option<Ipv4Addr> {
        lock(&self.env).as_ref().map(|env| env.ip)
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("source", &self.source)
            .field("keys", &self.data.load().len())
            .field("sub_views", &lock(&self.children).len())
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
