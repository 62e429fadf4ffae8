//! Reload pipeline.
//!
//! One watch cycle: read the file, parse it, install it with overrides
//! re-applied, emit `Reload`, refresh sub-views, then retune the poll
//! interval if the file asks for a different one. A failed read or parse
//! emits `Error` and leaves the current mapping in place.

use super::{ConfigStore, lock};
use crate::error::{ConfigError, Result};
use crate::events::ConfigEvent;
use crate::parser::ConfigParser;
use crate::value::{ConfigMap, map_or_empty};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Config key holding the poll interval in milliseconds.
pub const FREQUENCY_KEY: &str = "check_config_freq_ms";

/// Read and parse a config file synchronously, for construction.
pub(super) fn load_file_sync(
    path: &Path,
    parser: &dyn ConfigParser,
) -> Result<(ConfigMap, Option<SystemTime>)> {
    let read_error = |source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };
    let metadata = std::fs::metadata(path).map_err(read_error)?;
    let text = std::fs::read_to_string(path).map_err(read_error)?;
    let map = parse_document(path, &text, parser)?;
    Ok((map, metadata.modified().ok()))
}

/// Parse file text, requiring a mapping at the top level.
fn parse_document(path: &Path, text: &str, parser: &dyn ConfigParser) -> Result<ConfigMap> {
    match parser.parse(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl ConfigStore {
    /// Reload the backing file now.
    ///
    /// On failure the error is emitted as an `Error` event as well as
    /// returned, and the current content stays live. Reloads of one store
    /// run one at a time, and each records the file's modification time
    /// before reading so a poll does not reload the same content again.
    pub async fn reload(&self) -> Result<()> {
        let path = self.source.as_deref().ok_or(ConfigError::NoSource)?;
        let _reloading = self.reload_lock.lock().await;
        self.touch_modified().await;

        let map = match self.read_document(path).await {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "Config reload failed, keeping current configuration");
                self.listeners.emit(ConfigEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        self.install(map);
        info!(path = %path.display(), "Config file reloaded");
        self.listeners.emit(ConfigEvent::Reload);
        self.refresh_sub_views();
        self.retune_watcher();
        Ok(())
    }

    async fn read_document(&self, path: &Path) -> Result<ConfigMap> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        parse_document(path, &text, self.parser.as_ref())
    }

    /// Stat the backing file and reload if its modification time changed.
    ///
    /// A failed stat skips this check; the file may be mid-replace.
    /// Returns `true` only when a reload ran and succeeded.
    pub async fn check(&self) -> bool {
        let Some(path) = self.source.as_deref() else {
            return false;
        };

        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Config stat failed, skipping check");
                return false;
            }
        };

        {
            let mut last = lock(&self.last_modified);
            if *last == Some(modified) {
                return false;
            }
            *last = Some(modified);
        }

        debug!(path = %path.display(), "Config file modification detected");
        self.reload().await.is_ok()
    }

    /// Record the backing file's current modification time, if it can be read.
    async fn touch_modified(&self) {
        if let Some(path) = self.source.as_deref()
            && let Ok(modified) = tokio::fs::metadata(path).await.and_then(|m| m.modified())
        {
            *lock(&self.last_modified) = Some(modified);
        }
    }

    /// Poll interval requested by the loaded config, if any.
    ///
    /// Only positive integer millisecond values count.
    pub fn check_frequency(&self) -> Option<Duration> {
        self.data
            .load()
            .get(FREQUENCY_KEY)
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Give every sub-view its new slice of this store, depth first.
    fn refresh_sub_views(&self) {
        let children: Vec<(String, Arc<ConfigStore>)> = lock(&self.children)
            .iter()
            .map(|(key, child)| (key.clone(), Arc::clone(child)))
            .collect();
        if children.is_empty() {
            return;
        }

        let data = self.data.load_full();
        for (key, child) in children {
            {
                let _guard = lock(&child.write_lock);
                child.data.store(Arc::new(map_or_empty(data.get(&key))));
            }
            debug!(key = %key, "Refreshed config sub-view");
            child.listeners.emit(ConfigEvent::Reload);
            child.refresh_sub_views();
        }
    }

    /// Restart polling at the config's interval if it differs from the
    /// running one.
    fn retune_watcher(&self) {
        let Some(frequency) = self.check_frequency() else {
            return;
        };
        if let Some(handle) = lock(&self.watch).as_ref()
            && handle.set_frequency(frequency)
        {
            info!(
                interval_ms = frequency.as_millis() as u64,
                "Config poll interval changed, restarting watcher"
            );
        }
    }
}
