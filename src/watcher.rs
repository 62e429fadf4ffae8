//! File watcher for config hot reload.
//!
//! Two strategies:
//! - **Poll**: stat the file on a fixed interval and reload when its
//!   modification time changes. Failed stats are skipped.
//! - **Notify**: subscribe to OS notifications (debounced) on the directory
//!   holding the file and react to events naming the file. Watching the
//!   directory keeps deletes, re-creates and replace-by-rename visible. After
//!   every notification the watch is dropped and re-registered.
//!
//! The watcher task holds only a weak reference to its store, so dropping
//! the last store handle ends the task.

use crate::error::{ConfigError, Result};
use crate::events::ConfigEvent;
use crate::store::ConfigStore;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default debounce window for notify events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// How many times to retry re-registering a notify watch per notification.
const REARM_ATTEMPTS: u32 = 5;

/// How the backing file is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStrategy {
    /// Stat the file every `interval`.
    Poll { interval: Duration },
    /// OS notifications, coalesced over `debounce`.
    Notify { debounce: Duration },
}

impl WatchStrategy {
    /// Polling at the given interval.
    pub fn poll(interval: Duration) -> Self {
        WatchStrategy::Poll { interval }
    }

    /// OS notifications with the default debounce window.
    pub fn notify() -> Self {
        WatchStrategy::Notify {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl Default for WatchStrategy {
    fn default() -> Self {
        WatchStrategy::poll(DEFAULT_POLL_INTERVAL)
    }
}

/// Handle to a running watcher. Dropping it stops the watcher.
pub struct WatchHandle {
    strategy: WatchStrategy,
    /// Poll interval channel; `None` for notify watchers.
    frequency: Option<watch::Sender<Duration>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// The strategy in use, with the current poll interval.
    pub fn strategy(&self) -> WatchStrategy {
        match (&self.strategy, &self.frequency) {
            (WatchStrategy::Poll { .. }, Some(tx)) => WatchStrategy::Poll {
                interval: *tx.borrow(),
            },
            (strategy, _) => *strategy,
        }
    }

    /// Switch a poll watcher to a new interval.
    ///
    /// The poll loop drops its timer and starts a new one; old and new
    /// timers never run side by side. Returns `false` for notify watchers
    /// and when the interval is unchanged.
    pub(crate) fn set_frequency(&self, interval: Duration) -> bool {
        let Some(tx) = &self.frequency else {
            return false;
        };
        if *tx.borrow() == interval {
            return false;
        }
        tx.send_replace(interval);
        true
    }

    /// Stop the watcher.
    pub fn stop(self) {
        // Drop aborts the task.
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `path` for `store`.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn start(
    store: Weak<ConfigStore>,
    path: PathBuf,
    strategy: WatchStrategy,
) -> Result<WatchHandle> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

    match strategy {
        WatchStrategy::Poll { interval } => {
            let (tx, rx) = watch::channel(interval);
            info!(
                path = %path.display(),
                interval_ms = interval.as_millis() as u64,
                "Config poll watcher started"
            );
            let task = runtime.spawn(poll_loop(store, rx));
            Ok(WatchHandle {
                strategy,
                frequency: Some(tx),
                task,
            })
        }
        WatchStrategy::Notify { debounce } => {
            let watch_error = |source| ConfigError::Watch {
                path: path.clone(),
                source,
            };
            let (dir, file_name) = watch_target(&path).ok_or_else(|| {
                watch_error(notify::Error::generic("config path has no file name"))
            })?;

            let (tx, rx) = mpsc::unbounded_channel();
            let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
                // Receiver gone means the watcher is shutting down.
                let _ = tx.send(result);
            })
            .map_err(watch_error)?;
            debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(watch_error)?;

            info!(path = %path.display(), dir = %dir.display(), "Config notify watcher started");
            let target = NotifyTarget {
                path,
                dir,
                file_name,
            };
            let task = runtime.spawn(notify_loop(store, target, debouncer, rx, debounce));
            Ok(WatchHandle {
                strategy,
                frequency: None,
                task,
            })
        }
    }
}

/// Build a poll timer whose first tick is one interval from now.
fn poll_timer(interval: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn poll_loop(store: Weak<ConfigStore>, mut frequency: watch::Receiver<Duration>) {
    let mut timer = poll_timer(*frequency.borrow_and_update());

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.check().await;
            }
            changed = frequency.changed() => {
                if changed.is_err() {
                    break;
                }
                let interval = *frequency.borrow_and_update();
                debug!(interval_ms = interval.as_millis() as u64, "Restarting config poll timer");
                timer = poll_timer(interval);
            }
        }
    }

    debug!("Config poll watcher stopped");
}

/// What a notify watcher listens to: the directory holding the config file,
/// filtered to events on the file's name.
struct NotifyTarget {
    path: PathBuf,
    dir: PathBuf,
    file_name: OsString,
}

/// Directory to watch and file name to filter on for `path`.
fn watch_target(path: &Path) -> Option<(PathBuf, OsString)> {
    let file_name = path.file_name()?.to_os_string();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((dir, file_name))
}

/// Whether any of `paths` is the file called `file_name`.
fn concerns_file<'a>(paths: impl IntoIterator<Item = &'a Path>, file_name: &OsStr) -> bool {
    paths
        .into_iter()
        .any(|path| path.file_name() == Some(file_name))
}

async fn notify_loop(
    store: Weak<ConfigStore>,
    target: NotifyTarget,
    mut debouncer: Debouncer<RecommendedWatcher>,
    mut events: mpsc::UnboundedReceiver<DebounceEventResult>,
    debounce: Duration,
) {
    while let Some(result) = events.recv().await {
        let Some(store) = store.upgrade() else {
            break;
        };

        let changed = match result {
            Ok(batch) => {
                let paths = batch.iter().map(|event| event.path.as_path());
                if !concerns_file(paths, &target.file_name) {
                    continue;
                }
                debug!(events = batch.len(), "Config file notification");
                true
            }
            Err(err) => {
                warn!(error = %err, "Config file watcher error");
                store.emit(ConfigEvent::Error(format!(
                    "File watcher error: {}: {}",
                    target.path.display(),
                    err
                )));
                false
            }
        };

        // The file may be missing right now; the directory watch still
        // reports it coming back, so a failed reload just waits for that.
        if !rearm(&mut debouncer, &target.dir, debounce).await {
            error!(dir = %target.dir.display(), "Could not re-register config directory watch");
            store.emit(ConfigEvent::Error(format!(
                "Failed to re-watch config directory: {}",
                target.dir.display()
            )));
        }

        if changed {
            // Failures are reported through the Error event.
            let _ = store.reload().await;
        }
    }

    debug!("Config notify watcher stopped");
}

/// Drop and re-register the watch on `dir`, retrying failed registrations
/// after a short wait.
async fn rearm(debouncer: &mut Debouncer<RecommendedWatcher>, dir: &Path, delay: Duration) -> bool {
    if let Err(err) = debouncer.watcher().unwatch(dir) {
        debug!(error = %err, "Config unwatch failed");
    }

    for attempt in 1..=REARM_ATTEMPTS {
        match debouncer.watcher().watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => return true,
            Err(err) => {
                debug!(attempt, error = %err, "Config re-watch failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
    false
}
