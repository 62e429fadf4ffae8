//! Integration tests for file watching.
//!
//! Polling tests bump the file's modification time explicitly so they do not
//! depend on filesystem timestamp granularity.

use live_config::{ConfigEvent, ConfigStore, Lookup, WatchStrategy};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config_file(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

/// Rewrite the file and push its mtime forward so a poll always sees it.
fn rewrite(path: &Path, content: &str, bump: u64) {
    std::fs::write(path, content).unwrap();
    let modified = SystemTime::now() + Duration::from_secs(bump);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

async fn next_event(events: &mut broadcast::Receiver<ConfigEvent>) -> ConfigEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for config event")
        .expect("event channel closed")
}

/// Wait for a `Reload` after which `x` holds `expected`.
async fn reloaded_to(
    events: &mut broadcast::Receiver<ConfigEvent>,
    store: &ConfigStore,
    expected: i64,
) {
    loop {
        if next_event(events).await == ConfigEvent::Reload
            && store.get("x") == Lookup::Found(json!(expected))
        {
            return;
        }
    }
}

fn notify_store(path: &Path) -> std::sync::Arc<ConfigStore> {
    ConfigStore::from_file(path)
        .watch(WatchStrategy::Notify {
            debounce: Duration::from_millis(50),
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_poll_watcher_reloads_on_change() {
    let (_dir, path) = config_file(r#"{"x": 1}"#);
    let store = ConfigStore::from_file(&path)
        .watch(WatchStrategy::poll(Duration::from_millis(20)))
        .build()
        .unwrap();
    let sub = store.sub_view("nested");
    let mut events = store.subscribe();
    let mut sub_events = sub.subscribe();

    rewrite(&path, r#"{"x": 2, "nested": {"y": true}}"#, 5);

    assert_eq!(next_event(&mut events).await, ConfigEvent::Reload);
    assert_eq!(store.get("x"), Lookup::Found(json!(2)));
    assert_eq!(next_event(&mut sub_events).await, ConfigEvent::Reload);
    assert_eq!(sub.get("y"), Lookup::Found(json!(true)));
}

#[tokio::test]
async fn test_poll_watcher_reports_malformed_file() {
    let (_dir, path) = config_file(r#"{"x": 1}"#);
    let store = ConfigStore::from_file(&path)
        .watch(WatchStrategy::poll(Duration::from_millis(20)))
        .build()
        .unwrap();
    let mut events = store.subscribe();

    rewrite(&path, "{ broken", 5);
    assert!(matches!(next_event(&mut events).await, ConfigEvent::Error(_)));
    assert_eq!(store.get("x"), Lookup::Found(json!(1)));

    // Fixing the file is picked up on a later cycle.
    rewrite(&path, r#"{"x": 3}"#, 10);
    assert_eq!(next_event(&mut events).await, ConfigEvent::Reload);
    assert_eq!(store.get("x"), Lookup::Found(json!(3)));
}

#[tokio::test]
async fn test_config_frequency_sets_and_retunes_poll_interval() {
    let (_dir, path) = config_file(r#"{"check_config_freq_ms": 20}"#);
    let store = ConfigStore::from_file(&path)
        .watch(WatchStrategy::poll(Duration::from_secs(60)))
        .build()
        .unwrap();
    assert_eq!(
        store.watch_strategy(),
        Some(WatchStrategy::poll(Duration::from_millis(20)))
    );

    let mut events = store.subscribe();
    rewrite(&path, r#"{"check_config_freq_ms": 30, "v": 1}"#, 5);
    assert_eq!(next_event(&mut events).await, ConfigEvent::Reload);

    timeout(WAIT, async {
        while store.watch_strategy() != Some(WatchStrategy::poll(Duration::from_millis(30))) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poll interval was not updated");

    // The restarted timer keeps polling.
    rewrite(&path, r#"{"check_config_freq_ms": 30, "v": 2}"#, 10);
    assert_eq!(next_event(&mut events).await, ConfigEvent::Reload);
    assert_eq!(store.get("v"), Lookup::Found(json!(2)));
}

#[tokio::test]
async fn test_stop_ends_watching() {
    let (_dir, path) = config_file(r#"{"x": 1}"#);
    let store = ConfigStore::from_file(&path)
        .watch(WatchStrategy::poll(Duration::from_millis(20)))
        .build()
        .unwrap();
    store.stop();
    assert!(store.watch_strategy().is_none());

    rewrite(&path, r#"{"x": 2}"#, 5);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.get("x"), Lookup::Found(json!(1)));
}

#[tokio::test]
async fn test_notify_watcher_survives_atomic_replace() {
    let (dir, path) = config_file(r#"{"x": 1}"#);
    let store = notify_store(&path);
    let mut events = store.subscribe();

    // In-place write.
    std::fs::write(&path, r#"{"x": 2}"#).unwrap();
    reloaded_to(&mut events, &store, 2).await;

    // Replace by rename, as editors doing atomic saves do.
    let staged = dir.path().join("config.json.tmp");
    std::fs::write(&staged, r#"{"x": 3}"#).unwrap();
    std::fs::rename(&staged, &path).unwrap();
    reloaded_to(&mut events, &store, 3).await;

    // The re-registered watch still sees later writes.
    std::fs::write(&path, r#"{"x": 4}"#).unwrap();
    reloaded_to(&mut events, &store, 4).await;
}

#[tokio::test]
async fn test_notify_watcher_survives_missing_file() {
    let (_dir, path) = config_file(r#"{"x": 1}"#);
    let store = notify_store(&path);
    let mut events = store.subscribe();

    std::fs::remove_file(&path).unwrap();
    loop {
        if let ConfigEvent::Error(message) = next_event(&mut events).await {
            assert!(message.contains("config.json"));
            break;
        }
    }
    assert_eq!(store.get("x"), Lookup::Found(json!(1)));

    // Stay absent well past several debounce windows before coming back.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(store.watch_strategy().is_some());

    std::fs::write(&path, r#"{"x": 2}"#).unwrap();
    reloaded_to(&mut events, &store, 2).await;
}

#[tokio::test]
async fn test_notify_watcher_ignores_sibling_files() {
    let (dir, path) = config_file(r#"{"x": 1}"#);
    let store = notify_store(&path);
    let mut events = store.subscribe();

    std::fs::write(dir.path().join("other.json"), "not json at all").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());

    std::fs::write(&path, r#"{"x": 5}"#).unwrap();
    reloaded_to(&mut events, &store, 5).await;
}
