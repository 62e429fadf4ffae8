//! Integration tests for loading and reloading config files.
//!
//! Covers:
//! - construction failures (missing / malformed file)
//! - override precedence across reloads
//! - sub-view refresh and event counts
//! - failed reloads keeping the previous content

use live_config::{
    ArgOverrides, ConfigError, ConfigEvent, ConfigStore, EventKind, Lookup, YamlParser,
};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Write `content` to `config.json` in a fresh temp dir.
fn config_file(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

fn counter(store: &ConfigStore, kind: EventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    store.on(kind, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[test]
fn test_missing_file_fails_construction() {
    let dir = TempDir::new().unwrap();
    let err = ConfigStore::from_file(dir.path().join("absent.json"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_file_fails_construction() {
    let (_dir, path) = config_file("{\"a\": ");
    let err = ConfigStore::from_file(&path).build().unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.json"));
}

#[test]
fn test_initial_load_applies_overrides() {
    let (_dir, path) = config_file(r#"{"x": 1, "db": {"host": "a", "port": 5432}}"#);
    let overrides = Arc::new(ArgOverrides::from_args(["--x", "2", "--db/host", "b"]));
    let store = ConfigStore::from_file(&path)
        .overrides(overrides)
        .build()
        .unwrap();

    assert_eq!(store.get("x"), Lookup::Found(json!(2)));
    assert_eq!(store.get_path("db.host"), Lookup::Found(json!("b")));
    assert_eq!(store.get_path("db.port"), Lookup::Found(json!(5432)));
    assert_eq!(store.source_path(), Some(path.as_path()));
    assert!(store.last_modified().is_some());
}

#[tokio::test]
async fn test_override_survives_reload() {
    let (_dir, path) = config_file(r#"{"x": 1}"#);
    let overrides = Arc::new(ArgOverrides::from_args(["--x", "2"]));
    let store = ConfigStore::from_file(&path)
        .overrides(overrides)
        .build()
        .unwrap();
    assert_eq!(store.get("x"), Lookup::Found(json!(2)));

    std::fs::write(&path, r#"{"x": 3, "y": 4}"#).unwrap();
    store.reload().await.unwrap();

    assert_eq!(store.get("x"), Lookup::Found(json!(2)));
    assert_eq!(store.get("y"), Lookup::Found(json!(4)));
}

#[tokio::test]
async fn test_set_survives_reload_with_overrides() {
    let (_dir, path) = config_file(r#"{"mode": "file"}"#);
    let store = ConfigStore::from_file(&path)
        .overrides(Arc::new(ArgOverrides::new()))
        .build()
        .unwrap();

    store.set("mode", json!("runtime"));
    std::fs::write(&path, r#"{"mode": "edited"}"#).unwrap();
    store.reload().await.unwrap();

    assert_eq!(store.get("mode"), Lookup::Found(json!("runtime")));
}

#[tokio::test]
async fn test_set_without_overrides_is_replaced_by_reload() {
    let (_dir, path) = config_file(r#"{"mode": "file"}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();

    store.set("mode", json!("runtime"));
    store.reload().await.unwrap();

    assert_eq!(store.get("mode"), Lookup::Found(json!("file")));
}

#[tokio::test]
async fn test_unchanged_reload_is_idempotent() {
    let (_dir, path) = config_file(r#"{"a": [1, 2], "b": {"c": null}}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let reloads = counter(&store, EventKind::Reload);

    let before = store.all();
    store.reload().await.unwrap();
    let after = store.all();

    assert_eq!(reloads.load(Ordering::SeqCst), 1);
    assert_eq!(*before, *after);
    assert!(!Arc::ptr_eq(&before, &after));
}

#[tokio::test]
async fn test_sub_view_follows_parent_reload() {
    let (_dir, path) = config_file(r#"{"db": {"host": "a"}}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let sub = store.sub_view("db");
    let sub_reloads = counter(&sub, EventKind::Reload);
    assert_eq!(sub.get("host"), Lookup::Found(json!("a")));

    std::fs::write(&path, r#"{"db": {"host": "b"}}"#).unwrap();
    store.reload().await.unwrap();
    assert_eq!(sub.get("host"), Lookup::Found(json!("b")));
    assert_eq!(sub_reloads.load(Ordering::SeqCst), 1);

    store.reload().await.unwrap();
    assert_eq!(sub_reloads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_nested_sub_views_refresh_recursively() {
    let (_dir, path) = config_file(r#"{"svc": {"db": {"host": "a"}}}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let svc = store.sub_view("svc");
    let db = svc.sub_view("db");
    let db_reloads = counter(&db, EventKind::Reload);

    std::fs::write(&path, r#"{"svc": {"db": {"host": "c"}}}"#).unwrap();
    store.reload().await.unwrap();

    assert_eq!(db.get("host"), Lookup::Found(json!("c")));
    assert_eq!(db_reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sub_view_of_removed_key_becomes_empty() {
    let (_dir, path) = config_file(r#"{"db": {"host": "a"}}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let sub = store.sub_view("db");

    std::fs::write(&path, r#"{"other": 1}"#).unwrap();
    store.reload().await.unwrap();

    assert!(sub.all().is_empty());
    assert_eq!(sub.get("host"), Lookup::Missing);
}

#[tokio::test]
async fn test_parent_event_fires_before_sub_view_refresh() {
    let (_dir, path) = config_file(r#"{"db": {"host": "a"}}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let sub = store.sub_view("db");

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (parent_seen, weak_store, weak_sub) =
        (Arc::clone(&seen), Arc::downgrade(&store), Arc::downgrade(&sub));
    store.on(EventKind::Reload, move |_| {
        let (Some(store), Some(sub)) = (weak_store.upgrade(), weak_sub.upgrade()) else {
            return;
        };
        parent_seen
            .lock()
            .unwrap()
            .push((store.get_path("db.host"), sub.get("host")));
    });

    std::fs::write(&path, r#"{"db": {"host": "b"}}"#).unwrap();
    store.reload().await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![(Lookup::Found(json!("b")), Lookup::Found(json!("a")))]
    );
}

#[tokio::test]
async fn test_malformed_reload_keeps_previous_content() {
    let (_dir, path) = config_file(r#"{"a": 1}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let mut events = store.subscribe();
    let reloads = counter(&store, EventKind::Reload);

    std::fs::write(&path, "{ not json").unwrap();
    let err = store.reload().await.unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));

    match events.try_recv().unwrap() {
        ConfigEvent::Error(message) => {
            assert!(message.starts_with("Failed to parse config file"));
            assert!(message.contains("config.json"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert_eq!(reloads.load(Ordering::SeqCst), 0);
    assert_eq!(Value::Object((*store.all()).clone()), json!({"a": 1}));

    // The next good write is picked up again.
    std::fs::write(&path, r#"{"a": 2}"#).unwrap();
    store.reload().await.unwrap();
    assert_eq!(store.get("a"), Lookup::Found(json!(2)));
    assert_eq!(events.try_recv().unwrap(), ConfigEvent::Reload);
}

#[tokio::test]
async fn test_deleted_file_reload_emits_error() {
    let (_dir, path) = config_file(r#"{"a": 1}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let errors = counter(&store, EventKind::Error);

    std::fs::remove_file(&path).unwrap();
    assert!(matches!(
        store.reload().await,
        Err(ConfigError::Read { .. })
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("a"), Lookup::Found(json!(1)));

    // A failed stat during a poll check is skipped silently.
    assert!(!store.check().await);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_check_reloads_only_on_mtime_change() {
    let (_dir, path) = config_file(r#"{"a": 1}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let reloads = counter(&store, EventKind::Reload);

    assert!(!store.check().await);
    assert_eq!(reloads.load(Ordering::SeqCst), 0);

    std::fs::write(&path, r#"{"a": 2}"#).unwrap();
    let later = store.last_modified().unwrap() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    assert!(store.check().await);
    assert_eq!(store.get("a"), Lookup::Found(json!(2)));
    assert_eq!(store.last_modified(), Some(later));
    assert!(!store.check().await);
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_yaml_parser() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "db:\n  host: a\nworkers: 4\n").unwrap();

    let store = ConfigStore::from_file(&path)
        .parser(YamlParser)
        .build()
        .unwrap();
    assert_eq!(store.get_path("db/host"), Lookup::Found(json!("a")));
    assert_eq!(store.get_as::<u32>("workers").unwrap(), Some(4));
}

#[test]
fn test_non_object_file_fails_construction() {
    let (_dir, path) = config_file("42");
    assert!(matches!(
        ConfigStore::from_file(&path).build(),
        Err(ConfigError::NotAnObject { .. })
    ));
}

#[tokio::test]
async fn test_reload_records_modification_time() {
    let (_dir, path) = config_file(r#"{"a": 1}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let reloads = counter(&store, EventKind::Reload);

    std::fs::write(&path, r#"{"a": 2}"#).unwrap();
    let later = store.last_modified().unwrap() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    store.reload().await.unwrap();
    assert_eq!(store.last_modified(), Some(later));

    // A poll after a direct reload finds nothing new.
    assert!(!store.check().await);
    assert_eq!(reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_reloads_install_latest_content() {
    let (dir, path) = config_file(r#"{"a": 0}"#);
    let store = ConfigStore::from_file(&path).build().unwrap();
    let reloads = counter(&store, EventKind::Reload);

    // Rename into place so a concurrent read never sees a half-written file.
    let staged = dir.path().join("config.json.tmp");
    let mut tasks = Vec::new();
    for n in 1..=8 {
        std::fs::write(&staged, format!(r#"{{"a": {n}}}"#)).unwrap();
        std::fs::rename(&staged, &path).unwrap();
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move { store.reload().await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(reloads.load(Ordering::SeqCst), 8);
    assert_eq!(store.get("a"), Lookup::Found(json!(8)));
}
