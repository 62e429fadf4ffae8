//! Override sources.
//!
//! Overrides are path/value pairs supplied outside the config file, normally
//! from the command line. The store re-reads the whole set after every load
//! and writes each entry over the freshly parsed file content, so overrides
//! always win and survive reloads.

use crate::value::ConfigMap;
use serde_json::{Number, Value};
use std::sync::{Mutex, PoisonError};

/// Provider of config overrides.
pub trait OverrideSource: Send + Sync {
    /// Snapshot of every override, in the order they should be applied.
    fn all_overrides(&self) -> Vec<(String, Value)>;

    /// Record an override so a later reload re-applies it.
    fn set_override(&self, path: &str, value: Value);
}

/// Overrides parsed from `--key value` command-line arguments.
///
/// Keys use the same path grammar as the store, so `--db.host x` overrides
/// `db.host`. Values set later through [`OverrideSource::set_override`] are
/// kept alongside the parsed ones.
#[derive(Debug, Default)]
pub struct ArgOverrides {
    values: Mutex<ConfigMap>,
}

impl ArgOverrides {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse overrides from command-line style arguments.
    ///
    /// - `--key value` sets `key` to `value`
    /// - `--flag` followed by another flag (or nothing) sets `flag` to `true`
    /// - `true`/`false` become booleans and numeric text becomes a number
    /// - arguments not attached to a flag are ignored
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = ConfigMap::new();
        let mut pending: Option<String> = None;

        for arg in args.into_iter().map(Into::into) {
            if let Some(key) = flag_name(&arg) {
                if let Some(flag) = pending.take() {
                    values.insert(flag, Value::Bool(true));
                }
                pending = Some(key.to_string());
            } else if let Some(key) = pending.take() {
                values.insert(key, coerce(&arg));
            }
        }
        if let Some(flag) = pending {
            values.insert(flag, Value::Bool(true));
        }

        Self {
            values: Mutex::new(values),
        }
    }

    /// Create an override set from an existing mapping of path → value.
    pub fn from_map(values: ConfigMap) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    /// Get a single override by its path key.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.lock().get(path).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConfigMap> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OverrideSource for ArgOverrides {
    fn all_overrides(&self) -> Vec<(String, Value)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn set_override(&self, path: &str, value: Value) {
        self.lock().insert(path.to_string(), value);
    }
}

/// Return the key of a `--key` / `-key` argument.
///
/// Negative numbers such as `-5` are values, not flags.
fn flag_name(arg: &str) -> Option<&str> {
    let key = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    if key.is_empty() || key.parse::<f64>().is_ok() {
        return None;
    }
    Some(key)
}

/// Convert an argument string to the most specific JSON value.
fn coerce(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}
