//! Config value types.
//!
//! Config content is plain JSON, so values are `serde_json::Value` and the
//! backing mapping of every store is a `serde_json::Map`. Key order follows
//! the source file (`preserve_order`).

use serde_json::{Map, Value};

/// A string-keyed mapping of config values.
pub type ConfigMap = Map<String, Value>;

/// Result of looking up a key or path.
///
/// Keeps "the key is there but holds null" apart from "nothing is there".
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A non-null value was found.
    Found(Value),
    /// The key exists and its value is `null`.
    Null,
    /// No value at this location.
    Missing,
}

impl Lookup {
    /// Build a lookup result from an optional borrowed value.
    pub fn from_option(value: Option<&Value>) -> Self {
        match value {
            None => Lookup::Missing,
            Some(Value::Null) => Lookup::Null,
            Some(v) => Lookup::Found(v.clone()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    /// Borrow the found value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to an optional value, mapping `Null` to `Some(Value::Null)`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Null => Some(Value::Null),
            Lookup::Missing => None,
        }
    }
}

/// Return the mapping held by `value`, or an empty one for anything else.
pub fn map_or_empty(value: Option<&Value>) -> ConfigMap {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => ConfigMap::new(),
    }
}
