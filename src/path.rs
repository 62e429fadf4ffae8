//! Path addressing into nested config mappings.
//!
//! A path is a list of keys joined by `.` or `/`, so `db.host` and `db/host`
//! name the same value. A backslash before either delimiter keeps it inside
//! the key: `a\.b` is the single top-level key `a.b`.
//!
//! Empty segments (leading, trailing or doubled delimiters) are skipped.

use crate::value::{ConfigMap, Lookup};
use serde_json::Value;
use thiserror::Error;

// Stand-ins for escaped delimiters while a path string is split. They are
// only substituted into caller-supplied path strings, which do not contain
// NUL, and are restored before a segment is used as a key.
const DOT_SENTINEL: &str = "\u{0}DOT\u{0}";
const SLASH_SENTINEL: &str = "\u{0}SLASH\u{0}";

/// Errors from writing a value at a path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// An intermediate segment holds a value that is not a mapping.
    #[error("path '{path}' is blocked by non-container value at '{segment}'")]
    Blocked { path: String, segment: String },

    /// The path has no non-empty segments.
    #[error("path '{0}' has no segments")]
    Empty(String),
}

/// Split a path into its key segments, honouring `\.` and `\/` escapes.
pub fn split_path(path: &str) -> Vec<String> {
    path.replace("\\.", DOT_SENTINEL)
        .replace("\\/", SLASH_SENTINEL)
        .split(['.', '/'])
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace(DOT_SENTINEL, ".").replace(SLASH_SENTINEL, "/"))
        .collect()
}

/// Escape the delimiters in `key` so it reads back as a single segment.
pub fn escape_segment(key: &str) -> String {
    key.replace('.', "\\.").replace('/', "\\/")
}

/// Borrow the value at `path`, or `None` when the path does not resolve.
///
/// Traversal stops with `None` as soon as an intermediate value is not a
/// mapping.
pub fn lookup<'a>(map: &'a ConfigMap, path: &str) -> Option<&'a Value> {
    let segments = split_path(path);
    let (last, parents) = segments.split_last()?;

    let mut target = map;
    for segment in parents {
        target = target.get(segment)?.as_object()?;
    }
    target.get(last)
}

/// Look up the value at `path`.
pub fn get_path(map: &ConfigMap, path: &str) -> Lookup {
    Lookup::from_option(lookup(map, path))
}

/// Write `value` at `path`, creating empty mappings for missing intermediate
/// segments.
///
/// Fails without touching `map` when an existing intermediate value is not a
/// mapping. Missing segments can only appear after the last existing one, so
/// a blocked write never leaves freshly created mappings behind.
pub fn set_path(map: &mut ConfigMap, path: &str, value: Value) -> Result<(), PathError> {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::Empty(path.to_string()));
    };

    let mut target = map;
    for segment in parents {
        let entry = target
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(ConfigMap::new()));
        match entry {
            Value::Object(next) => target = next,
            _ => {
                return Err(PathError::Blocked {
                    path: path.to_string(),
                    segment: segment.clone(),
                });
            }
        }
    }

    target.insert(last.clone(), value);
    Ok(())
}
