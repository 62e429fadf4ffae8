//! Error types for config loading, reloading and watching.

use crate::parser::ParseError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a config store.
///
/// At construction these are returned to the caller. During a live watch
/// cycle they are reported through the store's `Error` event instead, and
/// the previous content stays in place.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file: {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file contents could not be parsed.
    #[error("Failed to parse config file: {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The config file parsed, but its top level is not a mapping.
    #[error("Config file does not contain an object at the top level: {}", .path.display())]
    NotAnObject { path: PathBuf },

    /// The store has no backing file to load from.
    #[error("Config store has no backing file")]
    NoSource,

    /// The file watcher could not be started.
    #[error("Failed to watch config file: {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// A poll interval or debounce window of zero was requested.
    #[error("Config watch interval must be greater than zero")]
    ZeroInterval,

    /// File watching was requested outside a Tokio runtime.
    #[error("Watching a config file requires a running Tokio runtime")]
    NoRuntime,

    /// No hostname could be determined by any method.
    #[error("Failed to determine server hostname: {0}")]
    Hostname(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
