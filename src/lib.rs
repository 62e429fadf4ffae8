//! Live-reloading hierarchical config store.
//!
//! Loads a JSON document from disk, layers command-line overrides on top,
//! offers path-addressed reads and writes, and keeps the content and any
//! derived sub-views current as the file changes on disk.
//!
//! ```no_run
//! use live_config::{ArgOverrides, ConfigStore, Lookup, WatchStrategy};
//! use std::sync::Arc;
//!
//! # async fn example() -> live_config::Result<()> {
//! let overrides = Arc::new(ArgOverrides::from_args(std::env::args().skip(1)));
//! let config = ConfigStore::from_file("config.json")
//!     .overrides(overrides)
//!     .watch(WatchStrategy::default())
//!     .build()?;
//!
//! let db = config.sub_view("db");
//! if let Lookup::Found(host) = db.get("host") {
//!     println!("db host: {host}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod env;
pub mod error;
pub mod events;
pub mod logging;
pub mod overrides;
pub mod parser;
pub mod path;
pub mod store;
pub mod value;
pub mod watcher;

pub use env::{HostProbe, ServerEnv, SystemProbe};
pub use error::{ConfigError, Result};
pub use events::{ConfigEvent, EventKind, ListenerId};
pub use overrides::{ArgOverrides, OverrideSource};
pub use parser::{ConfigParser, JsonParser, YamlParser};
pub use path::PathError;
pub use store::{ConfigStore, FREQUENCY_KEY, StoreBuilder};
pub use value::{ConfigMap, Lookup};
pub use watcher::WatchStrategy;
