//! Watch subcommand for live-config CLI
//!
//! Keeps the config loaded and prints it again after every successful
//! reload. Reload failures are printed to stderr and the previous config
//! stays in effect.

use super::SourceArgs;
use crate::watcher::{DEFAULT_DEBOUNCE, WatchStrategy};
use clap::Args;
use std::time::Duration;

/// Arguments for the watch subcommand
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Poll interval in milliseconds (the file's check_config_freq_ms wins)
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    pub interval_ms: u64,

    /// Use OS file notifications instead of polling
    #[arg(long)]
    pub notify: bool,

    /// Debounce window for notifications, in milliseconds
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,
}

impl WatchArgs {
    /// Watch strategy selected by the flags.
    pub fn strategy(&self) -> WatchStrategy {
        if self.notify {
            WatchStrategy::Notify {
                debounce: self
                    .debounce_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_DEBOUNCE),
            }
        } else {
            WatchStrategy::poll(Duration::from_millis(self.interval_ms.max(1)))
        }
    }
}
