//! CLI command definitions for live-config
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod watch;

use crate::overrides::ArgOverrides;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use watch::WatchArgs;

/// Inspect and watch live-reloading JSON config files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the config, or the value at a path
    Show(SourceArgs),

    /// Print the config every time the file changes, until interrupted
    Watch(WatchArgs),

    /// Print the discovered hostname and IP address
    Env,
}

/// Config file, optional path, and trailing overrides.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Config file to load
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Path to print instead of the whole config (e.g. db.host or db/host)
    #[arg(value_name = "PATH")]
    pub path: Option<String>,

    /// Overrides as `--key value` pairs, given after `--`
    #[arg(last = true, value_name = "OVERRIDES")]
    pub overrides: Vec<String>,
}

impl SourceArgs {
    /// Parse the trailing arguments into an override source.
    pub fn override_source(&self) -> ArgOverrides {
        ArgOverrides::from_args(self.overrides.iter().cloned())
    }
}
