//! live-config command-line tool
//!
//! Loads a config file with overrides, prints it or a single path, and can
//! keep watching it for changes.

use anyhow::{Context, Result};
use clap::Parser;
use live_config::cli::{Cli, Command, SourceArgs, watch::WatchArgs};
use live_config::logging::{self, LogTarget};
use live_config::{ConfigEvent, ConfigMap, ConfigStore, Lookup, StoreBuilder};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    match cli.command {
        Command::Show(args) => run_show(&args),
        Command::Watch(args) => run_watch(args).await,
        Command::Env => run_env().await,
    }
}

fn builder(args: &SourceArgs) -> StoreBuilder {
    ConfigStore::from_file(&args.file).overrides(Arc::new(args.override_source()))
}

/// Print the whole config, or the value at `path`.
fn print_config(store: &ConfigStore, path: Option<&str>) -> Result<()> {
    let value = match path {
        None => Value::Object(ConfigMap::clone(&store.all())),
        Some(path) => match store.get_path(path) {
            Lookup::Found(value) => value,
            Lookup::Null => Value::Null,
            Lookup::Missing => anyhow::bail!("No value at path: {path}"),
        },
    };
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn run_show(args: &SourceArgs) -> Result<()> {
    let store = builder(args)
        .build()
        .with_context(|| format!("Failed to load {}", args.file.display()))?;
    print_config(&store, args.path.as_deref())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let strategy = args.strategy();
    let source = &args.source;
    let store = builder(source)
        .watch(strategy)
        .build()
        .with_context(|| format!("Failed to load {}", source.file.display()))?;

    info!(
        path = %source.file.display(),
        strategy = ?store.watch_strategy(),
        "Watching config file"
    );
    print_config(&store, source.path.as_deref())?;

    let mut events = store.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConfigEvent::Reload) => {
                    if let Err(err) = print_config(&store, source.path.as_deref()) {
                        eprintln!("{err}");
                    }
                }
                Ok(ConfigEvent::Error(message)) => eprintln!("{message}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped config events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping watcher");
                break;
            }
        }
    }

    store.stop();
    Ok(())
}

async fn run_env() -> Result<()> {
    let store = ConfigStore::from_map(Default::default()).build()?;
    let env = store.get_env().await?;
    println!("{}", serde_json::to_string_pretty(&env)?);
    Ok(())
}
