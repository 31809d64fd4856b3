use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::Value;

use kvstore::cli::{Cli, Command, default_dir};
use kvstore::{ChangeOrigin, KvStore, watcher};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let dir = cli.dir.unwrap_or_else(default_dir);
    let store = KvStore::open(&dir).context(format!("Failed to open store at {}", dir.display()))?;

    info!("kv using {}", dir.display());

    match cli.command {
        Command::Get { key } => match store.read::<Value>(&key)? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => {
                eprintln!("{} not set", key.yellow());
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            let parsed = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            store.set(&key, &parsed)?;
            println!("{} {}", "✓".green(), key.cyan());
        }
        Command::Rm { key } => {
            if store.remove(&key)? {
                println!("{} Removed {}", "✓".green(), key.cyan());
            } else {
                println!("{} not set", key);
            }
        }
        Command::Keys => {
            let keys = store.keys()?;
            if keys.is_empty() {
                println!("No keys found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        Command::Watch => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(watch(Arc::new(store)));
        }
    }

    Ok(())
}

async fn watch(store: Arc<KvStore>) {
    let mut rx = store.subscribe();
    let _watcher = watcher::spawn_watcher(Arc::clone(&store), watcher::DEFAULT_POLL_INTERVAL);
    println!("Watching {} (Ctrl+C to stop)", store.dir().display());

    loop {
        tokio::select! {
            change = rx.recv() => match change {
                Ok(change) => {
                    let origin = match change.origin {
                        ChangeOrigin::Local => "local".dimmed(),
                        ChangeOrigin::External => "external".dimmed(),
                    };
                    match change.value {
                        Some(value) => println!("{} {} = {}", origin, change.key.cyan(), value),
                        None => println!("{} {} removed", origin, change.key.cyan()),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("{} missed {} changes", "!".yellow(), n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}
