//! SharedNotes CLI - Command line interface for synced notes.
//!
//! This tool reads, writes and watches notes kept in a local store and
//! synchronized with a SharedNotes server.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sharednotes_common::Note;
use sharednotes_storage::HttpNoteApi;
use sharednotes_sync::{RemoteRead, SyncEngine};

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "sharednotes")]
#[command(about = "SharedNotes - Notes synced with a shared server")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Notes server URL (overrides the config file).
    #[arg(short, long)]
    server: Option<String>,

    /// SQLite database path (overrides the config file).
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a note once and print the local result.
    Get {
        /// Note name.
        name: String,

        /// How long to wait for the server, in milliseconds.
        #[arg(short, long, default_value = "1000")]
        timeout_ms: u64,
    },

    /// Store a note locally and push it to the server.
    Put {
        /// Note name.
        name: String,

        /// Note content (read from this file when --file is given).
        #[arg(required_unless_present = "file")]
        content: Option<String>,

        /// Read the content from a file.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Only store locally.
        #[arg(long)]
        local: bool,
    },

    /// Follow a note and print every update until interrupted.
    Watch {
        /// Note name.
        name: String,
    },

    /// List locally stored notes.
    List,

    /// Delete a note from the local store.
    Delete {
        /// Note name.
        name: String,
    },

    /// Show the effective configuration and local store summary.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    init_logging(cli.verbose)?;

    let config = CliConfig::load(cli.config.as_deref())?.with_overrides(cli.server, cli.db);

    match cli.command {
        Commands::Get { name, timeout_ms } => {
            cmd_get(&config, &name, Duration::from_millis(timeout_ms)).await
        }

        Commands::Put {
            name,
            content,
            file,
            local,
        } => cmd_put(&config, &name, content, file, local).await,

        Commands::Watch { name } => cmd_watch(&config, &name).await,

        Commands::List => cmd_list(&config).await,

        Commands::Delete { name } => cmd_delete(&config, &name).await,

        Commands::Status => cmd_status(&config).await,
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(false)
            .compact()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(verbose))
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn log_level(verbose: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Build an engine from the effective configuration.
fn open_engine(config: &CliConfig) -> Result<SyncEngine> {
    let store = config.open_store()?;
    let api = HttpNoteApi::new(&config.server_url)
        .with_context(|| format!("Invalid server URL {}", config.server_url))?;

    SyncEngine::new(store, Arc::new(api), config.sync.clone()).context("Invalid sync settings")
}

fn print_note(note: &Note) {
    println!("{} (v{})", note.name, note.version);
    println!("{}", note.content);
}

/// Read a note after one bounded fetch.
async fn cmd_get(config: &CliConfig, name: &str, timeout: Duration) -> Result<()> {
    let engine = open_engine(config)?;

    let read = engine
        .read_synced(name, timeout)
        .await
        .context("Failed to read note")?;

    match read.remote {
        RemoteRead::Applied => info!("Updated {} from the server", name),
        RemoteRead::Failed(e) => eprintln!("Server unavailable, showing local copy: {}", e),
        RemoteRead::Elapsed => eprintln!("Server did not answer in time, showing local copy"),
        RemoteRead::Discarded | RemoteRead::Absent => {}
    }

    match read.note {
        Some(note) => print_note(&note),
        None => anyhow::bail!("No note named {}", name),
    }

    Ok(())
}

/// Write a note locally, then push it.
async fn cmd_put(
    config: &CliConfig,
    name: &str,
    content: Option<String>,
    file: Option<PathBuf>,
    local: bool,
) -> Result<()> {
    let content = match (content, file) {
        (_, Some(file)) => tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?,
        (Some(content), None) => content,
        (None, None) => anyhow::bail!("No content given"),
    };

    let engine = open_engine(config)?;
    let note = Note::new(name, content);

    if local {
        let stored = engine
            .upsert_local(&note)
            .await
            .context("Failed to store note")?;
        println!("Stored {} locally", stored);
        return Ok(());
    }

    let stored = engine
        .write_and_sync(&note)
        .await
        .context("Stored locally, but the server did not accept the note")?;
    println!("Stored {} and pushed it to the server", stored);

    Ok(())
}

/// Print every update to a note until Ctrl-C.
async fn cmd_watch(config: &CliConfig, name: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let mut subscription = engine.subscribe(name).await?;

    match subscription.initial() {
        Some(note) => print_note(note),
        None => println!("{} is not stored locally yet", name),
    }

    loop {
        tokio::select! {
            update = subscription.next_update() => {
                match update {
                    Some(Some(note)) => print_note(&note),
                    Some(None) => println!("{} was deleted", name),
                    None => break,
                }
            }

            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// List notes in the local store.
async fn cmd_list(config: &CliConfig) -> Result<()> {
    let store = config.open_store()?;
    let notes = store.list().await.context("Failed to list notes")?;

    if notes.is_empty() {
        println!("No notes stored.");
    } else {
        for note in notes {
            println!("  {} (v{}, {} chars)", note.name, note.version, note.content.chars().count());
        }
    }

    Ok(())
}

/// Delete a note from the local store.
async fn cmd_delete(config: &CliConfig, name: &str) -> Result<()> {
    let store = config.open_store()?;

    if store.delete(name).await.context("Failed to delete note")? {
        println!("Deleted {}", name);
    } else {
        println!("No note named {}", name);
    }

    Ok(())
}

/// Show configuration and store summary.
async fn cmd_status(config: &CliConfig) -> Result<()> {
    let store = config.open_store()?;
    let count = store.list().await.context("Failed to read store")?.len();

    println!("SharedNotes Status:");
    println!("  Server: {}", config.server_url);
    println!("  Store: {}", store.name());
    if let Some(path) = &config.store.path {
        println!("  Database: {}", path.display());
    } else if config.store.backend == "sqlite" {
        println!("  Database: {}", config::default_db_path()?.display());
    }
    println!("  Notes: {}", count);
    println!("  Poll interval: {:?}", config.sync.poll_interval);
    println!("  Fetch timeout: {:?}", config.sync.fetch_timeout);

    Ok(())
}
