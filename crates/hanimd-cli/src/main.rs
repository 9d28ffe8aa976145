//! CLI entry point for HANI-MD.
//!
//! This binary provides the `hanimd` command with subcommands for packing
//! and restoring the authentication session and for basic store upkeep.

mod cli;
mod config;
mod helpers;

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Parser;
use hanimd_session::SessionBundle;
use hanimd_store::{Connection, StoreConfig};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, load_config};
use crate::helpers::{init_tracing, preview, read_session_string};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    if let Err(e) = dotenvy::dotenv() {
        debug!("no .env file loaded: {e}");
    }

    let mut config = load_config(&cli.config);
    if let Some(uri) = cli.uri {
        config.store.uri = uri;
    }

    match cli.command {
        Commands::Encode { dir, out } => cmd_encode(&config, dir, out),
        Commands::Decode { source, out } => cmd_decode(&read_session_string(&source)?, &out),
        Commands::Push { source } => cmd_push(config.store, &read_session_string(&source)?).await,
        Commands::Pull { out } => cmd_pull(config.store, &out).await,
        Commands::Status => cmd_status(config.store).await,
        Commands::Sweep => cmd_sweep(config.store).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: encode / decode
// ---------------------------------------------------------------------------

fn cmd_encode(
    config: &AppConfig,
    dir: Option<std::path::PathBuf>,
    out: Option<std::path::PathBuf>,
) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.session.dir.clone());
    let out = out.unwrap_or_else(|| config.session.output.clone());

    let bundle = SessionBundle::read_dir(&dir)
        .with_context(|| format!("failed to read session directory {}", dir.display()))?;
    if bundle.is_empty() {
        warn!(dir = %dir.display(), "session directory has no files, encoding an empty session");
    }
    let encoded = bundle.encode();
    std::fs::write(&out, &encoded)
        .with_context(|| format!("failed to write {}", out.display()))?;

    info!(files = bundle.len(), bytes = bundle.total_bytes(), "session encoded");
    println!();
    println!("  SESSION_ID written to {}", out.display());
    println!("  Files:   {}", bundle.len());
    println!("  Length:  {} characters", encoded.len());
    println!("  Preview: {}", preview(&encoded));
    println!();
    Ok(())
}

fn cmd_decode(session: &str, out: &Path) -> Result<()> {
    let bundle = SessionBundle::decode(session).context("invalid SESSION_ID")?;
    restore(&bundle, out)
}

fn restore(bundle: &SessionBundle, out: &Path) -> Result<()> {
    bundle
        .write_dir(out)
        .with_context(|| format!("failed to restore session into {}", out.display()))?;
    info!(files = bundle.len(), dir = %out.display(), "session restored");
    for name in bundle.names() {
        println!("  restored {name}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: push / pull
// ---------------------------------------------------------------------------

async fn connect(store: StoreConfig) -> Result<Connection> {
    let conn = Connection::connect(store).await;
    if !conn.is_available() {
        bail!(
            "store unavailable: {}",
            conn.unavailable_reason().unwrap_or("unknown reason")
        );
    }
    Ok(conn)
}

async fn cmd_push(store: StoreConfig, session: &str) -> Result<()> {
    let bundle = SessionBundle::decode(session).context("invalid SESSION_ID")?;
    let conn = connect(store).await?;
    if !conn.sessions().save(&bundle.to_value()).await {
        bail!("failed to save session to the store");
    }
    println!("  session with {} files saved to the store", bundle.len());
    Ok(())
}

async fn cmd_pull(store: StoreConfig, out: &Path) -> Result<()> {
    let conn = connect(store).await?;
    let Some(data) = conn.sessions().get().await else {
        bail!("no session in the store");
    };
    let bundle = SessionBundle::from_value(&data).context("stored session is corrupt")?;
    restore(&bundle, out)
}

// ---------------------------------------------------------------------------
// Subcommand: status / sweep
// ---------------------------------------------------------------------------

async fn cmd_status(store: StoreConfig) -> Result<()> {
    let conn = Connection::connect(store).await;

    println!();
    println!("  HANI-MD Store Status");
    println!("  ====================");
    println!();

    if !conn.is_available() {
        println!(
            "  Store:            UNAVAILABLE ({})",
            conn.unavailable_reason().unwrap_or("unknown reason")
        );
        println!();
        return Ok(());
    }
    println!("  Store:            OK ({})", conn.driver_kind().unwrap_or("?"));

    match conn.sessions().record().await {
        Some(record) => match SessionBundle::from_value(&record.data) {
            Ok(bundle) => println!("  Session:          {} files", bundle.len()),
            Err(_) => println!("  Session:          CORRUPT"),
        },
        None => println!("  Session:          NONE"),
    }

    match conn.stats().refresh_totals().await {
        Some(stats) => {
            println!("  Users:            {}", stats.total_users);
            println!("  Groups:           {}", stats.total_groups);
            println!("  Commands:         {}", stats.commands);
            println!("  Messages:         {}", stats.messages);
        }
        None => println!("  Stats:            UNREADABLE"),
    }
    println!();
    Ok(())
}

async fn cmd_sweep(mut store: StoreConfig) -> Result<()> {
    // One-shot: the background sweeper is not needed.
    store.sweep_interval_secs = 0;
    let conn = connect(store).await?;
    let removed = conn.messages().sweep_expired().await;
    println!("  {removed} expired messages removed");
    Ok(())
}
