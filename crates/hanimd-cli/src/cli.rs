//! CLI argument definitions for HANI-MD.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// HANI-MD -- session and store maintenance.
#[derive(Parser)]
#[command(
    name = "hanimd",
    version,
    about = "HANI-MD -- session and store maintenance",
    long_about = "Pack the bot's authentication session into a portable SESSION_ID string, \
                  restore it, move it in and out of the store, and inspect store health."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Store connection string; overrides the config file and environment.
    #[arg(long, global = true)]
    pub uri: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode a session directory into a SESSION_ID string.
    Encode {
        /// Session directory. Defaults to `[session] dir` from the config.
        dir: Option<PathBuf>,

        /// File to write the string to. Defaults to `[session] output`.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Decode a SESSION_ID string and restore its files.
    Decode {
        #[command(flatten)]
        source: SessionSource,

        /// Directory to restore into.
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Save a SESSION_ID string into the store.
    Push {
        #[command(flatten)]
        source: SessionSource,
    },

    /// Restore the session kept in the store into a directory.
    Pull {
        /// Directory to restore into.
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Show store availability and counters.
    Status,

    /// Purge expired stored messages now.
    Sweep,
}

/// Where to read a SESSION_ID string from. Falls back to `$SESSION_ID`.
#[derive(clap::Args)]
#[group(multiple = false)]
pub struct SessionSource {
    /// The SESSION_ID string itself.
    #[arg(long)]
    pub session: Option<String>,

    /// A file containing the SESSION_ID string.
    #[arg(long)]
    pub file: Option<PathBuf>,
}
