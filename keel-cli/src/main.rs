//! # keel
//!
//! CLI for inspecting Keel configuration and exercising the client
//! lifecycle against the in-memory backend.
//!
//! ## Commands
//!
//! - `config`: Print the resolved configuration
//! - `run`: Create a client, queue demo writes, sync, reset
//!
//! ## Example
//!
//! ```bash
//! # Show what a config file resolves to
//! keel --config keel.toml config
//!
//! # Drive one full lifecycle, starting offline
//! keel --config keel.toml run --enqueue 3 --offline
//!
//! # More detail
//! RUST_LOG=keel=debug keel run
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{resolved, run};

/// CLI for inspecting Keel configuration and exercising the client lifecycle.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (TOML, or JSON with a .json extension).
    /// Defaults to keel.toml in the user config directory, if present.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved configuration as JSON
    Config,

    /// Create a client, queue writes, sync once, then reset
    Run {
        /// Start with the network reported as unreachable
        #[arg(long)]
        offline: bool,

        /// Number of demo writes to queue
        #[arg(long, default_value = "1")]
        enqueue: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let partial = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            resolved::run(partial)?;
        }
        Commands::Run { offline, enqueue } => {
            run::run(partial, offline, enqueue).await?;
        }
    }

    Ok(())
}
