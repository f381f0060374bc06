//! # fed-node
//!
//! Operator CLI and federation endpoint for a knowledge-graph instance.
//!
//! ## Commands
//!
//! - `keygen`: Create the encrypted identity key
//! - `id`: Show this instance's id
//! - `peer`: Register, inspect, adjust and revoke peers
//! - `card`: Export or import a signed peer card
//! - `sync`: Run one sync against a peer
//! - `decay`: Apply trust decay once
//! - `serve`: Run the federation endpoint and background tasks
//!
//! ## Example
//!
//! ```bash
//! # Create identity (passphrase from KGFED_PASSPHRASE or --passphrase)
//! fed-node keygen
//!
//! # Exchange cards with another operator
//! fed-node card export --name lab --url https://lab.example/ --out lab.card.json
//! fed-node card import other.card.json
//!
//! # Serve and sync every five minutes
//! fed-node serve --seed graph.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fed_sync::Config;
use std::path::{Path, PathBuf};

mod commands;
mod http;
mod seed;

use commands::{card, decay, identity, peer, serve, sync};

/// Operator CLI for knowledge-graph federation.
#[derive(Parser, Debug)]
#[command(name = "fed-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "federation.toml")]
    config: PathBuf,

    /// Identity key passphrase (overrides KGFED_PASSPHRASE and the config file)
    #[arg(long, global = true)]
    passphrase: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the identity key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Show this instance's id and public key
    Id,

    /// Manage peers
    #[command(subcommand)]
    Peer(peer::PeerCommand),

    /// Exchange signed peer cards
    #[command(subcommand)]
    Card(card::CardCommand),

    /// Run one sync against a peer
    Sync {
        /// Peer id
        peer: String,

        /// Narrow the run: pull, push or bidirectional
        #[arg(long)]
        direction: Option<String>,

        /// Graph seed file (JSON) to sync from
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Apply inactivity and verification decay once
    Decay,

    /// Run the federation endpoint, sync scheduler and decay task
    Serve {
        /// Graph seed file (JSON)
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Seconds between sync passes over all peers; 0 disables
        #[arg(long, default_value = "300")]
        sync_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(&cli.config)?;
    if let Some(passphrase) = cli.passphrase {
        config.identity.passphrase = Some(passphrase);
    } else if let Ok(passphrase) = std::env::var("KGFED_PASSPHRASE") {
        config.identity.passphrase = Some(passphrase);
    }

    match cli.command {
        Commands::Keygen { force } => identity::keygen(&config, force).await?,
        Commands::Id => identity::show(&config).await?,
        Commands::Peer(command) => peer::run(&config, command).await?,
        Commands::Card(command) => card::run(&config, command).await?,
        Commands::Sync {
            peer,
            direction,
            seed,
        } => sync::run(&config, &peer, direction.as_deref(), seed.as_deref()).await?,
        Commands::Decay => decay::run(&config).await?,
        Commands::Serve {
            seed,
            sync_interval,
        } => serve::run(&config, seed.as_deref(), sync_interval).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        1 => tracing_subscriber::EnvFilter::new("debug"),
        _ => tracing_subscriber::EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load the config file, or defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
