//! Peer management: register, inspect, adjust, revoke.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fed_core::{ConflictStrategy, TrustEventKind};
use fed_security::decode_public_key;
use fed_sync::Config;
use fed_trust::{Peer, PeerRegistration, TrustManager};
use fed_types::SyncDirection;

use super::{open_trust, parse_peer_id};

/// Peer subcommands.
#[derive(Subcommand, Debug)]
pub enum PeerCommand {
    /// Register a peer by URL and hex public key
    Add {
        /// Operator-facing name
        #[arg(long)]
        name: String,

        /// Base URL of the peer's federation endpoint
        #[arg(long)]
        url: String,

        /// Peer's public key (64 hex chars)
        #[arg(long)]
        key: String,

        #[command(flatten)]
        options: RegistrationArgs,
    },

    /// List registered peers
    List,

    /// Show one peer
    Show {
        /// Peer id
        peer: String,

        /// Also print this many recent trust events
        #[arg(long)]
        history: Option<u32>,
    },

    /// Revoke a peer permanently
    Revoke {
        /// Peer id
        peer: String,

        /// Reason recorded in the trust history
        #[arg(long, default_value = "revoked by operator")]
        reason: String,
    },

    /// Adjust a peer's trust score by a delta in [-1, 1]
    Adjust {
        /// Peer id
        peer: String,

        /// Score delta
        #[arg(allow_hyphen_values = true)]
        delta: f64,

        /// Reason recorded in the trust history
        #[arg(long)]
        reason: String,
    },

    /// Record that content from this peer was accepted on review
    Accept {
        /// Peer id
        peer: String,
    },

    /// Record that content from this peer was rejected on review
    Reject {
        /// Peer id
        peer: String,

        /// Reason recorded in the trust history
        #[arg(long)]
        reason: Option<String>,
    },
}

/// Sync settings given at registration.
#[derive(Args, Debug, Clone)]
pub struct RegistrationArgs {
    /// Sync direction: pull, push or bidirectional
    #[arg(long, default_value = "bidirectional")]
    pub direction: String,

    /// Conflict strategy: newer_timestamp, higher_trust, local_wins,
    /// remote_wins, merge or manual_review
    #[arg(long, default_value = "newer_timestamp")]
    pub strategy: String,

    /// Only push local items with at least this trust level
    #[arg(long, default_value = "0.0")]
    pub push_min_trust: f64,

    /// Only push nodes of these types (repeatable); default all
    #[arg(long = "push-type")]
    pub push_types: Vec<String>,
}

impl Default for RegistrationArgs {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional.as_str().to_string(),
            strategy: ConflictStrategy::default().as_str().to_string(),
            push_min_trust: 0.0,
            push_types: Vec::new(),
        }
    }
}

impl RegistrationArgs {
    /// Build a registration from these options.
    pub fn registration(&self, name: &str, url: &str, public_key: [u8; 32]) -> Result<PeerRegistration> {
        let mut registration = PeerRegistration::new(name, url, public_key);
        registration.direction = SyncDirection::parse(&self.direction)
            .ok_or_else(|| anyhow::anyhow!("Unknown direction: {}", self.direction))?;
        registration.conflict_strategy = ConflictStrategy::parse(&self.strategy)
            .ok_or_else(|| anyhow::anyhow!("Unknown conflict strategy: {}", self.strategy))?;
        registration.push_min_trust = self.push_min_trust;
        registration.push_types = self.push_types.clone();
        Ok(registration)
    }
}

/// Run a peer subcommand.
pub async fn run(config: &Config, command: PeerCommand) -> Result<()> {
    let trust = open_trust(config).await?;

    match command {
        PeerCommand::Add {
            name,
            url,
            key,
            options,
        } => {
            let public_key = decode_public_key(&key).context("Invalid public key")?;
            let peer = register(&trust, &options, &name, &url, public_key).await?;
            println!("Peer registered.");
            println!();
            print_peer(&peer);
        }
        PeerCommand::List => {
            let peers = trust.list_peers().await?;
            if peers.is_empty() {
                println!("No peers registered.");
                println!("Add one with: fed-node peer add --name <name> --url <url> --key <hex>");
                return Ok(());
            }
            println!(
                "{:<36}  {:<16}  {:>6}  {:<10}  {:<10}  {}",
                "ID", "NAME", "SCORE", "TIER", "STATUS", "URL"
            );
            for peer in peers {
                println!(
                    "{:<36}  {:<16}  {:>6.3}  {:<10}  {:<10}  {}",
                    peer.id,
                    truncate(&peer.name, 16),
                    peer.trust_score,
                    peer.tier().as_str(),
                    peer.status.as_str(),
                    peer.base_url
                );
            }
        }
        PeerCommand::Show { peer, history } => {
            let id = parse_peer_id(&peer)?;
            let peer = trust.get_peer(&id).await?;
            print_peer(&peer);
            if let Some(limit) = history {
                println!();
                println!("Trust history (newest first):");
                for event in trust.history(&id, limit).await? {
                    println!(
                        "  {}  {:<20} {:>+8.4}  -> {:.4}  {}",
                        event.timestamp,
                        event.kind.as_str(),
                        event.delta,
                        event.score_after,
                        event.reason.as_deref().unwrap_or("")
                    );
                }
            }
        }
        PeerCommand::Revoke { peer, reason } => {
            let id = parse_peer_id(&peer)?;
            let peer = trust.revoke(&id, &reason).await?;
            println!("Peer {} ({}) revoked.", peer.name, peer.id);
        }
        PeerCommand::Adjust {
            peer,
            delta,
            reason,
        } => {
            let id = parse_peer_id(&peer)?;
            let score = trust.manual_adjustment(&id, delta, &reason).await?;
            println!("Trust score now {:.4}", score);
        }
        PeerCommand::Accept { peer } => {
            let id = parse_peer_id(&peer)?;
            let score = trust
                .record_event(&id, TrustEventKind::ManualAccept, None)
                .await?;
            println!("Trust score now {:.4}", score);
        }
        PeerCommand::Reject { peer, reason } => {
            let id = parse_peer_id(&peer)?;
            let score = trust
                .record_event(&id, TrustEventKind::ManualReject, reason)
                .await?;
            println!("Trust score now {:.4}", score);
        }
    }

    Ok(())
}

/// Register a peer with the given options.
pub async fn register(
    trust: &TrustManager,
    options: &RegistrationArgs,
    name: &str,
    url: &str,
    public_key: [u8; 32],
) -> Result<Peer> {
    let registration = options.registration(name, url, public_key)?;
    Ok(trust.register_peer(registration).await?)
}

fn print_peer(peer: &Peer) {
    println!("  Peer ID:     {}", peer.id);
    println!("  Name:        {}", peer.name);
    println!("  URL:         {}", peer.base_url);
    println!("  Instance:    {}", peer.instance_id());
    println!("  Trust:       {:.4} ({})", peer.trust_score, peer.tier());
    println!("  Status:      {}", peer.status);
    println!("  Direction:   {}", peer.direction.as_str());
    println!("  Conflicts:   {}", peer.conflict_strategy);
    println!(
        "  Syncs:       {} of {} succeeded",
        peer.syncs_succeeded, peer.syncs_attempted
    );
    println!(
        "  Items:       {} received, {} sent",
        peer.items_received, peer.items_sent
    );
    println!(
        "  Cursors:     pull {}, push {}",
        peer.pull_cursor, peer.push_cursor
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
