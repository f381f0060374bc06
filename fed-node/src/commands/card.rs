//! Peer cards: signed introductions operators exchange out of band.
//!
//! A card names an instance, its federation URL and its public key, and is
//! signed by that key. Importing a card registers the peer; the signature
//! proves the sender holds the key, the operator still decides whether to
//! trust them.

use anyhow::{Context, Result};
use clap::Subcommand;
use fed_security::{decode_public_key, IdentityKey, SignedEnvelope};
use fed_sync::Config;
use fed_trust::Peer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::peer::{register, RegistrationArgs};
use super::{load_identity, open_trust};

/// Card subcommands.
#[derive(Subcommand, Debug)]
pub enum CardCommand {
    /// Write this instance's signed card
    Export {
        /// Name to advertise
        #[arg(long)]
        name: String,

        /// Public base URL of this instance's federation endpoint
        #[arg(long)]
        url: String,

        /// Output file; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Verify a card and register the peer it describes
    Import {
        /// Card file
        file: PathBuf,

        /// Register under this name instead of the advertised one
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        options: RegistrationArgs,
    },
}

/// Contents of a peer card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerCard {
    /// Advertised name.
    pub name: String,
    /// Federation base URL.
    pub base_url: String,
    /// Hex Ed25519 public key.
    pub public_key: String,
}

/// A card with its signature.
pub type SignedCard = SignedEnvelope<PeerCard>;

/// Run a card subcommand.
pub async fn run(config: &Config, command: CardCommand) -> Result<()> {
    match command {
        CardCommand::Export { name, url, out } => {
            let key = load_identity(config).await?;
            let json = export(&key, &name, &url)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, json.as_bytes())
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Card written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        CardCommand::Import {
            file,
            name,
            options,
        } => {
            let peer = import(config, &file, name.as_deref(), &options).await?;
            println!("Card verified. Peer registered.");
            println!();
            println!("  Peer ID:  {}", peer.id);
            println!("  Name:     {}", peer.name);
            println!("  Instance: {}", peer.instance_id());
            println!("  Trust:    {:.4} ({})", peer.trust_score, peer.tier());
        }
    }
    Ok(())
}

/// Sign a card for `key` and render it as JSON.
pub fn export(key: &IdentityKey, name: &str, url: &str) -> Result<String> {
    let card = PeerCard {
        name: name.to_string(),
        base_url: url.to_string(),
        public_key: hex::encode(key.public_key()),
    };
    let signed = SignedEnvelope::seal(card, key)?;
    Ok(serde_json::to_string_pretty(&signed)?)
}

/// Verify a card file and register its peer.
pub async fn import(
    config: &Config,
    file: &Path,
    name: Option<&str>,
    options: &RegistrationArgs,
) -> Result<Peer> {
    let contents = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let signed: SignedCard = serde_json::from_slice(&contents).context("Malformed card")?;
    let (card, public_key) = verify(&signed)?;

    let trust = open_trust(config).await?;
    register(
        &trust,
        options,
        name.unwrap_or(&card.name),
        &card.base_url,
        public_key,
    )
    .await
}

/// Check the signature and that the advertised key is the signing key.
fn verify(signed: &SignedCard) -> Result<(&PeerCard, [u8; 32])> {
    let card = signed
        .verify_self_signed()
        .context("Card signature is invalid")?;
    let public_key = decode_public_key(&card.public_key).context("Card key is invalid")?;
    if signed.signer_key()? != public_key {
        anyhow::bail!("Card advertises a key other than the one that signed it");
    }
    Ok((card, public_key))
}
