//! CLI command implementations.

pub mod card;
pub mod decay;
pub mod identity;
pub mod peer;
pub mod serve;
pub mod sync;

use anyhow::{Context, Result};
use fed_security::{IdentityKey, KeyStore, SecurityLayer, SystemResolver};
use fed_sync::{
    Config, Governance, GraphRepository, HttpTransport, OrchestratorConfig, SyncOrchestrator,
};
use fed_trust::{SqlitePeerStore, TrustManager};
use fed_types::PeerId;
use std::sync::Arc;

/// Open the peer database named in the config.
pub async fn open_trust(config: &Config) -> Result<Arc<TrustManager>> {
    let store = SqlitePeerStore::new(&config.storage.database)
        .await
        .with_context(|| format!("Failed to open {}", config.storage.database.display()))?;
    Ok(Arc::new(TrustManager::new(
        Arc::new(store),
        config.trust.clone(),
    )))
}

/// Load the identity key. Fails if `keygen` has not been run.
pub async fn load_identity(config: &Config) -> Result<IdentityKey> {
    let store = KeyStore::new(&config.identity.key_path);
    if !store.exists() {
        anyhow::bail!(
            "No identity at {}. Run 'fed-node keygen' first.",
            config.identity.key_path.display()
        );
    }
    store
        .load(config.identity.passphrase.as_deref())
        .await
        .context("Failed to unlock identity key")
}

/// Security layer over the loaded identity, resolving through the OS.
pub async fn open_security(config: &Config) -> Result<Arc<SecurityLayer>> {
    let identity = load_identity(config).await?;
    Ok(Arc::new(SecurityLayer::new(
        identity,
        &config.security(),
        Arc::new(SystemResolver),
    )))
}

/// Orchestrator over HTTP, with settings from the config.
pub fn build_orchestrator(
    config: &Config,
    security: Arc<SecurityLayer>,
    trust: Arc<TrustManager>,
    graph: Arc<dyn GraphRepository>,
    governance: Arc<dyn Governance>,
) -> SyncOrchestrator {
    let transport = HttpTransport::new(config.timeouts.request())
        .accept_self_signed(config.http.accept_self_signed);
    SyncOrchestrator::new(
        security,
        trust,
        Arc::new(transport),
        graph,
        governance,
        OrchestratorConfig::from_config(config),
    )
}

/// Parse a peer id argument.
pub fn parse_peer_id(s: &str) -> Result<PeerId> {
    PeerId::parse(s).ok_or_else(|| anyhow::anyhow!("Invalid peer id: {}", s))
}
