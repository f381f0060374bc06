//! Instance identity: create and show.

use anyhow::Result;
use fed_security::{IdentityKey, KeyStore};
use fed_sync::Config;

use super::load_identity;

/// Create the identity key.
pub async fn keygen(config: &Config, force: bool) -> Result<()> {
    let store = KeyStore::new(&config.identity.key_path);
    if store.exists() && !force {
        anyhow::bail!(
            "Identity already exists at {}. Use --force to replace it.",
            store.path().display()
        );
    }

    let key = IdentityKey::generate();
    store
        .save(&key, config.identity.passphrase.as_deref())
        .await?;

    println!("Identity created.");
    println!();
    println!("  Instance ID: {}", key.instance_id());
    println!("  Key file:    {}", store.path().display());
    println!();
    println!("Next steps:");
    println!("  1. Export your card: fed-node card export --name <name> --url <url>");
    println!("  2. Import a peer's card: fed-node card import <file>");

    Ok(())
}

/// Print the instance id.
pub async fn show(config: &Config) -> Result<()> {
    let key = load_identity(config).await?;
    println!("{}", key.instance_id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::config_in;
    use tempfile::tempdir;

    #[tokio::test]
    async fn keygen_creates_loadable_key() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);

        keygen(&config, false).await.unwrap();

        assert!(config.identity.key_path.exists());
        load_identity(&config).await.unwrap();
    }

    #[tokio::test]
    async fn keygen_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);

        keygen(&config, false).await.unwrap();
        let first = load_identity(&config).await.unwrap().instance_id();

        assert!(keygen(&config, false).await.is_err());

        keygen(&config, true).await.unwrap();
        let second = load_identity(&config).await.unwrap().instance_id();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn keygen_requires_passphrase() {
        let dir = tempdir().unwrap();
        let mut config = config_in(&dir);
        config.identity.passphrase = None;

        assert!(keygen(&config, false).await.is_err());
        assert!(!config.identity.key_path.exists());
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_to_load() {
        let dir = tempdir().unwrap();
        let mut config = config_in(&dir);
        keygen(&config, false).await.unwrap();

        config.identity.passphrase = Some("wrong".into());
        assert!(load_identity(&config).await.is_err());
    }
}
