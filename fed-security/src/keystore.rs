//! Encrypted identity key storage.
//!
//! The Ed25519 secret is encrypted with XChaCha20-Poly1305 under a key
//! derived from the operator passphrase with Argon2id, and written as a
//! small JSON document with mode 0600. There is no plaintext format.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Result, SecurityError};
use crate::signing::IdentityKey;

/// XChaCha20-Poly1305 nonce size (192 bits).
const AEAD_NONCE_SIZE: usize = 24;

/// Argon2 salt size.
const SALT_SIZE: usize = 16;

/// Key file format version.
const FORMAT_VERSION: u8 = 1;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iterations.
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// Cheap parameters for tests. Never use for real keys.
    pub fn for_testing() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn derive(&self, passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| SecurityError::KeyStore(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output[..])
            .map_err(|e| SecurityError::KeyStore(format!("argon2: {e}")))?;
        Ok(output)
    }
}

impl Default for KdfParams {
    /// 19 MiB, 2 iterations, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// On-disk key file.
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    version: u8,
    public_key: String,
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Passphrase-protected identity key file.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
    kdf: KdfParams,
}

impl KeyStore {
    /// Key store at `path` with default Argon2id cost.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Override the Argon2id cost for newly saved keys.
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Key file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a key file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt and write `key`. A non-empty passphrase is required.
    pub async fn save(&self, key: &IdentityKey, passphrase: Option<&str>) -> Result<()> {
        let passphrase = require_passphrase(passphrase)?;

        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        getrandom::getrandom(&mut salt)
            .map_err(|e| SecurityError::KeyStore(format!("random: {e}")))?;
        getrandom::getrandom(&mut nonce)
            .map_err(|e| SecurityError::KeyStore(format!("random: {e}")))?;

        let kek = self.kdf.derive(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&kek[..])
            .map_err(|e| SecurityError::KeyStore(e.to_string()))?;
        let secret = Zeroizing::new(key.to_bytes());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), &secret[..])
            .map_err(|_| SecurityError::KeyStore("encryption failed".into()))?;

        let file = KeyFile {
            version: FORMAT_VERSION,
            public_key: hex::encode(key.public_key()),
            kdf: self.kdf,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        };
        let contents = serde_json::to_vec_pretty(&file)
            .map_err(|e| SecurityError::KeyStore(e.to_string()))?;

        write_private(&self.path, &contents).await?;
        info!(path = %self.path.display(), instance = %key.instance_id(), "saved identity key");
        Ok(())
    }

    /// Read and decrypt the key.
    pub async fn load(&self, passphrase: Option<&str>) -> Result<IdentityKey> {
        let passphrase = require_passphrase(passphrase)?;
        let contents = tokio::fs::read(&self.path).await?;
        let file: KeyFile = serde_json::from_slice(&contents)
            .map_err(|e| SecurityError::KeyStore(format!("malformed key file: {e}")))?;
        if file.version != FORMAT_VERSION {
            return Err(SecurityError::KeyStore(format!(
                "unsupported key file version {}",
                file.version
            )));
        }

        let salt = decode_field("salt", &file.salt)?;
        let nonce = decode_field("nonce", &file.nonce)?;
        let ciphertext = decode_field("ciphertext", &file.ciphertext)?;
        if nonce.len() != AEAD_NONCE_SIZE {
            return Err(SecurityError::KeyStore("bad nonce length".into()));
        }

        let kek = file.kdf.derive(passphrase, &salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&kek[..])
            .map_err(|e| SecurityError::KeyStore(e.to_string()))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| SecurityError::KeyStore("wrong passphrase or corrupted key file".into()))?,
        );
        let secret: Zeroizing<[u8; 32]> = Zeroizing::new(
            plaintext
                .as_slice()
                .try_into()
                .map_err(|_| SecurityError::KeyStore("bad key length".into()))?,
        );

        let key = IdentityKey::from_bytes(&secret);
        if hex::encode(key.public_key()) != file.public_key {
            return Err(SecurityError::KeyStore(
                "public key does not match decrypted secret".into(),
            ));
        }
        Ok(key)
    }

    /// Load the key, or generate and save a new one if none exists.
    pub async fn load_or_generate(&self, passphrase: Option<&str>) -> Result<IdentityKey> {
        if self.exists() {
            return self.load(passphrase).await;
        }
        let key = IdentityKey::generate();
        self.save(&key, passphrase).await?;
        Ok(key)
    }
}

fn require_passphrase(passphrase: Option<&str>) -> Result<&str> {
    match passphrase {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(SecurityError::KeyStore(
            "a passphrase is required; identity keys are never stored in plaintext".into(),
        )),
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| SecurityError::KeyStore(format!("bad {name} encoding")))
}

/// Write via a temporary file created 0600, then rename into place.
async fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(dir: &Path) -> KeyStore {
        KeyStore::new(dir.join("identity.key")).with_kdf(KdfParams::for_testing())
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = IdentityKey::generate();

        store.save(&key, Some("correct horse")).await.unwrap();
        let loaded = store.load(Some("correct horse")).await.unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
    }

    #[tokio::test]
    async fn passphrase_is_mandatory() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = IdentityKey::generate();

        assert!(matches!(
            store.save(&key, None).await,
            Err(SecurityError::KeyStore(_))
        ));
        assert!(store.save(&key, Some("")).await.is_err());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn wrong_passphrase_fails() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store
            .save(&IdentityKey::generate(), Some("right"))
            .await
            .unwrap();
        assert!(store.load(Some("wrong")).await.is_err());
    }

    #[tokio::test]
    async fn file_holds_no_plaintext_secret() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = IdentityKey::generate();
        store.save(&key, Some("pw")).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(!contents.contains(&hex::encode(key.to_bytes())));
        assert!(contents.contains(&hex::encode(key.public_key())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&IdentityKey::generate(), Some("pw")).await.unwrap();

        let perms = tokio::fs::metadata(store.path()).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "key file should be 0600");
    }

    #[tokio::test]
    async fn load_or_generate_is_stable() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let first = store.load_or_generate(Some("pw")).await.unwrap();
        let second = store.load_or_generate(Some("pw")).await.unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[tokio::test]
    async fn tampered_ciphertext_fails() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save(&IdentityKey::generate(), Some("pw")).await.unwrap();

        let mut file: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(store.path()).await.unwrap()).unwrap();
        let ct = file["ciphertext"].as_str().unwrap().to_string();
        let flipped = if ct.starts_with('0') { format!("1{}", &ct[1..]) } else { format!("0{}", &ct[1..]) };
        file["ciphertext"] = serde_json::json!(flipped);
        tokio::fs::write(store.path(), serde_json::to_vec(&file).unwrap())
            .await
            .unwrap();

        assert!(store.load(Some("pw")).await.is_err());
    }
}
