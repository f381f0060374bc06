//! Configuration loading for a federation node.
//!
//! Configuration is loaded from a TOML file (default: `federation.toml`).
//! Every section and field is optional and falls back to its default.

use fed_security::{CertConfig, DnsConfig, NonceConfig, SecurityConfig};
use fed_trust::TrustConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Identity key configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Network timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Destination validation and DNS pinning.
    #[serde(default)]
    pub dns: DnsConfig,
    /// Replay protection.
    #[serde(default)]
    pub nonce: NonceConfig,
    /// Certificate pinning.
    #[serde(default)]
    pub certs: CertConfig,
    /// Sync run limits.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Trust manager.
    #[serde(default)]
    pub trust: TrustConfig,
    /// Peer database.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Federation HTTP endpoint.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Identity key configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Path to the encrypted identity key (default: identity.key).
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    /// Passphrase for the key file. Prefer the environment over the file.
    pub passphrase: Option<String>,
}

/// Network timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Handshake round trip in seconds (default: 10).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Any other request in seconds (default: 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Whole sync run in seconds (default: 300).
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

/// Sync run limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Minimum seconds between runs for a standard-tier peer (default: 300).
    ///
    /// Scaled per tier: limited x2, trusted x1/2, core x1/4. 0 disables
    /// rate limiting.
    #[serde(default = "default_min_sync_interval")]
    pub min_sync_interval_secs: u64,
    /// Maximum pages pulled per run (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Items requested or served per page (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Peer database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Federation HTTP endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for the federation endpoint (default: 127.0.0.1:8443).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Accept peer certificates that fail CA validation, relying on
    /// trust-on-first-use pinning alone (default: false).
    #[serde(default)]
    pub accept_self_signed: bool,
}

// Default value functions
fn default_key_path() -> PathBuf {
    PathBuf::from("identity.key")
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_run_timeout() -> u64 {
    300 // 5 minutes
}

fn default_min_sync_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_iterations() -> u32 {
    100
}

fn default_page_size() -> u32 {
    100
}

fn default_database_path() -> PathBuf {
    PathBuf::from("federation.db")
}

fn default_http_bind() -> String {
    "127.0.0.1:8443".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
            passphrase: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            request_timeout_secs: default_request_timeout(),
            run_timeout_secs: default_run_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Handshake timeout.
    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Request timeout.
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Run timeout.
    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_sync_interval_secs: default_min_sync_interval(),
            max_iterations: default_max_iterations(),
            page_size: default_page_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            accept_self_signed: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The security layer's slice of the configuration.
    pub fn security(&self) -> SecurityConfig {
        SecurityConfig {
            dns: self.dns.clone(),
            nonce: self.nonce.clone(),
            certs: self.certs.clone(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.timeouts.handshake_timeout_secs, 10);
        assert_eq!(config.timeouts.request_timeout_secs, 30);
        assert_eq!(config.sync.max_iterations, 100);
        assert_eq!(config.sync.min_sync_interval_secs, 300);
        assert_eq!(config.trust.max_history, 5_000);
        assert!(config.dns.require_tls);
        assert_eq!(config.nonce.retention_secs, 3600);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.storage.database, PathBuf::from("federation.db"));
        assert_eq!(config.identity.key_path, PathBuf::from("identity.key"));
        assert!(config.identity.passphrase.is_none());
        assert!(!config.http.accept_self_signed);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[identity]
key_path = "/var/lib/kg/identity.key"

[timeouts]
run_timeout_secs = 60

[dns]
require_tls = false
pin_ttl_secs = 120

[nonce]
capacity = 500

[certs]
pin_ttl_secs = 86400

[sync]
max_iterations = 5
page_size = 20

[trust]
initial_score = 0.25
max_history = 100

[storage]
database = "/var/lib/kg/federation.db"

[http]
bind_address = "0.0.0.0:9443"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.identity.key_path, PathBuf::from("/var/lib/kg/identity.key"));
        assert_eq!(config.timeouts.run(), Duration::from_secs(60));
        assert_eq!(config.timeouts.request(), Duration::from_secs(30));
        assert!(!config.dns.require_tls);
        assert_eq!(config.dns.pin_ttl_secs, 120);
        assert_eq!(config.nonce.capacity, 500);
        assert_eq!(config.certs.pin_ttl_secs, Some(86400));
        assert_eq!(config.sync.max_iterations, 5);
        assert_eq!(config.sync.page_size, 20);
        assert_eq!(config.trust.initial_score, 0.25);
        assert_eq!(config.http.bind_address, "0.0.0.0:9443");

        let security = config.security();
        assert_eq!(security.dns.pin_ttl_secs, 120);
        assert_eq!(security.nonce.capacity, 500);
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("federation.toml");
        std::fs::write(&path, "[sync]\nmax_iterations = \"many\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("federation.toml"));

        let missing = Config::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadError { .. }));
    }
}
