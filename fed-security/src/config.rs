//! Configuration sections consumed by the security layer.
//!
//! These deserialize as the `[dns]`, `[nonce]` and `[certs]` tables of the
//! node configuration file. Every field has a default.

use serde::Deserialize;

/// Destination validation and DNS pinning (`[dns]`).
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Require `https` destinations (default: true). Local development only.
    #[serde(default = "default_require_tls")]
    pub require_tls: bool,
    /// How long a host's resolved address set stays pinned (default: 300).
    #[serde(default = "default_dns_pin_ttl")]
    pub pin_ttl_secs: u64,
    /// Maximum pinned hosts (default: 10,000).
    #[serde(default = "default_dns_pin_capacity")]
    pub pin_capacity: usize,
}

/// Replay protection (`[nonce]`).
#[derive(Debug, Clone, Deserialize)]
pub struct NonceConfig {
    /// How long a seen nonce is remembered (default: 3600).
    #[serde(default = "default_nonce_retention")]
    pub retention_secs: u64,
    /// Maximum remembered nonces (default: 100,000).
    #[serde(default = "default_nonce_capacity")]
    pub capacity: usize,
    /// Accepted distance between message timestamp and local clock (default: 300).
    #[serde(default = "default_max_clock_skew")]
    pub max_clock_skew_secs: u64,
}

/// Certificate pinning (`[certs]`).
#[derive(Debug, Clone, Deserialize)]
pub struct CertConfig {
    /// Maximum pinned peers (default: 10,000).
    #[serde(default = "default_cert_pin_capacity")]
    pub pin_capacity: usize,
    /// Pin lifetime; absent means pins never expire.
    #[serde(default)]
    pub pin_ttl_secs: Option<u64>,
}

/// All sections the security layer needs.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// `[dns]`
    pub dns: DnsConfig,
    /// `[nonce]`
    pub nonce: NonceConfig,
    /// `[certs]`
    pub certs: CertConfig,
}

// Default value functions
fn default_require_tls() -> bool {
    true
}

fn default_dns_pin_ttl() -> u64 {
    300 // 5 minutes
}

fn default_dns_pin_capacity() -> usize {
    10_000
}

fn default_nonce_retention() -> u64 {
    3600 // 1 hour
}

fn default_nonce_capacity() -> usize {
    100_000
}

fn default_max_clock_skew() -> u64 {
    300 // 5 minutes
}

fn default_cert_pin_capacity() -> usize {
    10_000
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            require_tls: default_require_tls(),
            pin_ttl_secs: default_dns_pin_ttl(),
            pin_capacity: default_dns_pin_capacity(),
        }
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_nonce_retention(),
            capacity: default_nonce_capacity(),
            max_clock_skew_secs: default_max_clock_skew(),
        }
    }
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            pin_capacity: default_cert_pin_capacity(),
            pin_ttl_secs: None,
        }
    }
}
