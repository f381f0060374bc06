//! Error types for the security layer.

use fed_types::{PeerId, WireError};
use thiserror::Error;

/// Security layer errors.
///
/// Every variant is a hard rejection. Nothing here is downgraded or
/// retried by this crate.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Destination URL could not be parsed or is malformed.
    #[error("invalid destination url: {0}")]
    InvalidUrl(String),

    /// Destination refers to a non-public address or disallowed scheme.
    #[error("destination blocked: {0}")]
    Ssrf(String),

    /// Host resolved to a different address set while pinned.
    #[error("DNS rebinding detected for {host}")]
    DnsRebinding {
        /// Host name
        host: String,
    },

    /// Host name did not resolve.
    #[error("DNS resolution failed for {host}: {reason}")]
    Resolution {
        /// Host name
        host: String,
        /// Resolver error
        reason: String,
    },

    /// Peer presented a certificate other than the pinned one.
    #[error("certificate mismatch for peer {peer}")]
    CertificateMismatch {
        /// Peer id
        peer: PeerId,
        /// Pinned fingerprint
        expected: String,
        /// Presented fingerprint
        actual: String,
    },

    /// Fingerprint supplied by an operator is not SHA-256 hex.
    #[error("invalid certificate fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Signature missing, malformed, or not valid for the key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Public key bytes are not a valid Ed25519 point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Message claims an identity that does not match its signing key.
    #[error("identity mismatch: {0}")]
    IdentityMismatch(String),

    /// Message carried no nonce.
    #[error("missing nonce")]
    MissingNonce,

    /// Nonce already seen for this peer.
    #[error("replayed nonce from peer {peer}")]
    ReplayedNonce {
        /// Peer id
        peer: PeerId,
    },

    /// Timestamp outside the freshness window.
    #[error("stale timestamp {timestamp} (now {now}, max skew {max_skew}s)")]
    StaleTimestamp {
        /// Message timestamp
        timestamp: u64,
        /// Local time
        now: u64,
        /// Allowed skew
        max_skew: u64,
    },

    /// Identity key could not be stored or loaded.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// I/O error (key file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Canonical encoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Result type for security operations.
pub type Result<T> = std::result::Result<T, SecurityError>;
