//! Error types for fed-trust.

use fed_types::PeerId;
use std::path::PathBuf;

/// Trust manager errors.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No peer with this id.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Peer is revoked; no further trust changes are accepted.
    #[error("peer revoked: {0}")]
    Revoked(PeerId),

    /// A live registration already exists for this public key.
    #[error("peer already registered for public key {0}")]
    DuplicatePeer(String),

    /// Registration or adjustment input is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Event kind has no fixed delta and cannot be recorded directly.
    #[error("event kind {0} cannot be recorded directly")]
    UnsupportedEvent(&'static str),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored column could not be decoded.
    #[error("corrupt {field} in stored row: {value}")]
    Corrupt {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for trust operations.
pub type Result<T> = std::result::Result<T, TrustError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
