//! Error types for the federation wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding federation messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Canonical JSON encoding failed
    #[error("canonical encoding failed: {0}")]
    Canonical(#[source] serde_json::Error),

    /// Invalid message type discriminator
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Frame discriminator does not match the enclosed message
    #[error("frame type {frame} does not match message type {message}")]
    TypeMismatch {
        /// Discriminator on the frame.
        frame: u8,
        /// Discriminator of the decoded message.
        message: u8,
    },

    /// Invalid protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}
