//! # fed-types
//!
//! Wire format types for knowledge-graph federation.
//!
//! This crate provides the foundational types used across all federation crates:
//! - [`PeerId`], [`InstanceId`], [`Cursor`], [`Nonce`] - Identity and ordering types
//! - [`NodeRecord`], [`EdgeRecord`], [`Tombstone`] - Synchronized content
//! - [`Message`] - Protocol messages (Handshake, SyncRequest, SyncPayload, ...)
//! - [`Frame`] - Versioned transport wrapper
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod canonical;
mod error;
mod frame;
mod ids;
mod messages;
mod records;
pub mod time;

pub use canonical::{canonical_bytes, Signable};
pub use error::WireError;
pub use frame::{Frame, MessageType, PROTOCOL_VERSION};
pub use ids::{Cursor, InstanceId, ItemId, Nonce, PeerId, NONCE_SIZE};
pub use messages::{
    content_hash, Handshake, Message, Nonced, Reject, SyncAck, SyncDirection, SyncPayload,
    SyncRequest,
};
pub use records::{EdgeRecord, ItemKind, NodeRecord, Origin, Tombstone};
