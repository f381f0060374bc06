//! Protocol messages for federation.
//!
//! Every message except [`Reject`] is signed by its sender and carries a
//! nonce and a timestamp for replay protection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_bytes, Signable};
use crate::{Cursor, EdgeRecord, InstanceId, Nonce, NodeRecord, Tombstone, WireError};

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Identity exchange
    Handshake(Handshake),
    /// Request a page of content
    SyncRequest(SyncRequest),
    /// A page of content (pull response or push)
    SyncPayload(SyncPayload),
    /// Acknowledge a pushed page
    SyncAck(SyncAck),
    /// Refusal with a reason
    Reject(Reject),
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake(_) => "handshake",
            Message::SyncRequest(_) => "sync_request",
            Message::SyncPayload(_) => "sync_payload",
            Message::SyncAck(_) => "sync_ack",
            Message::Reject(_) => "reject",
        }
    }
}

/// Direction of a sync run, from the initiator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Fetch remote content.
    Pull,
    /// Send local content.
    Push,
    /// Pull, then push.
    Bidirectional,
}

impl SyncDirection {
    /// Whether the run fetches remote content.
    pub fn pulls(&self) -> bool {
        matches!(self, SyncDirection::Pull | SyncDirection::Bidirectional)
    }

    /// Whether the run sends local content.
    pub fn pushes(&self) -> bool {
        matches!(self, SyncDirection::Push | SyncDirection::Bidirectional)
    }

    /// Stable string form (used in storage).
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    /// Parse the string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pull" => Some(SyncDirection::Pull),
            "push" => Some(SyncDirection::Push),
            "bidirectional" => Some(SyncDirection::Bidirectional),
            _ => None,
        }
    }
}

/// Access to the replay-protection fields of a message.
pub trait Nonced {
    /// The nonce, if the sender supplied one.
    fn nonce(&self) -> Option<&Nonce>;

    /// Sender's unix timestamp (seconds).
    fn timestamp(&self) -> u64;

    /// Set nonce and timestamp before signing.
    fn stamp(&mut self, nonce: Nonce, timestamp: u64);
}

macro_rules! signed_message {
    ($ty:ty) => {
        impl Signable for $ty {
            fn signature(&self) -> &str {
                &self.signature
            }

            fn set_signature(&mut self, signature: String) {
                self.signature = signature;
            }
        }

        impl Nonced for $ty {
            fn nonce(&self) -> Option<&Nonce> {
                self.nonce.as_ref()
            }

            fn timestamp(&self) -> u64 {
                self.timestamp
            }

            fn stamp(&mut self, nonce: Nonce, timestamp: u64) {
                self.nonce = Some(nonce);
                self.timestamp = timestamp;
            }
        }
    };
}

/// Identity exchange sent at the start of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Sender's instance id (hex of `public_key`).
    pub instance_id: InstanceId,
    /// Sender's Ed25519 public key, hex.
    pub public_key: String,
    /// Replay-protection nonce.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Signature over the canonical encoding of the other fields.
    #[serde(default)]
    pub signature: String,
}

impl Handshake {
    /// Create an unsigned handshake for a public key.
    pub fn new(public_key: &[u8; 32]) -> Self {
        Self {
            instance_id: InstanceId::from_public_key(public_key),
            public_key: hex::encode(public_key),
            nonce: None,
            timestamp: 0,
            signature: String::new(),
        }
    }
}

signed_message!(Handshake);

/// Request for one page of content after a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Requesting instance.
    pub peer_id: InstanceId,
    /// Run direction.
    pub direction: SyncDirection,
    /// Return content after this cursor.
    pub since_cursor: Cursor,
    /// Maximum number of records in the page.
    pub limit: u32,
    /// Replay-protection nonce.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Signature over the canonical encoding of the other fields.
    #[serde(default)]
    pub signature: String,
}

impl SyncRequest {
    /// Create an unsigned request.
    pub fn new(peer_id: InstanceId, direction: SyncDirection, since_cursor: Cursor, limit: u32) -> Self {
        Self {
            peer_id,
            direction,
            since_cursor,
            limit,
            nonce: None,
            timestamp: 0,
            signature: String::new(),
        }
    }
}

signed_message!(SyncRequest);

#[derive(Serialize)]
struct ContentView<'a> {
    items: &'a [NodeRecord],
    edges: &'a [EdgeRecord],
    deletions: &'a [Tombstone],
}

/// SHA-256 (hex) over the canonical encoding of a batch.
pub fn content_hash(
    items: &[NodeRecord],
    edges: &[EdgeRecord],
    deletions: &[Tombstone],
) -> Result<String, WireError> {
    let bytes = canonical_bytes(&ContentView {
        items,
        edges,
        deletions,
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// A signed, paginated batch of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    /// Sending instance.
    pub instance_id: InstanceId,
    /// Nodes.
    #[serde(default)]
    pub items: Vec<NodeRecord>,
    /// Edges.
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
    /// Deletions.
    #[serde(default)]
    pub deletions: Vec<Tombstone>,
    /// Declared hash over `items`, `edges` and `deletions`.
    pub content_hash: String,
    /// Cursor to request the next page from.
    pub cursor: Cursor,
    /// Whether the sender claims more pages remain.
    pub has_more: bool,
    /// Replay-protection nonce.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Signature over the canonical encoding of the other fields.
    #[serde(default)]
    pub signature: String,
}

impl SyncPayload {
    /// Create an unsigned payload with its content hash filled in.
    pub fn new(
        instance_id: InstanceId,
        items: Vec<NodeRecord>,
        edges: Vec<EdgeRecord>,
        deletions: Vec<Tombstone>,
        cursor: Cursor,
        has_more: bool,
    ) -> Result<Self, WireError> {
        let content_hash = content_hash(&items, &edges, &deletions)?;
        Ok(Self {
            instance_id,
            items,
            edges,
            deletions,
            content_hash,
            cursor,
            has_more,
            nonce: None,
            timestamp: 0,
            signature: String::new(),
        })
    }

    /// Hash actually computed over the carried content.
    pub fn computed_hash(&self) -> Result<String, WireError> {
        content_hash(&self.items, &self.edges, &self.deletions)
    }

    /// Number of records carried.
    pub fn len(&self) -> usize {
        self.items.len() + self.edges.len() + self.deletions.len()
    }

    /// Whether the page carries nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

signed_message!(SyncPayload);

/// Acknowledgement of a pushed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAck {
    /// Acknowledging instance.
    pub instance_id: InstanceId,
    /// Cursor of the acknowledged page.
    pub cursor: Cursor,
    /// Records created or updated.
    pub accepted: u32,
    /// Records skipped, conflicted or queued for review.
    pub rejected: u32,
    /// Replay-protection nonce.
    #[serde(default)]
    pub nonce: Option<Nonce>,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Signature over the canonical encoding of the other fields.
    #[serde(default)]
    pub signature: String,
}

signed_message!(SyncAck);

/// Refusal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    /// Human-readable reason.
    pub reason: String,
}
