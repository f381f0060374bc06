//! Persistence for peers and their trust history.

mod sqlite;

pub use sqlite::SqlitePeerStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use fed_core::{ConflictStrategy, PeerStatus, TrustEventKind, TrustTier};
use fed_types::{Cursor, InstanceId, PeerId, SyncDirection};

/// A registered remote instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Local id.
    pub id: PeerId,
    /// Operator-facing label.
    pub name: String,
    /// Base URL of the peer's federation endpoint.
    pub base_url: String,
    /// Ed25519 public key.
    pub public_key: [u8; 32],
    /// Locally computed trust, always in [0, 1].
    pub trust_score: f64,
    /// Lifecycle status.
    pub status: PeerStatus,
    /// Configured sync direction.
    pub direction: SyncDirection,
    /// Conflict strategy for content from this peer.
    pub conflict_strategy: ConflictStrategy,
    /// Only local items with at least this trust level are pushed.
    pub push_min_trust: f64,
    /// Node types pushed to this peer; empty means all.
    pub push_types: Vec<String>,
    /// Last committed pull cursor.
    pub pull_cursor: Cursor,
    /// Last acknowledged push cursor.
    pub push_cursor: Cursor,
    /// Runs started.
    pub syncs_attempted: u64,
    /// Runs completed.
    pub syncs_succeeded: u64,
    /// Items written locally from this peer.
    pub items_received: u64,
    /// Items acknowledged by this peer.
    pub items_sent: u64,
    /// Registration time (unix seconds).
    pub registered_at: u64,
    /// Last run end, successful or not.
    pub last_sync_at: Option<u64>,
    /// Last successful run.
    pub last_success_at: Option<u64>,
    /// Last verified handshake.
    pub last_verified_at: Option<u64>,
    /// End of the last inactivity window charged.
    pub inactivity_checkpoint: Option<u64>,
    /// Last time verification decay was charged.
    pub verification_checkpoint: Option<u64>,
    /// When we last acknowledged a page pushed by this peer (unix ms).
    pub inbound_checkpoint_ms: Option<u64>,
}

impl Peer {
    /// Tier derived from the current score.
    pub fn tier(&self) -> TrustTier {
        TrustTier::from_score(self.trust_score)
    }

    /// Instance id implied by the registered key.
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::from_public_key(&self.public_key)
    }

    /// Conflict checkpoint for pulled content: our last successful run
    /// against this peer, in unix milliseconds.
    pub fn checkpoint_ms(&self) -> u64 {
        self.last_success_at.unwrap_or(0).saturating_mul(1000)
    }

    /// Conflict checkpoint for pushed content: the last page this peer
    /// pushed to us that we acknowledged, in unix milliseconds.
    pub fn inbound_checkpoint(&self) -> u64 {
        self.inbound_checkpoint_ms.unwrap_or(0)
    }

    /// Whether this peer is permanently barred.
    pub fn is_revoked(&self) -> bool {
        self.status == PeerStatus::Revoked
    }
}

/// Operator input for registering a peer.
#[derive(Debug, Clone)]
pub struct PeerRegistration {
    /// Operator-facing label.
    pub name: String,
    /// Base URL of the peer's federation endpoint.
    pub base_url: String,
    /// Ed25519 public key.
    pub public_key: [u8; 32],
    /// Sync direction.
    pub direction: SyncDirection,
    /// Conflict strategy.
    pub conflict_strategy: ConflictStrategy,
    /// Minimum local item trust to push.
    pub push_min_trust: f64,
    /// Node types to push; empty means all.
    pub push_types: Vec<String>,
}

impl PeerRegistration {
    /// Registration with defaults: bidirectional, newer-timestamp, push everything local.
    pub fn new(name: &str, base_url: &str, public_key: [u8; 32]) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            public_key,
            direction: SyncDirection::Bidirectional,
            conflict_strategy: ConflictStrategy::default(),
            push_min_trust: 0.0,
            push_types: Vec::new(),
        }
    }
}

/// One entry in a peer's trust history.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustEvent {
    /// Peer the event applies to.
    pub peer_id: PeerId,
    /// What happened.
    pub kind: TrustEventKind,
    /// Score change actually applied.
    pub delta: f64,
    /// Score after the change.
    pub score_after: f64,
    /// Unix seconds.
    pub timestamp: u64,
    /// Free-text context.
    pub reason: Option<String>,
}

/// Storage backend for peers and trust events.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Insert a new peer.
    async fn insert_peer(&self, peer: &Peer) -> StorageResult<()>;

    /// Get a peer by id.
    async fn get_peer(&self, id: &PeerId) -> StorageResult<Option<Peer>>;

    /// Overwrite a peer's stored state.
    async fn update_peer(&self, peer: &Peer) -> StorageResult<()>;

    /// All peers, oldest registration first.
    async fn list_peers(&self) -> StorageResult<Vec<Peer>>;

    /// Peer registered for a public key, preferring live registrations.
    async fn find_by_public_key(&self, public_key: &[u8; 32]) -> StorageResult<Option<Peer>>;

    /// Persist the peer's new state together with the event that caused it.
    ///
    /// History beyond `max_history` events is trimmed, oldest first.
    async fn append_event(
        &self,
        peer: &Peer,
        event: &TrustEvent,
        max_history: usize,
    ) -> StorageResult<()>;

    /// Most recent events for a peer, newest first.
    async fn list_events(&self, peer: &PeerId, limit: u32) -> StorageResult<Vec<TrustEvent>>;

    /// Number of stored events for a peer.
    async fn count_events(&self, peer: &PeerId) -> StorageResult<u64>;
}
