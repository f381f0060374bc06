//! Error types for fed-sync.

use crate::graph::GraphError;
use crate::governance::GovernanceError;
use crate::transport::TransportError;
use fed_core::{RunError, TrustEventKind};
use fed_security::SecurityError;
use fed_trust::TrustError;
use fed_types::{InstanceId, PeerId, WireError};

/// Sync errors.
///
/// Conflicts are never errors; they are resolved or queued for review.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Security layer rejection (signature, nonce, destination, certificate).
    #[error("security rejection: {0}")]
    Security(#[from] SecurityError),

    /// Trust manager or peer storage error.
    #[error("trust error: {0}")]
    Trust(#[from] TrustError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Payload content does not match its declared hash.
    #[error("content hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        /// Hash in the payload.
        declared: String,
        /// Hash of the content received.
        computed: String,
    },

    /// Peer sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Peer refused the request.
    #[error("peer rejected request: {0}")]
    Rejected(String),

    /// Pagination stopped at the configured cap.
    #[error("iteration cap of {0} pages reached")]
    IterationCap(u32),

    /// Run exceeded its wall-clock budget.
    #[error("sync run timed out after {0}s")]
    Timeout(u64),

    /// Peer synced too recently for its tier.
    #[error("rate limited: peer {0}")]
    RateLimited(PeerId),

    /// Peer's tier or status does not permit this sync.
    #[error("peer {peer} not admitted: {reason}")]
    NotAdmitted {
        /// Peer id.
        peer: PeerId,
        /// Why.
        reason: String,
    },

    /// Inbound message from an instance with no registration.
    #[error("unknown peer instance {0}")]
    UnknownPeer(InstanceId),

    /// Run phase machine misuse.
    #[error("run state error: {0}")]
    Run(#[from] RunError),

    /// Graph repository failure.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Governance collaborator failure.
    #[error("governance error: {0}")]
    Governance(#[from] GovernanceError),
}

/// Broad category of a sync error; decides the trust consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Signature, nonce, destination or certificate failure.
    Security,
    /// Content hash or wire-format failure.
    Integrity,
    /// Iteration cap or timeout.
    ResourceLimit,
    /// Rate limit, tier or status refusal. Nothing was attempted.
    Admission,
    /// Network failure or peer refusal.
    Transport,
    /// Local failure.
    Internal,
}

impl ErrorClass {
    /// Trust event to record against the peer, if any.
    pub fn trust_event(&self) -> Option<TrustEventKind> {
        match self {
            ErrorClass::Security => Some(TrustEventKind::SecurityRejection),
            ErrorClass::Integrity | ErrorClass::ResourceLimit | ErrorClass::Transport => {
                Some(TrustEventKind::SyncFailure)
            }
            ErrorClass::Admission | ErrorClass::Internal => None,
        }
    }

    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Security => "security",
            ErrorClass::Integrity => "integrity",
            ErrorClass::ResourceLimit => "resource_limit",
            ErrorClass::Admission => "admission",
            ErrorClass::Transport => "transport",
            ErrorClass::Internal => "internal",
        }
    }
}

impl SyncError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Security(e) => match e {
                SecurityError::Resolution { .. } => ErrorClass::Transport,
                SecurityError::Wire(_) => ErrorClass::Integrity,
                SecurityError::KeyStore(_) | SecurityError::Io(_) => ErrorClass::Internal,
                _ => ErrorClass::Security,
            },
            SyncError::Trust(TrustError::Revoked(_)) => ErrorClass::Admission,
            SyncError::Trust(_) => ErrorClass::Internal,
            SyncError::Transport(_) | SyncError::Rejected(_) => ErrorClass::Transport,
            SyncError::Wire(_) | SyncError::HashMismatch { .. } | SyncError::Protocol(_) => {
                ErrorClass::Integrity
            }
            SyncError::IterationCap(_) | SyncError::Timeout(_) => ErrorClass::ResourceLimit,
            SyncError::RateLimited(_)
            | SyncError::NotAdmitted { .. }
            | SyncError::UnknownPeer(_) => ErrorClass::Admission,
            SyncError::Run(_) | SyncError::Graph(_) | SyncError::Governance(_) => {
                ErrorClass::Internal
            }
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
