//! Governance collaborator: where decisions a machine should not make go.
//!
//! Unresolved conflicts, remote deletions and content accepted from
//! limited-tier peers are handed to an external reviewer.

use crate::graph::GraphItem;
use async_trait::async_trait;
use fed_core::ConflictStrategy;
use fed_types::{ItemId, ItemKind, PeerId, Tombstone};
use std::sync::{Arc, Mutex};

/// Governance collaborator errors.
#[derive(Debug, thiserror::Error)]
#[error("governance backend error: {0}")]
pub struct GovernanceError(pub String);

/// A conflict neither side of which was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    /// Peer the remote version came from.
    pub peer: PeerId,
    /// Item id.
    pub item_id: ItemId,
    /// Item kind.
    pub kind: ItemKind,
    /// Strategy configured for the peer.
    pub strategy: ConflictStrategy,
    /// Local version.
    pub local: GraphItem,
    /// Remote version, already marked as federated.
    pub remote: GraphItem,
}

/// External review queue.
#[async_trait]
pub trait Governance: Send + Sync {
    /// Queue a conflict for manual resolution.
    async fn submit_conflict(&self, report: ConflictReport) -> Result<(), GovernanceError>;

    /// Queue a remote deletion for review. Never applied automatically.
    async fn flag_deletion(&self, peer: PeerId, deletion: Tombstone) -> Result<(), GovernanceError>;

    /// Flag an item that was applied from a peer whose content needs review.
    async fn review_accepted(&self, peer: PeerId, item: GraphItem) -> Result<(), GovernanceError>;
}

#[derive(Debug, Default)]
struct Recorded {
    conflicts: Vec<ConflictReport>,
    deletions: Vec<(PeerId, Tombstone)>,
    reviews: Vec<(PeerId, GraphItem)>,
}

/// Governance that keeps everything in memory.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct RecordingGovernance {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingGovernance {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Conflicts submitted so far.
    pub fn conflicts(&self) -> Vec<ConflictReport> {
        self.lock().conflicts.clone()
    }

    /// Deletions flagged so far.
    pub fn deletions(&self) -> Vec<(PeerId, Tombstone)> {
        self.lock().deletions.clone()
    }

    /// Accepted items flagged for review so far.
    pub fn reviews(&self) -> Vec<(PeerId, GraphItem)> {
        self.lock().reviews.clone()
    }
}

#[async_trait]
impl Governance for RecordingGovernance {
    async fn submit_conflict(&self, report: ConflictReport) -> Result<(), GovernanceError> {
        self.lock().conflicts.push(report);
        Ok(())
    }

    async fn flag_deletion(&self, peer: PeerId, deletion: Tombstone) -> Result<(), GovernanceError> {
        self.lock().deletions.push((peer, deletion));
        Ok(())
    }

    async fn review_accepted(&self, peer: PeerId, item: GraphItem) -> Result<(), GovernanceError> {
        self.lock().reviews.push((peer, item));
        Ok(())
    }
}
