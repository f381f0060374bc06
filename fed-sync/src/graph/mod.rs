//! Graph repository interface.
//!
//! The knowledge-graph store is an external collaborator. Federation needs
//! point lookups, idempotent upserts and a change feed ordered by a
//! monotonically increasing cursor.

mod memory;

pub use memory::MemoryGraph;

use async_trait::async_trait;
use fed_types::{Cursor, EdgeRecord, ItemId, ItemKind, NodeRecord, Tombstone};

/// Graph repository errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Backend failure.
    #[error("graph backend error: {0}")]
    Backend(String),
}

/// One item in the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphItem {
    /// A node.
    Node(NodeRecord),
    /// An edge.
    Edge(EdgeRecord),
    /// A deletion.
    Deletion(Tombstone),
}

impl GraphItem {
    /// Id of the item.
    pub fn id(&self) -> &ItemId {
        match self {
            GraphItem::Node(n) => &n.id,
            GraphItem::Edge(e) => &e.id,
            GraphItem::Deletion(t) => &t.item_id,
        }
    }

    /// Kind of the item.
    pub fn kind(&self) -> ItemKind {
        match self {
            GraphItem::Node(_) => ItemKind::Node,
            GraphItem::Edge(_) => ItemKind::Edge,
            GraphItem::Deletion(t) => t.kind,
        }
    }
}

/// A change feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphChange {
    /// Position in the feed.
    pub cursor: Cursor,
    /// What changed.
    pub item: GraphItem,
}

/// Storage backend for graph content.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Get a node by id.
    async fn get_node(&self, id: &ItemId) -> Result<Option<NodeRecord>, GraphError>;

    /// Get an edge by id.
    async fn get_edge(&self, id: &ItemId) -> Result<Option<EdgeRecord>, GraphError>;

    /// Insert or replace a node. Writing identical content is a no-op.
    async fn upsert_node(&self, node: NodeRecord) -> Result<(), GraphError>;

    /// Insert or replace an edge. Writing identical content is a no-op.
    async fn upsert_edge(&self, edge: EdgeRecord) -> Result<(), GraphError>;

    /// Changes strictly after `since`, in cursor order, at most `limit`.
    async fn find_modified_since(
        &self,
        since: Cursor,
        limit: u32,
    ) -> Result<Vec<GraphChange>, GraphError>;
}
