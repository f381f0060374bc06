//! Graph content exchanged between instances.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{ItemId, PeerId};

/// Where a stored item came from.
///
/// Outgoing sync only ever offers `Local` items, which keeps content from
/// bouncing back to the instance it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Authored on this instance.
    #[default]
    Local,
    /// Received from a federation peer.
    Federated {
        /// Local id of the peer the item was received from.
        peer: PeerId,
    },
}

impl Origin {
    /// Whether the item arrived through federation.
    pub fn is_federated(&self) -> bool {
        matches!(self, Origin::Federated { .. })
    }
}

/// Discriminates nodes from edges in tombstones and conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A graph node.
    Node,
    /// A typed edge.
    Edge,
}

/// A knowledge-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Logical id, shared across instances.
    pub id: ItemId,
    /// Node type (e.g. "concept", "document").
    pub node_type: String,
    /// Content body.
    pub content: String,
    /// Unordered labels; merged by union.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Free-form attributes; merged key-wise.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Last modification time (unix milliseconds, author's clock).
    pub modified_at: u64,
    /// Provenance. Overwritten on receipt.
    #[serde(default)]
    pub origin: Origin,
    /// Locally assigned trust level. Overwritten on receipt.
    #[serde(default)]
    pub trust_level: f64,
}

impl NodeRecord {
    /// Create a locally-authored node.
    pub fn new(id: impl Into<String>, node_type: &str, content: &str, modified_at: u64) -> Self {
        Self {
            id: ItemId::new(id),
            node_type: node_type.to_string(),
            content: content.to_string(),
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            modified_at,
            origin: Origin::Local,
            trust_level: 1.0,
        }
    }

    /// Add a tag (builder style).
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Whether two versions carry the same content, ignoring provenance.
    pub fn same_content(&self, other: &NodeRecord) -> bool {
        self.node_type == other.node_type
            && self.content == other.content
            && self.tags == other.tags
            && self.metadata == other.metadata
    }
}

/// A typed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Logical id, shared across instances.
    pub id: ItemId,
    /// Source node id.
    pub source: ItemId,
    /// Target node id.
    pub target: ItemId,
    /// Relationship type.
    pub edge_type: String,
    /// Relationship strength.
    #[serde(default)]
    pub weight: f64,
    /// Free-form attributes; merged key-wise.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Last modification time (unix milliseconds, author's clock).
    pub modified_at: u64,
    /// Provenance. Overwritten on receipt.
    #[serde(default)]
    pub origin: Origin,
    /// Locally assigned trust level. Overwritten on receipt.
    #[serde(default)]
    pub trust_level: f64,
}

impl EdgeRecord {
    /// Create a locally-authored edge.
    pub fn new(
        id: impl Into<String>,
        source: &str,
        target: &str,
        edge_type: &str,
        modified_at: u64,
    ) -> Self {
        Self {
            id: ItemId::new(id),
            source: ItemId::from(source),
            target: ItemId::from(target),
            edge_type: edge_type.to_string(),
            weight: 1.0,
            metadata: BTreeMap::new(),
            modified_at,
            origin: Origin::Local,
            trust_level: 1.0,
        }
    }

    /// Whether two versions carry the same content, ignoring provenance.
    pub fn same_content(&self, other: &EdgeRecord) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.edge_type == other.edge_type
            && self.weight == other.weight
            && self.metadata == other.metadata
    }
}

/// A deletion announced by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// The deleted item.
    pub item_id: ItemId,
    /// Node or edge.
    pub kind: ItemKind,
    /// Deletion time (unix milliseconds, author's clock).
    pub deleted_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_defaults_to_local() {
        let json = r#"{"id":"n1","node_type":"concept","content":"x","modified_at":5}"#;
        let node: NodeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(node.origin, Origin::Local);
        assert!(node.tags.is_empty());
    }

    #[test]
    fn federated_origin_wire_form() {
        let peer = PeerId::new();
        let json = serde_json::to_value(Origin::Federated { peer }).unwrap();
        assert_eq!(json["kind"], "federated");
        assert!(Origin::Federated { peer }.is_federated());
    }

    #[test]
    fn same_content_ignores_provenance() {
        let a = NodeRecord::new("n1", "concept", "body", 10).with_tag("rust");
        let mut b = a.clone();
        b.origin = Origin::Federated { peer: PeerId::new() };
        b.trust_level = 0.1;
        b.modified_at = 99;
        assert!(a.same_content(&b));

        b.content = "other".into();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn edge_same_content_checks_endpoints() {
        let a = EdgeRecord::new("e1", "n1", "n2", "cites", 1);
        let mut b = a.clone();
        assert!(a.same_content(&b));
        b.target = ItemId::from("n3");
        assert!(!a.same_content(&b));
    }
}
