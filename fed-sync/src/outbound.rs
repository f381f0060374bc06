//! Selecting local content to send to a peer.
//!
//! Used by the orchestrator when pushing and by the responder when
//! serving a pull. Only locally authored content leaves this instance:
//! anything that arrived through federation is never sent on, so content
//! cannot bounce between peers.

use crate::graph::{GraphError, GraphItem, GraphRepository};
use fed_trust::Peer;
use fed_types::{Cursor, EdgeRecord, NodeRecord, Origin, Tombstone};

/// One page of outgoing content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundPage {
    /// Nodes to send.
    pub nodes: Vec<NodeRecord>,
    /// Edges to send.
    pub edges: Vec<EdgeRecord>,
    /// Local deletions to announce.
    pub deletions: Vec<Tombstone>,
    /// Feed position covered by this page, filtered items included.
    pub cursor: Cursor,
    /// Whether the feed holds more changes after `cursor`.
    pub has_more: bool,
}

impl OutboundPage {
    /// Number of records selected.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len() + self.deletions.len()
    }

    /// Whether every scanned change was filtered out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a feed item may be sent to `peer`.
pub fn should_send(peer: &Peer, item: &GraphItem) -> bool {
    match item {
        GraphItem::Node(node) => {
            node.origin == Origin::Local
                && node.trust_level >= peer.push_min_trust
                && (peer.push_types.is_empty() || peer.push_types.contains(&node.node_type))
        }
        GraphItem::Edge(edge) => {
            edge.origin == Origin::Local && edge.trust_level >= peer.push_min_trust
        }
        GraphItem::Deletion(_) => true,
    }
}

/// Scan at most `limit` feed changes after `since` and keep what `peer` may receive.
///
/// The returned cursor covers every scanned change, so filtered items are
/// not scanned again.
pub async fn collect_page(
    graph: &dyn GraphRepository,
    peer: &Peer,
    since: Cursor,
    limit: u32,
) -> Result<OutboundPage, GraphError> {
    let limit = limit.max(1);
    let mut changes = graph.find_modified_since(since, limit + 1).await?;
    let has_more = changes.len() > limit as usize;
    changes.truncate(limit as usize);

    let mut page = OutboundPage {
        cursor: changes.last().map(|c| c.cursor).unwrap_or(since),
        has_more,
        ..OutboundPage::default()
    };
    for change in changes {
        if !should_send(peer, &change.item) {
            continue;
        }
        match change.item {
            GraphItem::Node(node) => page.nodes.push(node),
            GraphItem::Edge(edge) => page.edges.push(edge),
            GraphItem::Deletion(tombstone) => page.deletions.push(tombstone),
        }
    }
    Ok(page)
}
