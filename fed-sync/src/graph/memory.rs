//! In-memory graph repository.

use super::{GraphChange, GraphError, GraphItem, GraphRepository};
use async_trait::async_trait;
use fed_types::{Cursor, EdgeRecord, ItemId, ItemKind, NodeRecord, Tombstone};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    seq: u64,
    nodes: HashMap<ItemId, NodeRecord>,
    edges: HashMap<ItemId, EdgeRecord>,
    // Latest feed position of each item; older positions are dropped.
    feed: BTreeMap<Cursor, GraphItem>,
    positions: HashMap<(ItemKind, ItemId), Cursor>,
}

impl Inner {
    fn record(&mut self, item: GraphItem) {
        self.seq += 1;
        let cursor = Cursor::new(self.seq);
        let key = (item.kind(), item.id().clone());
        if let Some(old) = self.positions.insert(key, cursor) {
            self.feed.remove(&old);
        }
        self.feed.insert(cursor, item);
    }
}

/// Graph repository held in memory.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryGraph {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delete an item locally, recording a tombstone in the feed.
    pub fn delete(&self, item_id: &ItemId, kind: ItemKind, deleted_at: u64) -> bool {
        let mut inner = self.lock();
        let existed = match kind {
            ItemKind::Node => inner.nodes.remove(item_id).is_some(),
            ItemKind::Edge => inner.edges.remove(item_id).is_some(),
        };
        if existed {
            inner.record(GraphItem::Deletion(Tombstone {
                item_id: item_id.clone(),
                kind,
                deleted_at,
            }));
        }
        existed
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.lock().edges.len()
    }

    /// All nodes, sorted by id.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<_> = self.lock().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Current feed head.
    pub fn head(&self) -> Cursor {
        Cursor::new(self.lock().seq)
    }
}

#[async_trait]
impl GraphRepository for MemoryGraph {
    async fn get_node(&self, id: &ItemId) -> Result<Option<NodeRecord>, GraphError> {
        Ok(self.lock().nodes.get(id).cloned())
    }

    async fn get_edge(&self, id: &ItemId) -> Result<Option<EdgeRecord>, GraphError> {
        Ok(self.lock().edges.get(id).cloned())
    }

    async fn upsert_node(&self, node: NodeRecord) -> Result<(), GraphError> {
        let mut inner = self.lock();
        if inner.nodes.get(&node.id) == Some(&node) {
            return Ok(());
        }
        inner.nodes.insert(node.id.clone(), node.clone());
        inner.record(GraphItem::Node(node));
        Ok(())
    }

    async fn upsert_edge(&self, edge: EdgeRecord) -> Result<(), GraphError> {
        let mut inner = self.lock();
        if inner.edges.get(&edge.id) == Some(&edge) {
            return Ok(());
        }
        inner.edges.insert(edge.id.clone(), edge.clone());
        inner.record(GraphItem::Edge(edge));
        Ok(())
    }

    async fn find_modified_since(
        &self,
        since: Cursor,
        limit: u32,
    ) -> Result<Vec<GraphChange>, GraphError> {
        let inner = self.lock();
        Ok(inner
            .feed
            .range(since.next()..)
            .take(limit as usize)
            .map(|(cursor, item)| GraphChange {
                cursor: *cursor,
                item: item.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_get() {
        let graph = MemoryGraph::new();
        let node = NodeRecord::new("n1", "concept", "hello", 10);
        graph.upsert_node(node.clone()).await.unwrap();

        assert_eq!(graph.get_node(&ItemId::from("n1")).await.unwrap(), Some(node));
        assert!(graph.get_edge(&ItemId::from("n1")).await.unwrap().is_none());
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn identical_upsert_does_not_advance_feed() {
        let graph = MemoryGraph::new();
        let node = NodeRecord::new("n1", "concept", "hello", 10);
        graph.upsert_node(node.clone()).await.unwrap();
        graph.upsert_node(node).await.unwrap();
        assert_eq!(graph.head(), Cursor::new(1));
    }

    #[tokio::test]
    async fn feed_keeps_latest_position_per_item() {
        let graph = MemoryGraph::new();
        graph
            .upsert_node(NodeRecord::new("n1", "concept", "v1", 10))
            .await
            .unwrap();
        graph
            .upsert_node(NodeRecord::new("n2", "concept", "x", 11))
            .await
            .unwrap();
        graph
            .upsert_node(NodeRecord::new("n1", "concept", "v2", 12))
            .await
            .unwrap();

        let changes = graph.find_modified_since(Cursor::zero(), 10).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].cursor, Cursor::new(2));
        assert_eq!(changes[1].cursor, Cursor::new(3));
        match &changes[1].item {
            GraphItem::Node(n) => assert_eq!(n.content, "v2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn feed_pages_by_cursor() {
        let graph = MemoryGraph::new();
        for i in 0..5 {
            graph
                .upsert_node(NodeRecord::new(format!("n{i}"), "concept", "x", i))
                .await
                .unwrap();
        }
        let first = graph.find_modified_since(Cursor::zero(), 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = graph.find_modified_since(first[1].cursor, 10).await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].cursor, Cursor::new(3));
    }

    #[tokio::test]
    async fn delete_records_tombstone() {
        let graph = MemoryGraph::new();
        graph
            .upsert_edge(EdgeRecord::new("e1", "a", "b", "cites", 5))
            .await
            .unwrap();
        assert!(graph.delete(&ItemId::from("e1"), ItemKind::Edge, 6));
        assert!(!graph.delete(&ItemId::from("e1"), ItemKind::Edge, 7));
        assert_eq!(graph.edge_count(), 0);

        let changes = graph.find_modified_since(Cursor::zero(), 10).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0].item, GraphItem::Deletion(_)));
    }
}
