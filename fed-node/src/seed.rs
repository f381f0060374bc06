//! Graph seed files.
//!
//! The node ships with an in-memory graph; a seed file fills it at startup.
//! The format is JSON:
//!
//! ```json
//! {
//!   "nodes": [{ "id": "n1", "node_type": "concept", "content": "...", "modified_at": 1700000000000 }],
//!   "edges": [{ "id": "e1", "source": "n1", "target": "n2", "edge_type": "cites", "modified_at": 1700000000000 }]
//! }
//! ```
//!
//! Seeded items are local. A missing `trust_level` means fully trusted.

use anyhow::{Context, Result};
use fed_sync::{GraphRepository, MemoryGraph};
use fed_types::{EdgeRecord, NodeRecord, Origin};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(default)]
    edges: Vec<Value>,
}

/// Load a seed file into a fresh graph.
pub async fn load(path: &Path) -> Result<MemoryGraph> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read seed {}", path.display()))?;
    let graph = MemoryGraph::new();
    let (nodes, edges) = fill(&graph, &contents).await?;
    tracing::info!(path = %path.display(), nodes, edges, "graph seeded");
    Ok(graph)
}

/// Parse `contents` into `graph`, returning the node and edge counts.
async fn fill(graph: &MemoryGraph, contents: &[u8]) -> Result<(usize, usize)> {
    let seed: SeedFile = serde_json::from_slice(contents).context("Malformed seed file")?;

    for (i, value) in seed.nodes.iter().enumerate() {
        let mut node: NodeRecord = serde_json::from_value(with_full_trust(value))
            .with_context(|| format!("Seed node #{i} is malformed"))?;
        node.origin = Origin::Local;
        graph.upsert_node(node).await?;
    }
    for (i, value) in seed.edges.iter().enumerate() {
        let mut edge: EdgeRecord = serde_json::from_value(with_full_trust(value))
            .with_context(|| format!("Seed edge #{i} is malformed"))?;
        edge.origin = Origin::Local;
        graph.upsert_edge(edge).await?;
    }
    Ok((seed.nodes.len(), seed.edges.len()))
}

fn with_full_trust(value: &Value) -> Value {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        map.entry("trust_level").or_insert(Value::from(1.0));
    }
    value
}
