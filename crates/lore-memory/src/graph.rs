//! Entity graph types and breadth-first traversal.
//!
//! Edges may carry a `piece_id` property linking the relation to the
//! knowledge piece it was extracted from; retrieval resolves those into
//! graph-sourced results.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::backend::EntityGraphStore;
use crate::error::Result;

/// Edge property naming the piece an edge was extracted from.
pub const PIECE_ID_PROPERTY: &str = "piece_id";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A node/entity in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    /// Node type (e.g., "person", "tool", "concept").
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

fn default_node_type() -> String {
    "entity".to_string()
}

impl GraphNode {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            label: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Display name: the label if set, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.node_id)
    }
}

/// A directed, typed relation between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    /// Relation type (e.g., "uses", "depends_on", "prefers").
    pub edge_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl GraphEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            edge_type: edge_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Link this edge to the piece it was extracted from.
    pub fn with_piece(self, piece_id: impl Into<String>) -> Self {
        let id = piece_id.into();
        self.with_property(PIECE_ID_PROPERTY, serde_json::Value::String(id))
    }

    /// The originating piece id, if recorded.
    pub fn piece_id(&self) -> Option<&str> {
        self.properties
            .get(PIECE_ID_PROPERTY)
            .and_then(|v| v.as_str())
    }

    /// The endpoint opposite `node_id`, if `node_id` is one of the ends.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source_id == node_id {
            Some(&self.target_id)
        } else if self.target_id == node_id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// Which edges to return for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeDirection {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl EdgeDirection {
    pub(crate) fn matches(&self, edge: &GraphEdge, node_id: &str) -> bool {
        match self {
            EdgeDirection::Outgoing => edge.source_id == node_id,
            EdgeDirection::Incoming => edge.target_id == node_id,
            EdgeDirection::Both => edge.source_id == node_id || edge.target_id == node_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Traversal
// ─────────────────────────────────────────────────────────────────────────────

/// Breadth-first neighbors of `start` up to `max_depth` hops, ignoring
/// edge direction. Each reachable node is reported once with its shortest
/// depth; the start node is excluded. Nodes only known through edges get a
/// placeholder [`GraphNode`].
pub fn bfs_neighbors<G>(
    graph: &G,
    start: &str,
    max_depth: usize,
) -> Result<Vec<(GraphNode, usize)>>
where
    G: EntityGraphStore + ?Sized,
{
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));
    let mut found = Vec::new();

    while let Some((node_id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let mut next: Vec<String> = graph
            .get_relations(&node_id, EdgeDirection::Both)?
            .iter()
            .filter_map(|e| e.other_end(&node_id).map(str::to_string))
            .collect();
        next.sort();
        next.dedup();

        for neighbor in next {
            if !visited.insert(neighbor.clone()) {
                continue;
            }
            let node = graph
                .get_node(&neighbor)?
                .unwrap_or_else(|| GraphNode::new(neighbor.clone(), default_node_type()));
            found.push((node, depth + 1));
            queue.push_back((neighbor, depth + 1));
        }
    }

    Ok(found)
}
