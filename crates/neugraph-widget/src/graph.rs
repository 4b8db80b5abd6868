//! Connectivity graph handed to the viewer by its caller
//!
//! The graph is already materialized (parsing and layout happen elsewhere);
//! the widget only keeps it next to the selection so it can report selected
//! ids the graph does not know.

use neugraph_storage::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use std::collections::HashSet;

/// Node with free-form attributes (name, position, class, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identifier, shared with the trace files
    pub id: NodeId,
    /// Attributes carried through untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// Edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Attributes carried through untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// Node and edge lists plus directedness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    /// Nodes
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    /// Edges
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    /// Whether edges are directed
    #[serde(default)]
    pub directed: bool,
}

impl GraphData {
    /// Empty graph
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            ..Default::default()
        }
    }

    /// Add a node without attributes
    pub fn add_node(&mut self, id: impl Into<NodeId>) -> &mut Self {
        self.nodes.push(GraphNode {
            id: id.into(),
            attributes: Map::new(),
        });
        self
    }

    /// Add an edge without attributes
    pub fn add_edge(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> &mut Self {
        self.edges.push(GraphEdge {
            source: source.into(),
            target: target.into(),
            attributes: Map::new(),
        });
        self
    }

    /// True if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by id
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    /// True if `id` is a node of the graph
    pub fn contains_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Edges whose source or target is not a node of the graph
    pub fn dangling_edges(&self) -> Vec<&GraphEdge> {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()))
            .collect()
    }
}
