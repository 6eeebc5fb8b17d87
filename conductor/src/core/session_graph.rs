//! Session graph recording for run traces.

use crate::core::types::{SessionEdge, SessionGraph, SessionNode};

impl SessionGraph {
    /// Record a node unless an identical one is already present.
    pub fn add_node(&mut self, node: SessionNode) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// Append a delegation edge. Edges are never deduplicated.
    pub fn add_edge(&mut self, from: &str, to: &str, reason: Option<String>) {
        self.edges.push(SessionEdge {
            from_agent_id: from.to_string(),
            to_agent_id: to.to_string(),
            reason,
        });
    }
}
