//! Graph index
//!
//! Resolves node ids to live node instances and answers reachability
//! questions (who points at a node, which nodes a list of ids resolves to).
//!
//! The topology of a run is frozen: the index is built once when the
//! run-context loads its graph and offers no way to add or remove nodes.
//! Nodes rely on this to cache their entrance lists for the lifetime of the
//! run.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::node::NodeId;

/// A node that can be placed in a [`GraphIndex`]
pub trait GraphNode: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// Every successor id this node declares, in declaration order
    ///
    /// May contain empty ids and ids of nodes that no longer exist; the index
    /// filters both.
    fn exit_ids(&self) -> Vec<NodeId>;
}

/// Id-to-node mapping for one run, in graph document order
pub struct GraphIndex<N> {
    nodes: IndexMap<NodeId, Arc<N>>,
}

impl<N> Default for GraphIndex<N> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }
}

impl<N> std::fmt::Debug for GraphIndex<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIndex")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<N: GraphNode> GraphIndex<N> {
    /// Build the index. When two nodes share an id the later one wins.
    pub fn new(nodes: impl IntoIterator<Item = Arc<N>>) -> Self {
        let mut index = IndexMap::new();
        for node in nodes {
            let id = node.node_id().clone();
            if index.insert(id.clone(), node).is_some() {
                tracing::warn!("Duplicate node id {id} in graph, keeping the last definition");
            }
        }

        Self { nodes: index }
    }

    /// Resolve a single id. Empty and unknown ids resolve to `None`.
    pub fn get(&self, id: &str) -> Option<Arc<N>> {
        if id.is_empty() {
            return None;
        }

        self.nodes.get(id).cloned()
    }

    /// Position of a node in document order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Resolve a list of ids, silently dropping the ones that do not resolve
    pub fn resolve(&self, ids: &[NodeId]) -> Vec<Arc<N>> {
        ids.iter().filter_map(|id| self.get(id.as_str())).collect()
    }

    /// Ids of every node whose exit list references `target`
    ///
    /// Full scan over the graph. The result is de-duplicated and ordered by
    /// the position of the referring node in the graph. `target` itself does
    /// not need to be present in the index.
    pub fn entrance_ids(&self, target: &NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        if target.is_empty() {
            return result;
        }

        for node in self.nodes.values() {
            let points_here = node
                .exit_ids()
                .iter()
                .any(|exit| !exit.is_empty() && exit == target);

            if points_here && seen.insert(node.node_id().clone()) {
                result.push(node.node_id().clone());
            }
        }

        result
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<N>> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
