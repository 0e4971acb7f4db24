//! Node arena and edge wiring
//!
//! A [`FlowGraph`] owns every node of a flow. Nodes are addressed by the
//! [`NodeId`] handed out when they are added; downstream edges carry an
//! optional [`EdgeMapping`] that renames the upstream's output keys to the
//! downstream's input keys.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::node::FlowNode;
use crate::types::{EdgeMapping, NodeId, NodeKind};

/// A downstream connection
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Downstream node
    pub target: NodeId,
    /// Explicit output-to-input mapping, if one was given
    pub mapping: Option<EdgeMapping>,
}

impl GraphEdge {
    /// The mapping that applies at runtime; an empty mapping means pass-through
    pub fn explicit_mapping(&self) -> Option<&EdgeMapping> {
        self.mapping.as_ref().filter(|m| !m.is_empty())
    }
}

/// A node slot in the arena
pub struct GraphNode {
    /// Name given by the builder or caller, if any
    pub name: Option<String>,
    /// The node implementation
    pub node: Arc<dyn FlowNode>,
    /// Outgoing edges, in insertion order
    pub downstream: Vec<GraphEdge>,
}

/// Arena of nodes plus their downstream edges
#[derive(Default)]
pub struct FlowGraph {
    nodes: Vec<GraphNode>,
}

impl FlowGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add an unnamed node
    pub fn add_node(&mut self, node: impl FlowNode + 'static) -> NodeId {
        self.insert(None, Arc::new(node))
    }

    /// Add a node under a name used in diagnostics
    pub fn add_named_node(&mut self, name: impl Into<String>, node: impl FlowNode + 'static) -> NodeId {
        self.insert(Some(name.into()), Arc::new(node))
    }

    /// Add an already shared node
    pub fn add_shared_node(&mut self, name: Option<String>, node: Arc<dyn FlowNode>) -> NodeId {
        self.insert(name, node)
    }

    fn insert(&mut self, name: Option<String>, node: Arc<dyn FlowNode>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            name,
            node,
            downstream: Vec::new(),
        });
        id
    }

    /// Connect `from` to `to`
    ///
    /// Sources require `Some` mapping (an empty one is fine). Connecting the
    /// same pair twice replaces the earlier mapping.
    pub fn connect(&mut self, from: NodeId, to: NodeId, mapping: Option<EdgeMapping>) -> Result<()> {
        self.get(to)?;
        let is_source = self.get(from)?.node.kind() == NodeKind::Source;
        if is_source && mapping.is_none() {
            return Err(FlowError::MissingSourceMapping {
                target: self.display_name(to),
            });
        }

        let target_name = self.display_name(to);
        let slot = &mut self.nodes[from.index()];
        if let Some(existing) = slot.downstream.iter_mut().find(|e| e.target == to) {
            log::warn!(
                "Replacing existing edge mapping from {} to {}",
                from,
                target_name
            );
            existing.mapping = mapping;
        } else {
            slot.downstream.push(GraphEdge { target: to, mapping });
        }
        Ok(())
    }

    fn get(&self, id: NodeId) -> Result<&GraphNode> {
        self.nodes.get(id.index()).ok_or(FlowError::UnknownNode(id))
    }

    /// Whether the ID belongs to this graph
    pub fn contains(&self, id: NodeId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Number of nodes in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node IDs in insertion order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// The node implementation behind an ID
    pub fn node(&self, id: NodeId) -> Option<&Arc<dyn FlowNode>> {
        self.nodes.get(id.index()).map(|n| &n.node)
    }

    /// The name a node was registered under
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.index()).and_then(|n| n.name.as_deref())
    }

    /// Outgoing edges of a node (empty for unknown IDs)
    pub fn downstream(&self, id: NodeId) -> &[GraphEdge] {
        self.nodes
            .get(id.index())
            .map(|n| n.downstream.as_slice())
            .unwrap_or(&[])
    }

    /// The explicit, non-empty mapping on the edge `from -> to`
    pub fn edge_mapping(&self, from: NodeId, to: NodeId) -> Option<&EdgeMapping> {
        self.downstream(from)
            .iter()
            .find(|e| e.target == to)
            .and_then(GraphEdge::explicit_mapping)
    }

    /// A node without downstream edges
    pub fn is_sink(&self, id: NodeId) -> bool {
        self.downstream(id).is_empty()
    }

    fn is_source(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.kind() == NodeKind::Source)
    }

    /// Declared outputs; sources report the union of their edge mapping keys
    pub fn effective_outputs(&self, id: NodeId) -> Vec<String> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        if !self.is_source(id) {
            return node.outputs();
        }

        let keys: BTreeSet<String> = self
            .downstream(id)
            .iter()
            .filter_map(|e| e.mapping.as_ref())
            .flat_map(|m| m.keys().cloned())
            .collect();
        keys.into_iter().collect()
    }

    /// Declared inputs; sources report the targets of their first non-empty mapping only
    pub fn effective_inputs(&self, id: NodeId) -> BTreeSet<String> {
        let Some(node) = self.node(id) else {
            return BTreeSet::new();
        };
        if !self.is_source(id) {
            return node.inputs();
        }

        self.downstream(id)
            .iter()
            .find_map(GraphEdge::explicit_mapping)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Inputs the scheduler waits for; sources never wait
    pub fn effective_required_inputs(&self, id: NodeId) -> BTreeSet<String> {
        match self.node(id) {
            Some(_) if self.is_source(id) => BTreeSet::new(),
            Some(node) => node.required_inputs(),
            None => BTreeSet::new(),
        }
    }

    /// Inputs that may fall back to a node-local default
    pub fn effective_optional_inputs(&self, id: NodeId) -> BTreeSet<String> {
        if self.is_source(id) {
            return self.effective_inputs(id);
        }
        self.node(id).map(|n| n.optional_inputs()).unwrap_or_default()
    }

    /// Every node reachable from `root`, in depth-first discovery order
    pub fn reachable_from(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if !self.contains(root) {
            return order;
        }

        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            for edge in self.downstream(id).iter().rev() {
                if !seen.contains(&edge.target) {
                    stack.push(edge.target);
                }
            }
        }
        order
    }

    /// Human-readable identity of a node: its name (if any), label and ID
    pub fn display_name(&self, id: NodeId) -> String {
        match self.nodes.get(id.index()) {
            Some(GraphNode {
                name: Some(name),
                node,
                ..
            }) => format!("'{}' {}", name, node.label()),
            Some(slot) => format!("{} {}", slot.node.label(), id),
            None => format!("<unknown {}>", id),
        }
    }

    /// Full structural dump used when validation fails
    pub fn describe(&self) -> String {
        let mut out = String::from("Current flow structure:\n");
        for id in self.node_ids() {
            let name = self.name(id).unwrap_or("<unnamed>");
            if self.is_source(id) {
                let _ = writeln!(
                    out,
                    "Source '{}' {} providing {:?} with {} downstream connections",
                    name,
                    id,
                    self.effective_outputs(id),
                    self.downstream(id).len()
                );
                continue;
            }
            let label = self.node(id).map(|n| n.label()).unwrap_or_default();
            let _ = writeln!(out, "Pipe '{}' {}: {}", name, id, label);
            let _ = writeln!(out, "  Inputs: {:?}", self.effective_inputs(id));
            let _ = writeln!(out, "  Required inputs: {:?}", self.effective_required_inputs(id));
            let _ = writeln!(out, "  Optional inputs: {:?}", self.effective_optional_inputs(id));
            let _ = writeln!(out, "  Outputs: {:?}", self.effective_outputs(id));
            let _ = writeln!(out, "  Downstream connections: {}", self.downstream(id).len());
        }
        out
    }
}
