//! Core value and identity types shared across the engine

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Input or output values of a node, keyed by port name.
///
/// Values are plain JSON, so cloning one is always a deep copy.
pub type PortValues = HashMap<String, serde_json::Value>;

/// Per-edge renaming of upstream output keys to downstream input keys
pub type EdgeMapping = BTreeMap<String, String>;

/// Identifier of a node inside a [`FlowGraph`](crate::graph::FlowGraph) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a node's ports are determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Ports are declared by the node itself
    Pipe,
    /// Ports are derived from the mappings on outgoing edges
    Source,
}

/// Build a `PortValues` map from key/value pairs
pub fn port_values<K, I>(pairs: I) -> PortValues
where
    K: Into<String>,
    I: IntoIterator<Item = (K, serde_json::Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Build an `EdgeMapping` from `(output, input)` pairs
pub fn edge_mapping<A, B, I>(pairs: I) -> EdgeMapping
where
    A: Into<String>,
    B: Into<String>,
    I: IntoIterator<Item = (A, B)>,
{
    pairs
        .into_iter()
        .map(|(from, to)| (from.into(), to.into()))
        .collect()
}

/// Sorted key list, used in diagnostics and error messages
pub fn sorted_keys(values: &PortValues) -> Vec<String> {
    let mut keys: Vec<String> = values.keys().cloned().collect();
    keys.sort();
    keys
}
