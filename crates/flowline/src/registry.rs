//! Node type registry for data-driven flow construction
//!
//! Maps node type strings to factories that turn a JSON `init` object into
//! a ready-to-use [`FlowNode`]. The builder resolves every registered pipe
//! of a [`FlowConfig`](crate::config::FlowConfig) through a registry.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register("double", |_init, _registry| {
//!     Ok(Arc::new(ActionNode::new(["x"], ["y"]).with_action(double)) as Arc<dyn FlowNode>)
//! });
//! ```
//!
//! Crates can also register factories at link time:
//!
//! ```ignore
//! inventory::submit!(flowline::NodeFactoryFn {
//!     node_type: "load-fasta",
//!     factory: LoadFastaNode::from_init,
//! });
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FlowError, Result};
use crate::node::FlowNode;

/// Factory turning init parameters into a node
///
/// The registry itself is passed along so composite nodes (such as
/// `split-join`) can build their inner node by type.
pub type NodeFactory = Arc<dyn Fn(&Value, &NodeRegistry) -> Result<Arc<dyn FlowNode>> + Send + Sync>;

/// Link-time registration of a node factory
pub struct NodeFactoryFn {
    /// The node type string used in flow configurations
    pub node_type: &'static str,
    /// Factory function pointer
    pub factory: fn(&Value, &NodeRegistry) -> Result<Arc<dyn FlowNode>>,
}

inventory::collect!(NodeFactoryFn);

/// Registry of node types and their factories
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(plugin_registry);
/// ```
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every factory submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<NodeFactoryFn> {
            let factory = entry.factory;
            registry.register(entry.node_type, factory);
        }
        log::debug!(
            "Node registry initialized with {} built-in types",
            registry.factories.len()
        );
        registry
    }

    /// Register a factory; an existing registration for the type is replaced
    pub fn register<F>(&mut self, node_type: impl Into<String>, factory: F)
    where
        F: Fn(&Value, &NodeRegistry) -> Result<Arc<dyn FlowNode>> + Send + Sync + 'static,
    {
        self.factories.insert(node_type.into(), Arc::new(factory));
    }

    /// Instantiate a node of the given type
    pub fn create(&self, node_type: &str, init: &Value) -> Result<Arc<dyn FlowNode>> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| FlowError::UnknownNodeType(node_type.to_string()))?;
        factory(init, self)
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// All registered node type strings, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.factories.extend(other.factories);
    }
}

/// Decode a factory's init parameters
///
/// A missing (`null`) init is read as an empty object.
pub fn parse_init<T: DeserializeOwned>(node_type: &str, init: &Value) -> Result<T> {
    let init = if init.is_null() {
        Value::Object(Default::default())
    } else {
        init.clone()
    };
    serde_json::from_value(init).map_err(|e| FlowError::InvalidInit {
        node_type: node_type.to_string(),
        message: e.to_string(),
    })
}
