//! Entry node of a built flow

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::FlowNode;
use crate::types::{NodeKind, PortValues};

/// Injects external values into a flow
///
/// A source declares no ports of its own. The graph derives them from the
/// mappings on its outgoing edges, which is why connecting a source always
/// needs a mapping (an empty one is allowed).
#[derive(Debug, Clone, Default)]
pub struct SourceNode {
    initial: PortValues,
}

impl SourceNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source seeded with values that external inputs may override
    pub fn with_initial_inputs(initial: PortValues) -> Self {
        Self { initial }
    }
}

#[async_trait]
impl FlowNode for SourceNode {
    fn label(&self) -> String {
        let mut keys: Vec<&String> = self.initial.keys().collect();
        keys.sort();
        format!("SourceNode(Initial: {:?})", keys)
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn outputs(&self) -> Vec<String> {
        Vec::new()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn initial_inputs(&self) -> PortValues {
        self.initial.clone()
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let mut out = self.initial.clone();
        out.extend(inputs);
        Ok(out)
    }
}
