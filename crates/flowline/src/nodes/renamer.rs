//! Node that re-keys its inputs

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::node::FlowNode;
use crate::registry::{parse_init, NodeFactoryFn, NodeRegistry};
use crate::types::{EdgeMapping, PortValues};

/// Emits each input under a new name
#[derive(Debug, Clone)]
pub struct OutputRenamer {
    mapping: EdgeMapping,
}

impl OutputRenamer {
    /// `mapping` goes from input name to output name
    pub fn new(mapping: EdgeMapping) -> Self {
        Self { mapping }
    }

    /// Factory for the `output-renamer` node type: `{"mapping": {"from": "to"}}`
    pub fn from_init(init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        #[derive(Deserialize)]
        struct Init {
            mapping: EdgeMapping,
        }
        let Init { mapping } = parse_init("output-renamer", init)?;
        Ok(Arc::new(Self::new(mapping)))
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "output-renamer",
    factory: OutputRenamer::from_init,
});

#[async_trait]
impl FlowNode for OutputRenamer {
    fn label(&self) -> String {
        format!("OutputRenamer(Renaming: {:?})", self.mapping)
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        self.mapping.keys().cloned().collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.mapping.values().cloned().collect()
    }

    async fn execute(&self, mut inputs: PortValues) -> Result<PortValues> {
        Ok(self
            .mapping
            .iter()
            .filter_map(|(from, to)| inputs.remove(from).map(|v| (to.clone(), v)))
            .collect())
    }
}
