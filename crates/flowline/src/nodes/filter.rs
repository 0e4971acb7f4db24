//! Pass-through node that keeps a subset of keys

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::node::FlowNode;
use crate::registry::{parse_init, NodeFactoryFn, NodeRegistry};
use crate::types::PortValues;

/// Keeps only the listed keys
///
/// Typically inserted between a producer and a consumer to drop outputs that
/// would otherwise collide with another upstream's outputs.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    keep: Vec<String>,
}

impl OutputFilter {
    pub fn new<I>(keep: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let keep = keep
            .into_iter()
            .map(Into::into)
            .filter(|k: &String| seen.insert(k.clone()))
            .collect();
        Self { keep }
    }

    /// Factory for the `output-filter` node type: `{"keep": [...]}`
    pub fn from_init(init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        #[derive(Deserialize)]
        struct Init {
            keep: Vec<String>,
        }
        let Init { keep } = parse_init("output-filter", init)?;
        Ok(Arc::new(Self::new(keep)))
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "output-filter",
    factory: OutputFilter::from_init,
});

#[async_trait]
impl FlowNode for OutputFilter {
    fn label(&self) -> String {
        format!("OutputFilter(Passing: {:?})", self.keep)
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        self.keep.iter().cloned().collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.keep.clone()
    }

    async fn execute(&self, mut inputs: PortValues) -> Result<PortValues> {
        Ok(self
            .keep
            .iter()
            .filter_map(|key| inputs.remove_entry(key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::port_values;
    use serde_json::json;

    #[tokio::test]
    async fn test_filter_keeps_listed_keys() {
        let filter = OutputFilter::new(["A", "B"]);
        let out = filter
            .execute(port_values([("A", json!(1)), ("Extra", json!(2))]))
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out["A"], json!(1));
    }

    #[test]
    fn test_filter_dedupes_declaration() {
        let filter = OutputFilter::new(["A", "A", "B"]);
        assert_eq!(filter.outputs(), vec!["A", "B"]);
        assert_eq!(filter.required_inputs().len(), 2);
    }
}
