//! A whole flow used as a single node

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FlowError, Result};
use crate::manager::FlowManager;
use crate::node::FlowNode;
use crate::types::{EdgeMapping, PortValues};

/// Runs a nested [`FlowManager`] on its inputs
///
/// Result keys are renamed through the output mapping when one is set; keys
/// the mapping does not mention pass through under their own name.
pub struct SubPipeline {
    manager: Arc<FlowManager>,
    inputs: BTreeSet<String>,
    outputs: Vec<String>,
    output_mapping: EdgeMapping,
}

impl SubPipeline {
    pub fn new<I, O>(manager: impl Into<Arc<FlowManager>>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            manager: manager.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            output_mapping: EdgeMapping::new(),
        }
    }

    /// Rename nested result keys (nested name to exposed name)
    pub fn with_output_mapping(mut self, mapping: EdgeMapping) -> Self {
        self.output_mapping = mapping;
        self
    }
}

#[async_trait]
impl FlowNode for SubPipeline {
    fn label(&self) -> String {
        format!(
            "SubPipeline(Inputs: {:?}, Outputs: {:?})",
            self.inputs, self.outputs
        )
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let result = self
            .manager
            .run(inputs)
            .await
            .map_err(|e| FlowError::SubPipelineFailed {
                source: Box::new(e),
            })?;

        if self.output_mapping.is_empty() {
            return Ok(result);
        }

        Ok(result
            .into_iter()
            .map(|(key, value)| match self.output_mapping.get(&key) {
                Some(renamed) => (renamed.clone(), value),
                None => (key, value),
            })
            .collect())
    }
}
