//! The node contract and the general-purpose action node
//!
//! Every stage of a flow implements [`FlowNode`]: it declares named inputs
//! (split into required and optional), an ordered list of outputs, and an
//! `execute` function from an input map to an output map. Side effects stay
//! inside `execute` and are reported only through outputs or errors, since a
//! split/join node may run the same node concurrently on several workers.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FlowError, Result};
use crate::types::{NodeKind, PortValues};

/// Atomic unit of computation in a flow
#[async_trait]
pub trait FlowNode: Send + Sync {
    /// Debug-friendly description used in diagnostics and error messages
    fn label(&self) -> String;

    /// Inputs that must be present before the node can execute
    fn required_inputs(&self) -> BTreeSet<String>;

    /// Inputs the node can default when absent
    fn optional_inputs(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// All declared inputs (required and optional)
    fn inputs(&self) -> BTreeSet<String> {
        let mut all = self.required_inputs();
        all.extend(self.optional_inputs());
        all
    }

    /// Declared output names, in declaration order
    fn outputs(&self) -> Vec<String>;

    /// Whether ports are declared or derived from outgoing edges
    fn kind(&self) -> NodeKind {
        NodeKind::Pipe
    }

    /// Values seeded into the node's accumulator when it is the root of a run
    fn initial_inputs(&self) -> PortValues {
        PortValues::new()
    }

    /// Run the node on its accumulated inputs
    async fn execute(&self, inputs: PortValues) -> Result<PortValues>;
}

type SyncAction = dyn Fn(PortValues) -> Result<PortValues> + Send + Sync;
type AsyncAction =
    dyn Fn(PortValues) -> Pin<Box<dyn Future<Output = Result<PortValues>> + Send>> + Send + Sync;

#[derive(Clone)]
enum Action {
    Sync(Arc<SyncAction>),
    Async(Arc<AsyncAction>),
}

/// General-purpose node backed by a closure
///
/// # Example
///
/// ```ignore
/// let double = ActionNode::new(["A"], ["B"]).with_action(|inputs| {
///     let a = inputs["A"].as_i64().unwrap_or_default();
///     Ok(port_values([("B", json!(a * 2))]))
/// });
/// ```
#[derive(Clone)]
pub struct ActionNode {
    required: BTreeSet<String>,
    defaults: PortValues,
    outputs: Vec<String>,
    action: Option<Action>,
}

impl ActionNode {
    /// Create a node with required inputs and declared outputs, but no action yet
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required: inputs.into_iter().map(Into::into).collect(),
            defaults: PortValues::new(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            action: None,
        }
    }

    /// Install a synchronous action
    pub fn with_action(
        mut self,
        action: impl Fn(PortValues) -> Result<PortValues> + Send + Sync + 'static,
    ) -> Self {
        self.action = Some(Action::Sync(Arc::new(action)));
        self
    }

    /// Install an async action
    pub fn with_async_action<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn(PortValues) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PortValues>> + Send + 'static,
    {
        let wrapped: Arc<AsyncAction> = Arc::new(move |inputs| {
            let fut: Pin<Box<dyn Future<Output = Result<PortValues>> + Send>> =
                Box::pin(action(inputs));
            fut
        });
        self.action = Some(Action::Async(wrapped));
        self
    }

    /// Make an input optional with a node-local default
    ///
    /// The default is used only when the input is absent at execution time.
    pub fn with_default(mut self, input: impl Into<String>, value: serde_json::Value) -> Self {
        let input = input.into();
        self.required.remove(&input);
        self.defaults.insert(input, value);
        self
    }

    /// Whether an action has been installed
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

#[async_trait]
impl FlowNode for ActionNode {
    fn label(&self) -> String {
        format!(
            "ActionNode(Inputs: {:?}, Outputs: {:?})",
            self.inputs(),
            self.outputs
        )
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        self.required.clone()
    }

    fn optional_inputs(&self) -> BTreeSet<String> {
        self.defaults.keys().cloned().collect()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    async fn execute(&self, mut inputs: PortValues) -> Result<PortValues> {
        let action = self
            .action
            .clone()
            .ok_or_else(|| FlowError::NoAction(self.label()))?;

        for (name, value) in &self.defaults {
            inputs.entry(name.clone()).or_insert_with(|| value.clone());
        }

        match action {
            Action::Sync(f) => f(inputs),
            Action::Async(f) => f(inputs).await,
        }
    }
}
