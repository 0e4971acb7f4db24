//! Error types for the Flowline engine

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// Structural problems found by graph validation.
///
/// Validation is fail-fast: the first failing check is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The manager's root node is not part of the graph
    #[error("Root node {0} does not exist in the graph")]
    UnknownRoot(NodeId),

    /// A node was reached again while still on the traversal stack
    #[error("Cycle detected at node: {node}")]
    CycleDetected { node: String },

    /// Two predecessors resolve to the same input key on one node
    #[error(
        "Duplicate input '{input}' for node {node}. Upstream nodes {first} and {second} both supply it. \
         Consider using an output filter to resolve this."
    )]
    DuplicateInput {
        node: String,
        input: String,
        first: String,
        second: String,
    },

    /// A required input has no upstream supplier
    #[error("Node {node} requires input '{input}' which is not provided by any upstream node.")]
    MissingRequiredInput { node: String, input: String },

    /// A node declares the same output name twice
    #[error("Node {node} has duplicate outputs in its declaration: '{output}'")]
    DuplicateOutputDeclaration { node: String, output: String },

    /// Two sinks would write the same final output key
    #[error(
        "Output '{output}' is produced by multiple sink nodes: {first} and {second}. \
         Consider using an output filter to resolve duplicate outputs."
    )]
    DuplicateSinkOutput {
        output: String,
        first: String,
        second: String,
    },
}

/// A pipe the builder could not instantiate, with the upstream names it is still waiting on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPipe {
    pub name: String,
    pub missing: Vec<String>,
}

fn format_pending(pending: &[PendingPipe]) -> String {
    pending
        .iter()
        .map(|p| format!("'{}' waits on [{}]", p.name, p.missing.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_lengths(lengths: &[(String, usize)]) -> String {
    lengths
        .iter()
        .map(|(key, len)| format!("{}={}", key, len))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur while building or running a flow
#[derive(Debug, Error)]
pub enum FlowError {
    /// Static graph validation failed
    #[error("Flow validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The builder made no progress instantiating pipes
    #[error("Circular dependency detected in pipe configuration: {}", format_pending(.pending))]
    CircularDependency { pending: Vec<PendingPipe> },

    /// A user pipe tried to take the source's reserved name
    #[error("Pipe name '{0}' is reserved for the flow source")]
    ReservedPipeName(String),

    /// An upstream connection names a pipe that is not configured
    #[error("Upstream pipe '{upstream}' not found for '{pipe}'")]
    UnknownUpstream { pipe: String, upstream: String },

    /// No factory registered for a node type
    #[error("No factory registered for node type '{0}'")]
    UnknownNodeType(String),

    /// A factory rejected its init parameters
    #[error("Invalid init parameters for node type '{node_type}': {message}")]
    InvalidInit { node_type: String, message: String },

    /// A node ID does not belong to the graph
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// Source nodes must be connected with an explicit (possibly empty) mapping
    #[error("Source node requires an explicit output mapping (or an empty one) for downstream {target}")]
    MissingSourceMapping { target: String },

    /// A node was executed without an action
    #[error("Node {0} has no action defined")]
    NoAction(String),

    /// A node's action failed during a run
    #[error("Error executing node {node}: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    /// A node never became ready
    #[error(
        "Execution deadlock detected: Node {node} has been deferred {deferrals} times. \
         Missing inputs: [{}]. Available inputs: [{}]",
        .missing.join(", "),
        .available.join(", ")
    )]
    ExecutionDeadlock {
        node: String,
        deferrals: usize,
        missing: Vec<String>,
        available: Vec<String>,
    },

    /// A nested flow failed inside a sub-pipeline node
    #[error("Sub-pipeline execution failed: {source}")]
    SubPipelineFailed {
        #[source]
        source: Box<FlowError>,
    },

    /// Inputs zipped under one index label have different lengths
    #[error(
        "Inputs mapped to index '{label}' have differing lengths: {}",
        format_lengths(.lengths)
    )]
    SplitJoinLengthMismatch {
        label: String,
        lengths: Vec<(String, usize)>,
    },

    /// An indexed split/join input was not a list
    #[error("Input '{key}' is mapped to index '{label}' but is not a list")]
    SplitJoinNotAList { key: String, label: String },

    /// One fan-out invocation failed
    #[error("Split/join invocation {index} failed: {message}")]
    SplitJoinCombination {
        index: usize,
        message: String,
        #[source]
        source: Box<FlowError>,
    },

    /// The split/join worker pool itself failed (worker panic, closed semaphore)
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Invalid input value
    #[error("Invalid input type for '{port}': expected {expected}")]
    InvalidInput { port: String, expected: String },

    /// Generic action failure
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create an action failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ActionFailed(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(port: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidInput {
            port: port.into(),
            expected: expected.into(),
        }
    }

    /// The message of the innermost error in the wrapping chain
    pub fn root_message(&self) -> String {
        let mut current = self;
        loop {
            match current {
                Self::NodeFailed { source, .. }
                | Self::SubPipelineFailed { source }
                | Self::SplitJoinCombination { source, .. } => current = source,
                other => return other.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_message_unwraps_nested_failures() {
        let err = FlowError::NodeFailed {
            node: "outer".to_string(),
            source: Box::new(FlowError::SubPipelineFailed {
                source: Box::new(FlowError::NodeFailed {
                    node: "inner".to_string(),
                    source: Box::new(FlowError::failed("boom")),
                }),
            }),
        };
        assert_eq!(err.root_message(), "Action failed: boom");
        assert!(err.to_string().contains("outer"));
    }

    #[test]
    fn test_length_mismatch_message() {
        let err = FlowError::SplitJoinLengthMismatch {
            label: "i".to_string(),
            lengths: vec![("A".to_string(), 3), ("B".to_string(), 2)],
        };
        let msg = err.to_string();
        assert!(msg.contains("differing lengths"));
        assert!(msg.contains("A=3"));
        assert!(msg.contains("B=2"));
    }

    #[test]
    fn test_circular_dependency_lists_pending() {
        let err = FlowError::CircularDependency {
            pending: vec![PendingPipe {
                name: "a".to_string(),
                missing: vec!["b".to_string()],
            }],
        };
        assert!(err.to_string().contains("'a' waits on [b]"));
    }
}
