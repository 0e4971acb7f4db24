//! Flowline - statically validated dataflow execution
//!
//! A flow is a directed acyclic graph of nodes. Each node declares named
//! inputs and outputs and maps an input map to an output map. Edges may
//! rename keys on the way. Before every run the graph is validated:
//!
//! - no cycles reachable from the root
//! - every required input has exactly one supplier
//! - no two sinks produce the same final key
//!
//! The runtime then drives a FIFO worklist from the root, deferring nodes
//! whose inputs are incomplete and merging sink outputs into the result.
//!
//! # Architecture
//!
//! - [`FlowNode`]: the node contract; [`ActionNode`] wraps a closure
//! - [`nodes`]: filter, renamer, source, sub-pipeline and split/join nodes
//! - [`FlowGraph`]: node arena addressed by [`NodeId`]
//! - [`FlowManager`]: validation plus the worklist scheduler
//! - [`build_flow`]: builds a manager from a [`FlowConfig`] and a [`NodeRegistry`]
//! - [`EventSink`]: run progress reporting
//!
//! # Example
//!
//! ```ignore
//! let mut graph = FlowGraph::new();
//! let root = graph.add_node(ActionNode::new(Vec::<String>::new(), ["A"])
//!     .with_action(|_| Ok(port_values([("A", json!(5))]))));
//! let double = graph.add_node(ActionNode::new(["A"], ["B"])
//!     .with_action(|d| Ok(port_values([("B", json!(d["A"].as_i64().unwrap_or(0) * 2))]))));
//! graph.connect(root, double, None)?;
//!
//! let outputs = FlowManager::new(graph, root).run(PortValues::new()).await?;
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::{build_flow, BuildWarning, BuiltFlow, FlowBuilder};
pub use config::{FlowConfig, ManagerOptions, NodeSpec, PipeConfig, DEFAULT_MAX_DEFERRALS, SOURCE_PIPE};
pub use error::{FlowError, PendingPipe, Result, ValidationError};
pub use events::{EventError, EventSink, FlowEvent, NullEventSink, VecEventSink};
pub use graph::{FlowGraph, GraphEdge};
pub use manager::FlowManager;
pub use node::{ActionNode, FlowNode};
pub use nodes::{IndexMapping, OutputFilter, OutputRenamer, SourceNode, SplitJoinNode, SubPipeline, ARR_OUTPUT};
pub use registry::{parse_init, NodeFactory, NodeFactoryFn, NodeRegistry};
pub use types::{edge_mapping, port_values, EdgeMapping, NodeId, NodeKind, PortValues};
pub use validation::validate_graph;
