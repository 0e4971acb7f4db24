//! Declarative flow construction
//!
//! Turns a [`FlowConfig`] into a validated [`FlowManager`] rooted at an
//! implicit source node named `"*"`:
//!
//! 1. pipes are instantiated in dependency order, repeating passes until
//!    every pipe exists or a pass makes no progress
//! 2. declared upstream connections are wired; pipes without any are
//!    attached to the source with an empty mapping
//! 3. pipes unreachable from the source are reported
//! 4. the resulting graph is validated

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::{FlowConfig, ManagerOptions, NodeSpec, PipeConfig, SOURCE_PIPE};
use crate::error::{FlowError, PendingPipe, Result};
use crate::events::EventSink;
use crate::graph::FlowGraph;
use crate::manager::FlowManager;
use crate::nodes::SourceNode;
use crate::registry::NodeRegistry;
use crate::types::{EdgeMapping, NodeId};

/// Non-fatal findings from building a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// The pipe declared no upstream and was attached to the source with no data
    AutoConnectedToSource { pipe: String },
    /// The pipe is not reachable from the source and will never run
    Orphaned { pipe: String },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoConnectedToSource { pipe } => write!(
                f,
                "Pipe '{}' has no upstream connections defined. Automatically connecting to source node.",
                pipe
            ),
            Self::Orphaned { pipe } => write!(
                f,
                "Pipe '{}' is not connected to the flow and will not be executed.",
                pipe
            ),
        }
    }
}

/// A built flow and the IDs of its named pipes
pub struct BuiltFlow {
    pub manager: FlowManager,
    /// Every pipe by name, including the source under `"*"`
    pub pipes: BTreeMap<String, NodeId>,
    pub warnings: Vec<BuildWarning>,
}

impl BuiltFlow {
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.pipes.get(name).copied()
    }

    pub fn source(&self) -> NodeId {
        self.manager.root()
    }
}

/// Builds flows with shared manager settings
#[derive(Default)]
pub struct FlowBuilder {
    options: ManagerOptions,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn build(&self, config: &FlowConfig, registry: &NodeRegistry) -> Result<BuiltFlow> {
        check_names(config)?;

        let mut graph = FlowGraph::new();
        let source = graph.add_named_node(SOURCE_PIPE, SourceNode::new());
        let mut pipes = BTreeMap::from([(SOURCE_PIPE.to_string(), source)]);

        instantiate(config, registry, &mut graph, &mut pipes)?;
        let mut warnings = wire(config, source, &mut graph, &pipes)?;

        let reachable: HashSet<NodeId> = graph.reachable_from(source).into_iter().collect();
        for (name, _) in config.pipes() {
            if pipes.get(name).is_some_and(|id| !reachable.contains(id)) {
                warnings.push(BuildWarning::Orphaned { pipe: name.clone() });
            }
        }
        for warning in &warnings {
            log::warn!("{}", warning);
        }

        let mut manager = FlowManager::new(graph, source).with_options(self.options.clone());
        if let Some(sink) = &self.event_sink {
            manager = manager.with_event_sink(sink.clone());
        }

        if let Err(e) = manager.validate() {
            log::error!("Flow validation failed: {}", e);
            log::error!("{}", manager.graph().describe());
            return Err(e.into());
        }
        log::info!("Flow validation successful ({} pipes)", config.len());

        Ok(BuiltFlow {
            manager,
            pipes,
            warnings,
        })
    }
}

/// Build a flow with default manager settings
pub fn build_flow(config: &FlowConfig, registry: &NodeRegistry) -> Result<BuiltFlow> {
    FlowBuilder::new().build(config, registry)
}

fn upstream_names(pipe: &PipeConfig) -> impl Iterator<Item = &str> {
    pipe.upstream_pipes
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| *name != SOURCE_PIPE)
}

fn check_names(config: &FlowConfig) -> Result<()> {
    for (name, pipe) in config.pipes() {
        if name == SOURCE_PIPE {
            return Err(FlowError::ReservedPipeName(name.clone()));
        }
        if let Some(unknown) = upstream_names(pipe).find(|up| config.get(up).is_none()) {
            return Err(FlowError::UnknownUpstream {
                pipe: name.clone(),
                upstream: unknown.to_string(),
            });
        }
    }
    Ok(())
}

/// Create every pipe once all of its upstream pipes exist
fn instantiate(
    config: &FlowConfig,
    registry: &NodeRegistry,
    graph: &mut FlowGraph,
    pipes: &mut BTreeMap<String, NodeId>,
) -> Result<()> {
    let mut pending: Vec<&(String, PipeConfig)> = config.pipes().iter().collect();

    while !pending.is_empty() {
        let mut waiting = Vec::new();
        let mut progressed = false;

        for entry in pending {
            let (name, pipe) = entry;
            if !upstream_names(pipe).all(|up| pipes.contains_key(up)) {
                waiting.push(entry);
                continue;
            }

            let node = match &pipe.spec {
                NodeSpec::Registered { node_type, init } => registry.create(node_type, init)?,
                NodeSpec::Instance(node) => Arc::clone(node),
            };
            let id = graph.add_shared_node(Some(name.clone()), node);
            log::debug!("Instantiated pipe '{}' as {}", name, id);
            pipes.insert(name.clone(), id);
            progressed = true;
        }

        if !progressed {
            let stuck = waiting
                .iter()
                .map(|(name, pipe)| PendingPipe {
                    name: name.clone(),
                    missing: upstream_names(pipe)
                        .filter(|up| !pipes.contains_key(*up))
                        .map(str::to_string)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect(),
                })
                .collect();
            return Err(FlowError::CircularDependency { pending: stuck });
        }
        pending = waiting;
    }
    Ok(())
}

/// Connect every declared upstream edge
fn wire(
    config: &FlowConfig,
    source: NodeId,
    graph: &mut FlowGraph,
    pipes: &BTreeMap<String, NodeId>,
) -> Result<Vec<BuildWarning>> {
    let mut warnings = Vec::new();

    for (name, pipe) in config.pipes() {
        let id = pipes[name];
        if pipe.upstream_pipes.is_empty() {
            graph.connect(source, id, Some(EdgeMapping::new()))?;
            warnings.push(BuildWarning::AutoConnectedToSource { pipe: name.clone() });
            continue;
        }

        for (upstream, mapping) in &pipe.upstream_pipes {
            let from = pipes
                .get(upstream)
                .copied()
                .ok_or_else(|| FlowError::UnknownUpstream {
                    pipe: name.clone(),
                    upstream: upstream.clone(),
                })?;
            graph.connect(from, id, Some(mapping.clone()))?;
        }
    }
    Ok(warnings)
}
