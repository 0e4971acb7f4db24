//! Flow runtime: validation plus the worklist scheduler
//!
//! A [`FlowManager`] owns a [`FlowGraph`] and a root node. Every call to
//! [`FlowManager::run`] validates the graph, seeds the root, then drains a
//! FIFO worklist. A dequeued node whose required inputs are incomplete is
//! deferred to the back of the queue; a node that keeps being deferred past
//! the configured ceiling fails the run with
//! [`FlowError::ExecutionDeadlock`].
//!
//! All per-run state lives inside `run`, so a single manager can serve
//! several concurrent runs (for example a sub-pipeline wrapped in a
//! parallel split/join node).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::ManagerOptions;
use crate::error::{FlowError, Result, ValidationError};
use crate::events::{EventSink, FlowEvent, NullEventSink};
use crate::graph::FlowGraph;
use crate::types::{sorted_keys, NodeId, PortValues};
use crate::validation::validate_graph;

/// Runs a validated flow graph from its root node
pub struct FlowManager {
    graph: FlowGraph,
    root: NodeId,
    options: ManagerOptions,
    event_sink: Arc<dyn EventSink>,
}

/// Transient state of one run
struct RunState {
    accumulators: HashMap<NodeId, PortValues>,
    queue: VecDeque<NodeId>,
    deferrals: HashMap<NodeId, usize>,
    seen: HashSet<NodeId>,
    executed: HashSet<NodeId>,
    outputs: PortValues,
}

impl RunState {
    fn seeded(root: NodeId, inputs: PortValues) -> Self {
        Self {
            accumulators: HashMap::from([(root, inputs)]),
            queue: VecDeque::from([root]),
            deferrals: HashMap::new(),
            seen: HashSet::from([root]),
            executed: HashSet::new(),
            outputs: PortValues::new(),
        }
    }
}

impl FlowManager {
    pub fn new(graph: FlowGraph, root: NodeId) -> Self {
        Self {
            graph,
            root,
            options: ManagerOptions::default(),
            event_sink: Arc::new(NullEventSink),
        }
    }

    pub fn with_options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Check the graph's structure; never cached
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_graph(&self.graph, self.root)
    }

    /// Execute the flow and return the merged outputs of every sink
    ///
    /// `external` is overlaid on the root's initial inputs (external wins).
    pub async fn run(&self, external: PortValues) -> Result<PortValues> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.emit(FlowEvent::RunStarted {
            run_id: run_id.clone(),
            root: self.root,
        });

        match self.run_worklist(&run_id, external).await {
            Ok(outputs) => {
                let keys = sorted_keys(&outputs);
                log::info!("Run {} completed with outputs {:?}", run_id, keys);
                self.emit(FlowEvent::RunCompleted {
                    run_id,
                    outputs: keys,
                });
                Ok(outputs)
            }
            Err(e) => {
                log::warn!("Run {} failed: {}", run_id, e);
                self.emit(FlowEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_worklist(&self, run_id: &str, external: PortValues) -> Result<PortValues> {
        self.validate()?;

        let root = self
            .graph
            .node(self.root)
            .ok_or(FlowError::UnknownNode(self.root))?;
        let mut seed = root.initial_inputs();
        seed.extend(external);

        let mut state = RunState::seeded(self.root, seed);
        log::debug!("Run {} seeded root {}", run_id, self.graph.display_name(self.root));

        while let Some(id) = state.queue.pop_front() {
            let available = state.accumulators.get(&id);
            let missing: Vec<String> = self
                .graph
                .effective_required_inputs(id)
                .into_iter()
                .filter(|input| !available.is_some_and(|acc| acc.contains_key(input)))
                .collect();

            if !missing.is_empty() {
                self.defer(run_id, id, missing, &mut state)?;
                continue;
            }

            let outputs = self.execute_node(run_id, id, &mut state).await?;
            if self.graph.is_sink(id) {
                // Last writer wins on colliding keys
                state.outputs.extend(outputs);
            } else {
                self.deliver(id, &outputs, &mut state);
            }
        }

        Ok(state.outputs)
    }

    fn defer(
        &self,
        run_id: &str,
        id: NodeId,
        missing: Vec<String>,
        state: &mut RunState,
    ) -> Result<()> {
        let count = state.deferrals.entry(id).or_default();
        if *count >= self.options.max_deferrals {
            let available = state
                .accumulators
                .get(&id)
                .map(sorted_keys)
                .unwrap_or_default();
            return Err(FlowError::ExecutionDeadlock {
                node: self.graph.display_name(id),
                deferrals: *count,
                missing,
                available,
            });
        }
        *count += 1;

        log::debug!(
            "Run {}: deferring {} (attempt {}), missing {:?}",
            run_id,
            self.graph.display_name(id),
            count,
            missing
        );
        self.emit(FlowEvent::NodeDeferred {
            run_id: run_id.to_string(),
            node: id,
            deferrals: *count,
            missing,
        });
        state.queue.push_back(id);
        Ok(())
    }

    async fn execute_node(&self, run_id: &str, id: NodeId, state: &mut RunState) -> Result<PortValues> {
        let node = self.graph.node(id).ok_or(FlowError::UnknownNode(id))?;
        let inputs = state.accumulators.remove(&id).unwrap_or_default();
        state.executed.insert(id);

        let label = node.label();
        log::debug!("Run {}: executing {}", run_id, self.graph.display_name(id));
        self.emit(FlowEvent::NodeStarted {
            run_id: run_id.to_string(),
            node: id,
            label,
        });

        let outputs = node
            .execute(inputs)
            .await
            .map_err(|e| FlowError::NodeFailed {
                node: self.graph.display_name(id),
                source: Box::new(e),
            })?;

        self.emit(FlowEvent::NodeCompleted {
            run_id: run_id.to_string(),
            node: id,
            outputs: sorted_keys(&outputs),
        });
        Ok(outputs)
    }

    /// Copy a node's outputs into each downstream accumulator
    fn deliver(&self, from: NodeId, outputs: &PortValues, state: &mut RunState) {
        for edge in self.graph.downstream(from) {
            let target = edge.target;
            if state.executed.contains(&target) {
                log::debug!(
                    "Dropping data from {} for already executed {}",
                    self.graph.display_name(from),
                    self.graph.display_name(target)
                );
                continue;
            }

            let delivered: PortValues = match edge.explicit_mapping() {
                // Strict: only mapped keys cross the edge
                Some(mapping) => mapping
                    .iter()
                    .filter_map(|(out, input)| outputs.get(out).map(|v| (input.clone(), v.clone())))
                    .collect(),
                None => outputs.clone(),
            };

            state.accumulators.entry(target).or_default().extend(delivered);
            if state.seen.insert(target) {
                state.queue.push_back(target);
            }
        }
    }

    fn emit(&self, event: FlowEvent) {
        let _ = self.event_sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use crate::node::ActionNode;
    use crate::nodes::SourceNode;
    use crate::types::{edge_mapping, port_values, EdgeMapping};
    use serde_json::{json, Value};

    fn int(inputs: &PortValues, key: &str) -> i64 {
        inputs[key].as_i64().unwrap_or_default()
    }

    fn constant(key: &'static str, value: Value) -> ActionNode {
        ActionNode::new(Vec::<String>::new(), [key])
            .with_action(move |_| Ok(port_values([(key, value.clone())])))
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(5)));
        let node2 = graph.add_node(
            ActionNode::new(["A"], ["B"])
                .with_action(|d| Ok(port_values([("B", json!(int(&d, "A") * 2))]))),
        );
        let node3 = graph.add_node(
            ActionNode::new(["B"], ["C"])
                .with_action(|d| Ok(port_values([("C", json!(int(&d, "B") + 3))]))),
        );
        graph.connect(root, node2, None).unwrap();
        graph.connect(node2, node3, None).unwrap();

        let out = FlowManager::new(graph, root).run(PortValues::new()).await.unwrap();
        assert_eq!(out, port_values([("C", json!(13))]));
    }

    #[tokio::test]
    async fn test_independent_branches_both_reach_outputs() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(2)));
        let plus = graph.add_node(
            ActionNode::new(["A"], ["B"])
                .with_action(|d| Ok(port_values([("B", json!(int(&d, "A") + 1))]))),
        );
        let times = graph.add_node(
            ActionNode::new(["A"], ["C"])
                .with_action(|d| Ok(port_values([("C", json!(int(&d, "A") * 4))]))),
        );
        graph.connect(root, plus, None).unwrap();
        graph.connect(root, times, None).unwrap();

        let out = FlowManager::new(graph, root).run(PortValues::new()).await.unwrap();
        assert_eq!(out["B"], json!(3));
        assert_eq!(out["C"], json!(8));
    }

    #[tokio::test]
    async fn test_edge_mapping_renames_and_drops_unmapped() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(
            ActionNode::new(Vec::<String>::new(), ["X", "Other"])
                .with_action(|_| Ok(port_values([("X", json!("x-val")), ("Other", json!(1))]))),
        );
        let down = graph.add_node(ActionNode::new(["y"], ["result"]).with_action(|d| {
            assert!(!d.contains_key("Other"));
            assert!(!d.contains_key("X"));
            Ok(port_values([("result", d["y"].clone())]))
        }));
        graph.connect(root, down, Some(edge_mapping([("X", "y")]))).unwrap();

        let out = FlowManager::new(graph, root).run(PortValues::new()).await.unwrap();
        assert_eq!(out, port_values([("result", json!("x-val"))]));
    }

    #[tokio::test]
    async fn test_branch_mutation_does_not_leak() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("items", json!([1, 2, 3])));
        let mutator = graph.add_node(ActionNode::new(["items"], ["mutated"]).with_action(|mut d| {
            if let Some(list) = d.get_mut("items").and_then(Value::as_array_mut) {
                list.push(json!(99));
            }
            Ok(port_values([("mutated", d["items"].clone())]))
        }));
        let reader = graph.add_node(
            ActionNode::new(["items"], ["untouched"])
                .with_action(|d| Ok(port_values([("untouched", d["items"].clone())]))),
        );
        graph.connect(root, mutator, None).unwrap();
        graph.connect(root, reader, None).unwrap();

        let out = FlowManager::new(graph, root).run(PortValues::new()).await.unwrap();
        assert_eq!(out["mutated"], json!([1, 2, 3, 99]));
        assert_eq!(out["untouched"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_external_inputs_override_source_initial_values() {
        let mut graph = FlowGraph::new();
        let src = graph.add_node(SourceNode::with_initial_inputs(port_values([
            ("a", json!(1)),
            ("b", json!(2)),
        ])));
        let sum = graph.add_node(
            ActionNode::new(["x", "y"], ["sum"])
                .with_action(|d| Ok(port_values([("sum", json!(int(&d, "x") + int(&d, "y")))]))),
        );
        graph
            .connect(src, sum, Some(edge_mapping([("a", "x"), ("b", "y")])))
            .unwrap();

        let manager = FlowManager::new(graph, src);
        let out = manager.run(PortValues::new()).await.unwrap();
        assert_eq!(out["sum"], json!(3));

        let out = manager.run(port_values([("b", json!(40))])).await.unwrap();
        assert_eq!(out["sum"], json!(41));
    }

    #[tokio::test]
    async fn test_join_waits_for_both_branches() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("X", json!(10)));
        let left = graph.add_node(
            ActionNode::new(["X"], ["L"]).with_action(|d| Ok(port_values([("L", json!(int(&d, "X") + 1))]))),
        );
        let mid = graph.add_node(
            ActionNode::new(["X"], ["M"]).with_action(|d| Ok(port_values([("M", json!(int(&d, "X") * 2))]))),
        );
        let right = graph.add_node(
            ActionNode::new(["M"], ["R"]).with_action(|d| Ok(port_values([("R", json!(int(&d, "M") * 3))]))),
        );
        let join = graph.add_node(
            ActionNode::new(["L", "R"], ["total"])
                .with_action(|d| Ok(port_values([("total", json!(int(&d, "L") + int(&d, "R")))]))),
        );
        graph.connect(root, left, None).unwrap();
        graph.connect(root, mid, None).unwrap();
        graph.connect(left, join, None).unwrap();
        graph.connect(mid, right, None).unwrap();
        graph.connect(right, join, None).unwrap();

        let sink = Arc::new(VecEventSink::new());
        let manager = FlowManager::new(graph, root).with_event_sink(sink.clone());
        let out = manager.run(PortValues::new()).await.unwrap();
        assert_eq!(out["total"], json!(11 + 60));

        let deferred = sink
            .events()
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeDeferred { node, .. } if *node == join))
            .count();
        assert!(deferred >= 1);
    }

    #[tokio::test]
    async fn test_deadlock_reports_after_ceiling() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(1)));
        // Validation trusts the mapping; at run time "Q" never appears
        let starved = graph.add_named_node("starved", ActionNode::new(["B"], ["C"]).with_action(Ok));
        graph.connect(root, starved, Some(edge_mapping([("Q", "B")]))).unwrap();

        let sink = Arc::new(VecEventSink::new());
        let manager = FlowManager::new(graph, root).with_event_sink(sink.clone());
        let err = manager.run(PortValues::new()).await.unwrap_err();

        match &err {
            FlowError::ExecutionDeadlock {
                node,
                deferrals,
                missing,
                ..
            } => {
                assert!(node.contains("starved"));
                assert_eq!(*deferrals, 100);
                assert_eq!(missing, &vec!["B".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("Execution deadlock detected"));

        let events = sink.events();
        let deferred = events
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeDeferred { .. }))
            .count();
        assert_eq!(deferred, 100);
        assert!(matches!(events.last(), Some(FlowEvent::RunFailed { .. })));
    }

    #[tokio::test]
    async fn test_deferral_ceiling_is_tunable() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(1)));
        let starved = graph.add_node(ActionNode::new(["B"], ["C"]).with_action(Ok));
        graph.connect(root, starved, Some(edge_mapping([("Q", "B")]))).unwrap();

        let sink = Arc::new(VecEventSink::new());
        let manager = FlowManager::new(graph, root)
            .with_options(ManagerOptions { max_deferrals: 3 })
            .with_event_sink(sink.clone());
        let err = manager.run(PortValues::new()).await.unwrap_err();

        assert!(matches!(err, FlowError::ExecutionDeadlock { deferrals: 3, .. }));
        let deferred = sink
            .events()
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeDeferred { .. }))
            .count();
        assert_eq!(deferred, 3);
    }

    #[tokio::test]
    async fn test_node_failure_is_wrapped_with_identity() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(1)));
        let broken = graph.add_named_node(
            "broken",
            ActionNode::new(["A"], ["B"]).with_action(|_| Err(FlowError::failed("disk full"))),
        );
        graph.connect(root, broken, None).unwrap();

        let err = FlowManager::new(graph, root).run(PortValues::new()).await.unwrap_err();
        match &err {
            FlowError::NodeFailed { node, .. } => assert!(node.contains("broken")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.root_message(), "Action failed: disk full");
    }

    #[tokio::test]
    async fn test_run_revalidates() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(1)));
        let needy = graph.add_node(ActionNode::new(["Z"], ["B"]).with_action(Ok));
        graph.connect(root, needy, None).unwrap();

        let manager = FlowManager::new(graph, root);
        assert!(manager.validate().is_err());
        let err = manager.run(PortValues::new()).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::Validation(ValidationError::MissingRequiredInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_node_executes_at_most_once() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("X", json!(1)));
        let eager = graph.add_node(
            ActionNode::new(["X", "Y"], ["out"])
                .with_default("Y", json!("default"))
                .with_action(|d| Ok(port_values([("out", d["Y"].clone())]))),
        );
        let late = graph.add_node(
            ActionNode::new(["X"], ["Y"]).with_action(|_| Ok(port_values([("Y", json!("late"))]))),
        );
        graph.connect(root, eager, None).unwrap();
        graph.connect(root, late, None).unwrap();
        graph.connect(late, eager, None).unwrap();

        let sink = Arc::new(VecEventSink::new());
        let manager = FlowManager::new(graph, root).with_event_sink(sink.clone());
        let out = manager.run(PortValues::new()).await.unwrap();

        assert_eq!(out["out"], json!("default"));
        let started = sink
            .events()
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeStarted { node, .. } if *node == eager))
            .count();
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_source_with_empty_mapping_feeds_defaults_only() {
        let mut graph = FlowGraph::new();
        let src = graph.add_node(SourceNode::new());
        let loader = graph.add_node(
            ActionNode::new(["path"], ["loaded"])
                .with_default("path", json!("/tmp/default"))
                .with_action(|d| Ok(port_values([("loaded", d["path"].clone())]))),
        );
        graph.connect(src, loader, Some(EdgeMapping::new())).unwrap();

        let out = FlowManager::new(graph, src)
            .run(port_values([("ignored", json!(true))]))
            .await
            .unwrap();
        assert_eq!(out, port_values([("loaded", json!("/tmp/default"))]));
    }

    #[tokio::test]
    async fn test_events_share_run_id() {
        let mut graph = FlowGraph::new();
        let root = graph.add_node(constant("A", json!(1)));
        let sink = Arc::new(VecEventSink::new());
        let manager = FlowManager::new(graph, root).with_event_sink(sink.clone());

        manager.run(PortValues::new()).await.unwrap();
        let first = sink.events();
        assert!(matches!(first.first(), Some(FlowEvent::RunStarted { .. })));
        assert!(matches!(first.last(), Some(FlowEvent::RunCompleted { .. })));
        let run_id = first[0].run_id().to_string();
        assert!(first.iter().all(|e| e.run_id() == run_id));

        sink.clear();
        manager.run(PortValues::new()).await.unwrap();
        assert_ne!(sink.events()[0].run_id(), run_id);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_manager() {
        let mut graph = FlowGraph::new();
        let src = graph.add_node(SourceNode::new());
        let slow = graph.add_node(ActionNode::new(["n"], ["m"]).with_async_action(|d| async move {
            let n = d["n"].as_u64().unwrap_or_default();
            tokio::time::sleep(std::time::Duration::from_millis(20 - n * 5)).await;
            Ok(port_values([("m", json!(n * 10))]))
        }));
        graph.connect(src, slow, Some(edge_mapping([("n", "n")]))).unwrap();
        let manager = Arc::new(FlowManager::new(graph, src));

        let handles: Vec<_> = (1..=3u64)
            .map(|n| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.run(port_values([("n", json!(n))])).await })
            })
            .collect();

        for (n, handle) in (1..=3u64).zip(handles) {
            let out = handle.await.unwrap().unwrap();
            assert_eq!(out["m"], json!(n * 10));
        }
    }
}
