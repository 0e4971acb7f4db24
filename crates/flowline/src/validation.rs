//! Static validation of a flow graph
//!
//! Checks run fail-fast in this order:
//! 1. cycles reachable from the root
//! 2. each non-root node gets every input from exactly one predecessor
//! 3. required inputs are all supplied
//! 4. no node declares the same output twice
//! 5. no two sinks produce the same final output key

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ValidationError;
use crate::graph::FlowGraph;
use crate::types::NodeId;

/// Nodes reachable from the root plus their immediate predecessors
struct Traversal {
    /// Discovery order
    visited: Vec<NodeId>,
    /// Predecessors of each node, in discovery order
    upstream: HashMap<NodeId, Vec<NodeId>>,
}

/// Validate the part of `graph` reachable from `root`
pub fn validate_graph(graph: &FlowGraph, root: NodeId) -> Result<(), ValidationError> {
    if !graph.contains(root) {
        return Err(ValidationError::UnknownRoot(root));
    }

    let traversal = traverse(graph, root)?;
    check_inputs(graph, root, &traversal)?;
    check_output_declarations(graph, &traversal)?;
    check_sink_outputs(graph, &traversal)?;

    log::debug!(
        "Validated flow rooted at {} ({} reachable nodes)",
        root,
        traversal.visited.len()
    );
    Ok(())
}

/// Depth-first walk with an explicit stack of `(node, next edge)` frames
fn traverse(graph: &FlowGraph, root: NodeId) -> Result<Traversal, ValidationError> {
    let mut visited = vec![root];
    let mut seen: HashSet<NodeId> = HashSet::from([root]);
    let mut on_stack: HashSet<NodeId> = HashSet::from([root]);
    let mut upstream: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];

    while let Some(frame) = stack.last_mut() {
        let (id, next) = *frame;
        let edges = graph.downstream(id);
        if next >= edges.len() {
            on_stack.remove(&id);
            stack.pop();
            continue;
        }
        frame.1 += 1;

        let child = edges[next].target;
        let preds = upstream.entry(child).or_default();
        if !preds.contains(&id) {
            preds.push(id);
        }

        if on_stack.contains(&child) {
            return Err(ValidationError::CycleDetected {
                node: graph.display_name(child),
            });
        }
        if seen.insert(child) {
            visited.push(child);
            on_stack.insert(child);
            stack.push((child, 0));
        }
    }

    Ok(Traversal { visited, upstream })
}

fn check_inputs(
    graph: &FlowGraph,
    root: NodeId,
    traversal: &Traversal,
) -> Result<(), ValidationError> {
    // Root inputs are supplied externally at run time
    for &node in traversal.visited.iter().filter(|&&n| n != root) {
        let inputs = graph.effective_inputs(node);
        let mut provided: BTreeMap<String, NodeId> = BTreeMap::new();

        let preds = traversal.upstream.get(&node).map(Vec::as_slice).unwrap_or(&[]);
        for &up in preds {
            let supplied: Vec<String> = match graph.edge_mapping(up, node) {
                Some(mapping) => mapping
                    .values()
                    .filter(|target| inputs.contains(*target))
                    .cloned()
                    .collect(),
                None => graph
                    .effective_outputs(up)
                    .into_iter()
                    .filter(|out| inputs.contains(out))
                    .collect(),
            };

            for input in supplied {
                match provided.get(&input) {
                    Some(&first) if first != up => {
                        return Err(ValidationError::DuplicateInput {
                            node: graph.display_name(node),
                            input,
                            first: graph.display_name(first),
                            second: graph.display_name(up),
                        });
                    }
                    Some(_) => {}
                    None => {
                        provided.insert(input, up);
                    }
                }
            }
        }

        for required in graph.effective_required_inputs(node) {
            if !provided.contains_key(&required) {
                return Err(ValidationError::MissingRequiredInput {
                    node: graph.display_name(node),
                    input: required,
                });
            }
        }
    }
    Ok(())
}

fn check_output_declarations(graph: &FlowGraph, traversal: &Traversal) -> Result<(), ValidationError> {
    for &node in &traversal.visited {
        let mut declared = HashSet::new();
        for output in graph.effective_outputs(node) {
            if !declared.insert(output.clone()) {
                return Err(ValidationError::DuplicateOutputDeclaration {
                    node: graph.display_name(node),
                    output,
                });
            }
        }
    }
    Ok(())
}

fn check_sink_outputs(graph: &FlowGraph, traversal: &Traversal) -> Result<(), ValidationError> {
    let mut producers: HashMap<String, NodeId> = HashMap::new();
    for &sink in traversal.visited.iter().filter(|&&n| graph.is_sink(n)) {
        for output in graph.effective_outputs(sink) {
            match producers.get(&output) {
                Some(&first) if first != sink => {
                    return Err(ValidationError::DuplicateSinkOutput {
                        output,
                        first: graph.display_name(first),
                        second: graph.display_name(sink),
                    });
                }
                _ => {
                    producers.insert(output, sink);
                }
            }
        }
    }
    Ok(())
}
