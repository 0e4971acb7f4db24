//! Fan-out/fan-in over list-valued inputs
//!
//! A [`SplitJoinNode`] invokes an inner node once per combination of its
//! indexed inputs and gathers the results back into arrays. Inputs that share
//! an index label are zipped; distinct labels form a Cartesian product in
//! lexicographic label order; unlabelled inputs are passed to every call.
//!
//! With `max_parallel > 0` the calls run as tokio tasks bounded by a
//! semaphore. Results are always placed by combination index, never by
//! completion order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{FlowError, Result};
use crate::node::FlowNode;
use crate::registry::{parse_init, NodeFactoryFn, NodeRegistry};
use crate::types::PortValues;

/// Output key holding every invocation's full result map
pub const ARR_OUTPUT: &str = "arr_output";

/// Input key to index label; `None` or an empty label marks a scalar
pub type IndexMapping = BTreeMap<String, Option<String>>;

/// Runs an inner node over combinations of list-valued inputs
#[derive(Clone)]
pub struct SplitJoinNode {
    inner: Arc<dyn FlowNode>,
    index_mapping: IndexMapping,
    max_parallel: usize,
}

/// Lists sharing one index label
struct Group {
    label: String,
    lists: Vec<(String, Vec<Value>)>,
}

impl Group {
    fn len(&self) -> usize {
        self.lists.first().map(|(_, items)| items.len()).unwrap_or(0)
    }
}

impl SplitJoinNode {
    /// `max_parallel == 0` runs invocations one after another
    pub fn new(inner: Arc<dyn FlowNode>, index_mapping: IndexMapping, max_parallel: usize) -> Self {
        Self {
            inner,
            index_mapping,
            max_parallel,
        }
    }

    /// Factory for the `split-join` node type
    ///
    /// ```json
    /// {"inner": {"type": "job-executor", "init": {}}, "index_mapping": {"job_script": "i"}, "max_parallel": 4}
    /// ```
    pub fn from_init(init: &Value, registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        #[derive(Deserialize)]
        struct Inner {
            #[serde(rename = "type")]
            node_type: String,
            #[serde(default)]
            init: Value,
        }
        #[derive(Deserialize)]
        struct Init {
            inner: Inner,
            #[serde(default)]
            index_mapping: IndexMapping,
            #[serde(default)]
            max_parallel: usize,
        }

        let Init {
            inner,
            index_mapping,
            max_parallel,
        } = parse_init("split-join", init)?;
        let inner = registry.create(&inner.node_type, &inner.init)?;
        Ok(Arc::new(Self::new(inner, index_mapping, max_parallel)))
    }

    fn label_of(&self, key: &str) -> Option<&str> {
        self.index_mapping
            .get(key)
            .and_then(|label| label.as_deref())
            .filter(|label| !label.is_empty())
    }

    /// Expand the inputs into one self-contained input map per invocation
    fn combinations(&self, inputs: PortValues) -> Result<Vec<PortValues>> {
        let mut by_label: BTreeMap<String, Vec<(String, Vec<Value>)>> = BTreeMap::new();
        let mut scalars = PortValues::new();

        for (key, value) in inputs {
            match self.label_of(&key) {
                Some(label) => {
                    let Value::Array(items) = value else {
                        return Err(FlowError::SplitJoinNotAList {
                            key,
                            label: label.to_string(),
                        });
                    };
                    by_label.entry(label.to_string()).or_default().push((key, items));
                }
                None => {
                    scalars.insert(key, value);
                }
            }
        }

        let mut groups = Vec::with_capacity(by_label.len());
        for (label, mut lists) in by_label {
            lists.sort_by(|a, b| a.0.cmp(&b.0));
            let first_len = lists.first().map(|(_, items)| items.len()).unwrap_or(0);
            if lists.iter().any(|(_, items)| items.len() != first_len) {
                return Err(FlowError::SplitJoinLengthMismatch {
                    label,
                    lengths: lists
                        .iter()
                        .map(|(key, items)| (key.clone(), items.len()))
                        .collect(),
                });
            }
            groups.push(Group { label, lists });
        }

        let total = combination_count(groups.iter().map(|g| (g.label.as_str(), g.len())))?;
        log::debug!(
            "Split/join over labels {:?} expands to {} invocation(s)",
            groups.iter().map(|g| g.label.as_str()).collect::<Vec<_>>(),
            total
        );

        let mut calls = Vec::with_capacity(total);
        for index in 0..total {
            // Mixed-radix decode; the last label varies fastest
            let mut positions = vec![0; groups.len()];
            let mut rest = index;
            for (slot, group) in groups.iter().enumerate().rev() {
                positions[slot] = rest % group.len();
                rest /= group.len();
            }

            let mut call = scalars.clone();
            for (group, position) in groups.iter().zip(positions) {
                for (key, items) in &group.lists {
                    call.insert(key.clone(), items[position].clone());
                }
            }
            calls.push(call);
        }
        Ok(calls)
    }

    async fn run_serial(&self, calls: Vec<PortValues>) -> Result<Vec<PortValues>> {
        let mut results = Vec::with_capacity(calls.len());
        for (index, call) in calls.into_iter().enumerate() {
            let result = self
                .inner
                .execute(call)
                .await
                .map_err(|e| combination_error(index, e))?;
            results.push(result);
        }
        Ok(results)
    }

    async fn run_parallel(&self, calls: Vec<PortValues>) -> Result<Vec<PortValues>> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut slots: Vec<Option<PortValues>> = vec![None; calls.len()];
        let mut tasks = JoinSet::new();
        let mut queued = calls.into_iter().enumerate().peekable();

        loop {
            if queued.peek().is_none() && tasks.is_empty() {
                break;
            }

            // Completions are drained before new work is dispatched
            tokio::select! {
                biased;

                joined = tasks.join_next(), if !tasks.is_empty() => {
                    let failure = match joined {
                        Some(Ok((index, Ok(result), _permit))) => {
                            slots[index] = Some(result);
                            continue;
                        }
                        Some(Ok((index, Err(e), _permit))) => combination_error(index, e),
                        Some(Err(join_err)) => {
                            FlowError::WorkerPool(format!("invocation did not complete: {}", join_err))
                        }
                        None => continue,
                    };
                    semaphore.close();
                    tasks.abort_all();
                    return Err(failure);
                }

                permit = semaphore.clone().acquire_owned(), if queued.peek().is_some() => {
                    let permit = permit.map_err(|e| FlowError::WorkerPool(e.to_string()))?;
                    let Some((index, call)) = queued.next() else {
                        continue;
                    };
                    let inner = Arc::clone(&self.inner);
                    // The permit is released only once the result has been collected
                    tasks.spawn(async move { (index, inner.execute(call).await, permit) });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    FlowError::WorkerPool(format!("invocation {} produced no result", index))
                })
            })
            .collect()
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "split-join",
    factory: SplitJoinNode::from_init,
});

/// Number of invocations: the product of all `(label, length)` group sizes
fn combination_count<'a>(groups: impl IntoIterator<Item = (&'a str, usize)>) -> Result<usize> {
    groups.into_iter().try_fold(1usize, |total, (label, len)| {
        total.checked_mul(len).ok_or_else(|| {
            FlowError::WorkerPool(format!(
                "combination count overflows at label '{}' ({} items)",
                label, len
            ))
        })
    })
}

fn combination_error(index: usize, source: FlowError) -> FlowError {
    FlowError::SplitJoinCombination {
        index,
        message: source.root_message(),
        source: Box::new(source),
    }
}

#[async_trait]
impl FlowNode for SplitJoinNode {
    fn label(&self) -> String {
        format!(
            "SplitJoinNode(Inner: {}, Index: {:?}, MaxParallel: {})",
            self.inner.label(),
            self.index_mapping,
            self.max_parallel
        )
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        self.inner.required_inputs()
    }

    fn optional_inputs(&self) -> BTreeSet<String> {
        self.inner.optional_inputs()
    }

    fn outputs(&self) -> Vec<String> {
        let mut outputs = vec![ARR_OUTPUT.to_string()];
        outputs.extend(self.inner.outputs());
        outputs
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let calls = self.combinations(inputs)?;
        let results = if self.max_parallel == 0 {
            self.run_serial(calls).await?
        } else {
            self.run_parallel(calls).await?
        };

        let mut out = PortValues::new();
        for name in self.inner.outputs() {
            let column = results
                .iter()
                .map(|r| r.get(&name).cloned().unwrap_or(Value::Null))
                .collect();
            out.insert(name, Value::Array(column));
        }
        let rows = results
            .into_iter()
            .map(|r| Value::Object(r.into_iter().collect()))
            .collect();
        out.insert(ARR_OUTPUT.to_string(), Value::Array(rows));
        Ok(out)
    }
}
