//! Flow configuration
//!
//! A [`FlowConfig`] is the declarative form the builder consumes. The JSON
//! shape is
//!
//! ```json
//! {
//!   "pipe_name": {
//!     "type": "registered-node-type",
//!     "init": { "param": 1 },
//!     "upstream_pipes": { "*": { "external_key": "input_key" } }
//!   }
//! }
//! ```
//!
//! Document order is preserved for both pipes and upstream lists, so builder
//! warnings and graph edge order follow the file.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::node::FlowNode;
use crate::types::EdgeMapping;

/// Reserved name of the implicit source pipe
pub const SOURCE_PIPE: &str = "*";

/// Deferral ceiling used when none is configured
pub const DEFAULT_MAX_DEFERRALS: usize = 100;

fn default_max_deferrals() -> usize {
    DEFAULT_MAX_DEFERRALS
}

/// Runtime tuning for [`FlowManager`](crate::manager::FlowManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOptions {
    /// How many times one node may be re-queued before the run fails
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_deferrals: DEFAULT_MAX_DEFERRALS,
        }
    }
}

/// How a pipe's node is obtained
#[derive(Clone)]
pub enum NodeSpec {
    /// Created by a registry factory from init parameters
    Registered { node_type: String, init: Value },
    /// Supplied ready-made
    Instance(Arc<dyn FlowNode>),
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { node_type, init } => f
                .debug_struct("Registered")
                .field("node_type", node_type)
                .field("init", init)
                .finish(),
            Self::Instance(node) => f.debug_tuple("Instance").field(&node.label()).finish(),
        }
    }
}

/// One entry of a flow configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub spec: NodeSpec,
    /// Upstream pipe names with their output-to-input mappings, in declaration order
    pub upstream_pipes: Vec<(String, EdgeMapping)>,
}

impl PipeConfig {
    pub fn registered(node_type: impl Into<String>, init: Value) -> Self {
        Self {
            spec: NodeSpec::Registered {
                node_type: node_type.into(),
                init,
            },
            upstream_pipes: Vec::new(),
        }
    }

    pub fn instance(node: impl FlowNode + 'static) -> Self {
        Self::shared(Arc::new(node))
    }

    pub fn shared(node: Arc<dyn FlowNode>) -> Self {
        Self {
            spec: NodeSpec::Instance(node),
            upstream_pipes: Vec::new(),
        }
    }

    /// Add an upstream connection; use [`SOURCE_PIPE`] for external inputs
    pub fn upstream(mut self, name: impl Into<String>, mapping: EdgeMapping) -> Self {
        self.upstream_pipes.push((name.into(), mapping));
        self
    }
}

#[derive(Deserialize)]
struct RawPipe {
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    init: Value,
    #[serde(default)]
    upstream_pipes: Option<Ordered<EdgeMapping>>,
}

impl From<RawPipe> for PipeConfig {
    fn from(raw: RawPipe) -> Self {
        Self {
            spec: NodeSpec::Registered {
                node_type: raw.node_type,
                init: raw.init,
            },
            upstream_pipes: raw.upstream_pipes.map(|o| o.0).unwrap_or_default(),
        }
    }
}

/// A JSON object read as a list of entries in document order
struct Ordered<V>(Vec<(String, V)>);

struct OrderedVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
    type Value = Ordered<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, V>()? {
            entries.push((key, value));
        }
        Ok(Ordered(entries))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Ordered<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Ordered set of named pipes
#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    pipes: Vec<(String, PipeConfig)>,
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pipe; a later entry with the same name replaces the earlier one
    pub fn pipe(mut self, name: impl Into<String>, config: PipeConfig) -> Self {
        let name = name.into();
        match self.pipes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = config,
            None => self.pipes.push((name, config)),
        }
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: Ordered<RawPipe> = serde_json::from_str(json)?;
        Ok(raw
            .0
            .into_iter()
            .fold(Self::new(), |cfg, (name, pipe)| cfg.pipe(name, pipe.into())))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded flow configuration from {:?}", path.as_ref());
        Self::from_json_str(&content)
    }

    /// [`from_path`](Self::from_path) for async callers
    pub async fn from_path_async(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        log::debug!("Loaded flow configuration from {:?}", path.as_ref());
        Self::from_json_str(&content)
    }

    pub fn pipes(&self) -> &[(String, PipeConfig)] {
        &self.pipes
    }

    pub fn get(&self, name: &str) -> Option<&PipeConfig> {
        self.pipes.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use serde_json::json;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "zeta": {
            "type": "output-filter",
            "init": {"keep": ["a"]},
            "upstream_pipes": {"*": {"ext": "a"}, "alpha": {}}
        },
        "alpha": {
            "type": "output-renamer",
            "init": {"mapping": {"a": "b"}}
        }
    }"#;

    #[test]
    fn test_parse_preserves_document_order() {
        let cfg = FlowConfig::from_json_str(SAMPLE).unwrap();
        let names: Vec<&str> = cfg.pipes().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let zeta = cfg.get("zeta").unwrap();
        let ups: Vec<&str> = zeta.upstream_pipes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(ups, vec![SOURCE_PIPE, "alpha"]);
        assert_eq!(zeta.upstream_pipes[0].1["ext"], "a");
        assert!(zeta.upstream_pipes[1].1.is_empty());

        match &cfg.get("alpha").unwrap().spec {
            NodeSpec::Registered { node_type, init } => {
                assert_eq!(node_type, "output-renamer");
                assert_eq!(init["mapping"]["a"], json!("b"));
            }
            other => panic!("unexpected spec: {other:?}"),
        }
        assert!(cfg.get("alpha").unwrap().upstream_pipes.is_empty());
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = FlowConfig::from_json_str(r#"{"p": {"init": {}}}"#).unwrap_err();
        assert!(matches!(err, FlowError::Serialization(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cfg = FlowConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.len(), 2);

        let missing = FlowConfig::from_path(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(FlowError::Io(_))));
    }

    #[tokio::test]
    async fn test_from_path_async() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cfg = FlowConfig::from_path_async(file.path()).await.unwrap();
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.pipes()[0].0, "zeta");

        let missing = FlowConfig::from_path_async(file.path().with_extension("missing")).await;
        assert!(matches!(missing, Err(FlowError::Io(_))));
    }

    #[test]
    fn test_manager_options_defaults() {
        let opts: ManagerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.max_deferrals, DEFAULT_MAX_DEFERRALS);
        assert_eq!(opts, ManagerOptions::default());

        let opts: ManagerOptions = serde_json::from_str(r#"{"max_deferrals": 5}"#).unwrap();
        assert_eq!(opts.max_deferrals, 5);
    }

    #[test]
    fn test_programmatic_pipe_replaces_same_name() {
        let cfg = FlowConfig::new()
            .pipe("a", PipeConfig::registered("x", Value::Null))
            .pipe("b", PipeConfig::registered("y", Value::Null))
            .pipe("a", PipeConfig::registered("z", Value::Null));
        assert_eq!(cfg.len(), 2);
        assert!(matches!(
            &cfg.get("a").unwrap().spec,
            NodeSpec::Registered { node_type, .. } if node_type == "z"
        ));
    }
}
