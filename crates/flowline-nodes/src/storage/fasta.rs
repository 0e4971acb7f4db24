//! FASTA file nodes
//!
//! [`LoadFastaNode`] parses a FASTA file into a list of records and
//! [`WriteFastaNode`] writes such a list back out. Records travel between
//! nodes as JSON objects `{"id", "desc", "seq"}`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use flowline::{parse_init, FlowError, FlowNode, NodeFactoryFn, NodeRegistry, PortValues, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Sequence characters per line when writing
const LINE_WIDTH: usize = 80;

/// One FASTA entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastaRecord {
    /// First word of the header line
    #[serde(default)]
    pub id: String,
    /// Full header line without the leading `>`
    pub desc: String,
    /// Concatenated sequence
    pub seq: String,
}

impl FastaRecord {
    /// Parse FASTA text; blank lines are skipped
    pub fn parse_all(content: &str) -> std::result::Result<Vec<Self>, String> {
        let mut records = Vec::new();
        let mut current: Option<FastaRecord> = None;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix('>') {
                records.extend(current.take());
                current = Some(FastaRecord {
                    id: header.split_whitespace().next().unwrap_or_default().to_string(),
                    desc: header.to_string(),
                    seq: String::new(),
                });
            } else {
                match current.as_mut() {
                    Some(record) => record.seq.push_str(line),
                    None => {
                        return Err(format!(
                            "sequence data on line {} before any header line",
                            line_no + 1
                        ))
                    }
                }
            }
        }
        records.extend(current);
        Ok(records)
    }

    /// Render records with `>desc` headers and fixed-width sequence lines
    pub fn render_all(records: &[FastaRecord]) -> String {
        let mut out = String::new();
        for record in records {
            out.push('>');
            out.push_str(&record.desc);
            out.push('\n');
            let seq: Vec<char> = record.seq.chars().collect();
            for chunk in seq.chunks(LINE_WIDTH) {
                out.extend(chunk);
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Deserialize)]
struct FastaInit {
    #[serde(default)]
    file_path: Option<String>,
}

fn path_ports(default_path: &Option<String>, port: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let port = BTreeSet::from([port.to_string()]);
    match default_path {
        Some(_) => (BTreeSet::new(), port),
        None => (port, BTreeSet::new()),
    }
}

fn resolve_path(inputs: &PortValues, port: &str, default_path: &Option<String>) -> Result<String> {
    match inputs.get(port) {
        Some(Value::String(path)) => Ok(path.clone()),
        Some(_) => Err(FlowError::invalid_input(port, "file path string")),
        None => default_path
            .clone()
            .ok_or_else(|| FlowError::invalid_input(port, "file path string")),
    }
}

/// Load FASTA Node
///
/// # Inputs
/// - `fasta_file_path` - Path of the file to read; optional when a default
///   `file_path` was given at construction
///
/// # Outputs
/// - `fasta_records` - Array of `{"id", "desc", "seq"}` objects
#[derive(Debug, Clone, Default)]
pub struct LoadFastaNode {
    default_path: Option<String>,
}

impl LoadFastaNode {
    /// Port ID for the path input
    pub const PORT_FILE_PATH: &'static str = "fasta_file_path";
    /// Port ID for the records output
    pub const PORT_RECORDS: &'static str = "fasta_records";

    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a default path used when none arrives as input
    pub fn with_file_path(path: impl Into<String>) -> Self {
        Self {
            default_path: Some(path.into()),
        }
    }

    /// Factory for the `load-fasta` node type: `{"file_path": "..."}` (optional)
    pub fn from_init(init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        let FastaInit { file_path } = parse_init("load-fasta", init)?;
        Ok(Arc::new(Self {
            default_path: file_path,
        }))
    }

    /// Read and parse a FASTA file
    pub async fn load(path: impl AsRef<Path>) -> Result<Vec<FastaRecord>> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            FlowError::failed(format!("Error loading FASTA file '{}': {}", path.display(), e))
        })?;
        FastaRecord::parse_all(&content).map_err(|e| {
            FlowError::failed(format!("Error loading FASTA file '{}': {}", path.display(), e))
        })
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "load-fasta",
    factory: LoadFastaNode::from_init,
});

#[async_trait]
impl FlowNode for LoadFastaNode {
    fn label(&self) -> String {
        match &self.default_path {
            Some(path) => format!("LoadFasta(Default: {path})"),
            None => "LoadFasta".to_string(),
        }
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        path_ports(&self.default_path, Self::PORT_FILE_PATH).0
    }

    fn optional_inputs(&self) -> BTreeSet<String> {
        path_ports(&self.default_path, Self::PORT_FILE_PATH).1
    }

    fn outputs(&self) -> Vec<String> {
        vec![Self::PORT_RECORDS.to_string()]
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let path = resolve_path(&inputs, Self::PORT_FILE_PATH, &self.default_path)?;
        let records = Self::load(&path).await?;
        log::debug!("Loaded {} FASTA records from {}", records.len(), path);

        Ok(PortValues::from([(
            Self::PORT_RECORDS.to_string(),
            serde_json::to_value(records)?,
        )]))
    }
}

/// Write FASTA Node
///
/// # Inputs
/// - `fasta_records` (required) - Array of `{"desc", "seq"}` objects
/// - `fasta_file_path` - Destination path; optional when a default
///   `file_path` was given at construction
///
/// # Outputs
/// - `write_success` - `true` once the file is written
/// - `fasta_file_path` - The path that was written
#[derive(Debug, Clone, Default)]
pub struct WriteFastaNode {
    default_path: Option<String>,
}

impl WriteFastaNode {
    /// Port ID for the records input
    pub const PORT_RECORDS: &'static str = "fasta_records";
    /// Port ID for the path input and output
    pub const PORT_FILE_PATH: &'static str = "fasta_file_path";
    /// Port ID for the success output
    pub const PORT_SUCCESS: &'static str = "write_success";

    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a default path used when none arrives as input
    pub fn with_file_path(path: impl Into<String>) -> Self {
        Self {
            default_path: Some(path.into()),
        }
    }

    /// Factory for the `write-fasta` node type: `{"file_path": "..."}` (optional)
    pub fn from_init(init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        let FastaInit { file_path } = parse_init("write-fasta", init)?;
        Ok(Arc::new(Self {
            default_path: file_path,
        }))
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "write-fasta",
    factory: WriteFastaNode::from_init,
});

#[async_trait]
impl FlowNode for WriteFastaNode {
    fn label(&self) -> String {
        match &self.default_path {
            Some(path) => format!("WriteFasta(Default: {path})"),
            None => "WriteFasta".to_string(),
        }
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        let mut required = path_ports(&self.default_path, Self::PORT_FILE_PATH).0;
        required.insert(Self::PORT_RECORDS.to_string());
        required
    }

    fn optional_inputs(&self) -> BTreeSet<String> {
        path_ports(&self.default_path, Self::PORT_FILE_PATH).1
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            Self::PORT_SUCCESS.to_string(),
            Self::PORT_FILE_PATH.to_string(),
        ]
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let path = resolve_path(&inputs, Self::PORT_FILE_PATH, &self.default_path)?;
        let records: Vec<FastaRecord> = inputs
            .get(Self::PORT_RECORDS)
            .cloned()
            .map(serde_json::from_value::<Vec<FastaRecord>>)
            .transpose()
            .map_err(|e| {
                FlowError::invalid_input(
                    Self::PORT_RECORDS,
                    format!("array of {{\"desc\", \"seq\"}} records ({e})"),
                )
            })?
            .ok_or_else(|| FlowError::invalid_input(Self::PORT_RECORDS, "array of FASTA records"))?;

        tokio::fs::write(&path, FastaRecord::render_all(&records))
            .await
            .map_err(|e| FlowError::failed(format!("Error writing FASTA file to '{path}': {e}")))?;
        log::debug!("Wrote {} FASTA records to {}", records.len(), path);

        Ok(PortValues::from([
            (Self::PORT_SUCCESS.to_string(), json!(true)),
            (Self::PORT_FILE_PATH.to_string(), json!(path)),
        ]))
    }
}
