//! Job Script Execution Node
//!
//! Runs a job script through an interpreter and reports how it ended.
//! Uses `tokio::process::Command` for async execution with timeout support.
//! Wrap it in a `split-join` node to run a list of scripts with bounded
//! parallelism.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowline::{parse_init, FlowError, FlowNode, NodeFactoryFn, NodeRegistry, PortValues, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;

/// Default interpreter for job scripts
const DEFAULT_INTERPRETER: &str = "sh";

/// Default timeout in seconds for a job
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Final state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
struct JobExecutorInit {
    #[serde(default = "default_interpreter")]
    interpreter: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

/// Job Executor Node
///
/// # Inputs
/// - `job_script` (required) - Path of the script to run
///
/// # Outputs
/// - `status` - `COMPLETED`, `FAILED` or `TIMEOUT`
/// - `exit_code` - Process exit code (or -1 if killed)
#[derive(Debug, Clone)]
pub struct JobExecutorNode {
    interpreter: String,
    timeout: Duration,
}

impl JobExecutorNode {
    // Input ports
    pub const PORT_JOB_SCRIPT: &'static str = "job_script";

    // Output ports
    pub const PORT_STATUS: &'static str = "status";
    pub const PORT_EXIT_CODE: &'static str = "exit_code";

    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Factory for the `job-executor` node type:
    /// `{"interpreter": "sh", "timeout_secs": 3600}` (both optional)
    pub fn from_init(init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        let init: JobExecutorInit = parse_init("job-executor", init)?;
        Ok(Arc::new(Self::new(
            init.interpreter,
            Duration::from_secs(init.timeout_secs),
        )))
    }

    /// Run one script to completion or timeout
    pub async fn run_script(&self, script: &Path) -> Result<(JobStatus, i32)> {
        if !tokio::fs::try_exists(script).await.unwrap_or(false) {
            return Err(FlowError::failed(format!(
                "Job script not found: {}",
                script.display()
            )));
        }

        log::debug!(
            "JobExecutor: running '{}' with {}, timeout {}s",
            script.display(),
            self.interpreter,
            self.timeout.as_secs()
        );

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // The child is killed when the timeout drops the wait future
        cmd.kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, async {
            let child = cmd.spawn().map_err(|e| {
                FlowError::failed(format!(
                    "Failed to spawn '{}' for '{}': {}",
                    self.interpreter,
                    script.display(),
                    e
                ))
            })?;
            child.wait_with_output().await.map_err(|e| {
                FlowError::failed(format!(
                    "Failed to wait for job '{}': {}",
                    script.display(),
                    e
                ))
            })
        })
        .await;

        let (status, exit_code) = match result {
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(-1);
                let status = if output.status.success() {
                    JobStatus::Completed
                } else {
                    log::debug!(
                        "JobExecutor: '{}' stderr: {}",
                        script.display(),
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                    JobStatus::Failed
                };
                (status, code)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                log::warn!(
                    "JobExecutor: '{}' timed out after {}s",
                    script.display(),
                    self.timeout.as_secs()
                );
                (JobStatus::Timeout, -1)
            }
        };

        log::debug!(
            "JobExecutor: '{}' finished with {} (exit_code={})",
            script.display(),
            status.as_str(),
            exit_code
        );
        Ok((status, exit_code))
    }
}

impl Default for JobExecutorNode {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "job-executor",
    factory: JobExecutorNode::from_init,
});

#[async_trait]
impl FlowNode for JobExecutorNode {
    fn label(&self) -> String {
        format!(
            "JobExecutor(Interpreter: {}, Timeout: {}s)",
            self.interpreter,
            self.timeout.as_secs()
        )
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        BTreeSet::from([Self::PORT_JOB_SCRIPT.to_string()])
    }

    fn outputs(&self) -> Vec<String> {
        vec![
            Self::PORT_STATUS.to_string(),
            Self::PORT_EXIT_CODE.to_string(),
        ]
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let script = inputs
            .get(Self::PORT_JOB_SCRIPT)
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::invalid_input(Self::PORT_JOB_SCRIPT, "script path string"))?;

        let (status, exit_code) = self.run_script(Path::new(script)).await?;

        Ok(PortValues::from([
            (Self::PORT_STATUS.to_string(), json!(status)),
            (Self::PORT_EXIT_CODE.to_string(), json!(exit_code)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline::port_values;
    use std::io::Write;

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn script_input(file: &tempfile::NamedTempFile) -> PortValues {
        port_values([("job_script", json!(file.path().to_string_lossy()))])
    }

    #[test]
    fn test_factory_defaults() {
        let node = JobExecutorNode::from_init(&Value::Null, &NodeRegistry::new()).unwrap();
        assert_eq!(node.label(), "JobExecutor(Interpreter: sh, Timeout: 3600s)");
        assert_eq!(node.outputs(), vec!["status", "exit_code"]);

        let node = JobExecutorNode::from_init(
            &json!({"interpreter": "bash", "timeout_secs": 5}),
            &NodeRegistry::new(),
        )
        .unwrap();
        assert_eq!(node.label(), "JobExecutor(Interpreter: bash, Timeout: 5s)");
    }

    #[tokio::test]
    async fn test_successful_job() {
        let file = script("echo done\nexit 0\n");
        let out = JobExecutorNode::default()
            .execute(script_input(&file))
            .await
            .unwrap();
        assert_eq!(out["status"], json!("COMPLETED"));
        assert_eq!(out["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_failing_job() {
        let file = script("echo broken >&2\nexit 3\n");
        let out = JobExecutorNode::default()
            .execute(script_input(&file))
            .await
            .unwrap();
        assert_eq!(out["status"], json!("FAILED"));
        assert_eq!(out["exit_code"], json!(3));
    }

    #[tokio::test]
    async fn test_job_timeout() {
        let file = script("sleep 10\n");
        let node = JobExecutorNode::new("sh", Duration::from_secs(1));
        let out = node.execute(script_input(&file)).await.unwrap();
        assert_eq!(out["status"], json!("TIMEOUT"));
        assert_eq!(out["exit_code"], json!(-1));
    }

    #[tokio::test]
    async fn test_missing_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.sh");
        let err = JobExecutorNode::default()
            .execute(port_values([("job_script", json!(missing.to_string_lossy()))]))
            .await
            .unwrap_err();
        assert!(err.root_message().contains("Job script not found"));
    }

    #[tokio::test]
    async fn test_unknown_interpreter_fails() {
        let file = script("exit 0\n");
        let node = JobExecutorNode::new("definitely-not-an-interpreter", Duration::from_secs(5));
        let err = node.execute(script_input(&file)).await.unwrap_err();
        assert!(err.root_message().contains("Failed to spawn"));
    }
}
