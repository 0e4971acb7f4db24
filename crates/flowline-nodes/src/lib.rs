//! Flowline Nodes
//!
//! Leaf node implementations for the Flowline engine. Each node registers a
//! factory with [`NodeRegistry`] at link time, so flows can name it by type
//! in a JSON configuration.
//!
//! # Categories
//!
//! - **Utility**: Amount conversion
//! - **Storage**: FASTA file load and write
//! - **System**: Job script execution

pub mod storage;
pub mod system;
pub mod utility;

use flowline::NodeRegistry;

// Re-export all nodes for convenience
pub use storage::*;
pub use system::*;
pub use utility::*;

/// Registry with the engine's built-in node types plus every node in this crate
///
/// Calling this from a binary also guarantees the crate is linked, so its
/// factories are visible to [`NodeRegistry::with_builtins`].
pub fn builtin_registry() -> NodeRegistry {
    NodeRegistry::with_builtins()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline::{build_flow, FlowConfig, PortValues};
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = builtin_registry();
        assert_eq!(
            registry.node_types(),
            vec![
                "job-executor",
                "load-fasta",
                "output-filter",
                "output-renamer",
                "split-join",
                "unit-amount-converter",
                "write-fasta",
            ]
        );
    }

    #[tokio::test]
    async fn test_fasta_round_trip_flow() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.fa");
        let output = dir.path().join("out.fa");
        std::fs::write(&input, ">a one\nAC\nGT\n>b two\nTT\n").unwrap();

        let config = FlowConfig::from_json_str(
            &json!({
                "load": {
                    "type": "load-fasta",
                    "upstream_pipes": {"*": {"in_path": "fasta_file_path"}}
                },
                "count": {
                    "type": "unit-amount-converter",
                    "upstream_pipes": {
                        "*": {"share": "amount"},
                        "load": {"fasta_records": "items"}
                    }
                },
                "write": {
                    "type": "write-fasta",
                    "init": {"file_path": output.to_string_lossy()},
                    "upstream_pipes": {"load": {"fasta_records": "fasta_records"}}
                }
            })
            .to_string(),
        )
        .unwrap();

        let built = build_flow(&config, &builtin_registry()).unwrap();
        let out = built
            .manager
            .run(PortValues::from([
                ("in_path".to_string(), json!(input.to_string_lossy())),
                ("share".to_string(), json!("50%")),
            ]))
            .await
            .unwrap();

        assert_eq!(out["amount"], json!(1));
        assert_eq!(out["write_success"], json!(true));
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            ">a one\nACGT\n>b two\nTT\n"
        );
    }

    #[tokio::test]
    async fn test_split_join_job_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripts = Vec::new();
        for (i, code) in [0, 1, 0].into_iter().enumerate() {
            let path = dir.path().join(format!("job{i}.sh"));
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "exit {code}").unwrap();
            scripts.push(json!(path.to_string_lossy()));
        }

        let config = FlowConfig::from_json_str(
            &json!({
                "jobs": {
                    "type": "split-join",
                    "init": {
                        "inner": {"type": "job-executor", "init": {"timeout_secs": 30}},
                        "index_mapping": {"job_script": "job"},
                        "max_parallel": 2
                    },
                    "upstream_pipes": {"*": {"scripts": "job_script"}}
                }
            })
            .to_string(),
        )
        .unwrap();

        let built = build_flow(&config, &builtin_registry()).unwrap();
        let out = built
            .manager
            .run(PortValues::from([("scripts".to_string(), json!(scripts))]))
            .await
            .unwrap();

        assert_eq!(out["status"], json!(["COMPLETED", "FAILED", "COMPLETED"]));
        assert_eq!(out["exit_code"], json!([0, 1, 0]));
        assert_eq!(out["arr_output"].as_array().unwrap().len(), 3);
    }
}
