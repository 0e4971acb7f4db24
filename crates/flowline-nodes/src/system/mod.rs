//! System nodes
//!
//! Nodes that interact with the host system (job scripts).

mod job_executor;

pub use job_executor::{JobExecutorNode, JobStatus};
