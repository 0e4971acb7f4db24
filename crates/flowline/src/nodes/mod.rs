//! Specialized nodes shipped with the engine

mod filter;
mod renamer;
mod source;
mod split_join;
mod sub_pipeline;

pub use filter::OutputFilter;
pub use renamer::OutputRenamer;
pub use source::SourceNode;
pub use split_join::{IndexMapping, SplitJoinNode, ARR_OUTPUT};
pub use sub_pipeline::SubPipeline;
