//! Storage nodes
//!
//! Nodes for reading and writing sequence files.

mod fasta;

pub use fasta::{FastaRecord, LoadFastaNode, WriteFastaNode};
