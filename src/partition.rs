//! Building and reading one index partition.
//!
//! [`IndexBuilder`] turns documents into segments and versions and merges
//! them through [`IndexPartitionMerger`](crate::merger::IndexPartitionMerger).
//! [`PartitionReader`] serves lookups on a version and catches up to newer
//! ones by replaying the builder's operations.

pub mod builder;
pub mod reader;

pub use builder::IndexBuilder;
pub use reader::PartitionReader;
