//! Configuration consumed by the build, merge and read paths.
//!
//! All configuration is plain serde data with `Default` impls so it can be
//! loaded from JSON by the CLI or built in code by tests:
//!
//! - [`schema::Schema`] - attributes, pack attributes, indexes, primary key,
//!   sort description and the optional sub-document schema
//! - [`options::IndexPartitionOptions`] - build, merge and online knobs
//! - [`merge_strategy_parameter::MergeStrategyParameter`] - the
//!   `key=value;key=value` strategy parameter strings

pub mod merge_strategy_parameter;
pub mod options;
pub mod schema;

pub use merge_strategy_parameter::{MergeStrategyParameter, StrategyParams};
pub use options::{BuildConfig, IndexPartitionOptions, MergeConfig, OnlineConfig};
pub use schema::{
    AttributeConfig, FieldType, IndexConfig, IndexType, PackAttributeConfig, PkHashType,
    PrimaryKeyConfig, Schema, SortDescription, SortPattern,
};
