//! # indexlib
//!
//! A versioned, segment-structured document index with a parallel segment
//! merge engine.
//!
//! ## Features
//!
//! - Immutable segments committed under numbered versions
//! - Updatable attributes and deletions recorded as patch files
//! - Pluggable merge strategies (balance tree, optimize, key-value optimize)
//! - Memory-budgeted multi-threaded merging with checkpoints and resume
//! - Pluggable storage backends
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use indexlib::config::{AttributeConfig, FieldType, IndexPartitionOptions, PrimaryKeyConfig, Schema};
//! use indexlib::document::Document;
//! use indexlib::partition::IndexBuilder;
//! use indexlib::storage::Storage;
//! use indexlib::storage::memory::MemoryStorage;
//!
//! # fn main() -> indexlib::error::Result<()> {
//! let schema = Arc::new(
//!     Schema::new("items")
//!         .with_attribute(AttributeConfig::new("id", FieldType::String))
//!         .with_primary_key(PrimaryKeyConfig::new("id")),
//! );
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
//! let mut builder = IndexBuilder::open(storage, schema, IndexPartitionOptions::default())?;
//! builder.build(&Document::add(1).with_field("id", "a"))?;
//! let version = builder.dump_segment()?;
//! assert!(version.is_some());
//! # Ok(())
//! # }
//! ```

pub mod attribute;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod index_base;
pub mod inverted;
pub mod merger;
pub mod metrics;
pub mod operation;
pub mod partition;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::config::{IndexPartitionOptions, Schema};
    pub use crate::document::{Document, FieldValue};
    pub use crate::error::{IndexlibError, Result};
    pub use crate::index_base::{SegmentId, Version};
    pub use crate::merger::IndexPartitionMerger;
    pub use crate::partition::{IndexBuilder, PartitionReader};
    pub use crate::storage::Storage;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
