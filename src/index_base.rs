//! On-disk index structure: layout, segments, versions and deletion maps.
//!
//! An index directory holds immutable segment directories `segment_<id>/`
//! plus `version.<id>` files naming which segments form a consistent view.
//! Deletes and updates against already built segments live in patch files
//! written by later segments; [`patch_file_finder`] locates them and
//! [`patch_file_filter`] drops the ones a reader must not apply again.

pub mod deletion_map;
pub mod layout;
pub mod patch_file_filter;
pub mod patch_file_finder;
pub mod segment_directory;
pub mod segment_info;
pub mod version;

/// Identifier of a segment.
pub type SegmentId = u32;

/// Document id, local to a segment or global to a partition view.
pub type DocId = u32;

/// Identifier of a committed version.
pub type VersionId = i64;

pub use deletion_map::DeletionMap;
pub use patch_file_filter::PatchFileFilter;
pub use patch_file_finder::{PatchFileFinder, PatchFileInfo};
pub use segment_directory::SegmentDirectory;
pub use segment_info::SegmentInfo;
pub use version::{LevelInfo, LevelMeta, LevelTopology, Locator, Version, VersionCommitter};
