//! Segment merge engine.
//!
//! A merge runs in three phases:
//!
//! 1. **Prepare.** A [`MergeStrategy`](strategy::MergeStrategy) turns segment
//!    metadata into a [`MergeTask`](merge_plan::MergeTask). For every plan a
//!    [`ReclaimMap`](reclaim_map::ReclaimMap) translating old doc ids into new
//!    ones is built from a deletion-map snapshot, and everything is persisted
//!    as [`MergeMeta`](merge_meta::MergeMeta).
//! 2. **Merge.** Each plan becomes one work item per column merger (or one per
//!    slice when the merger runs in parallel). Items are spread over merge
//!    instances and run by the
//!    [`MultiThreadedMergeScheduler`](scheduler::MultiThreadedMergeScheduler)
//!    within a memory budget, leaving checkpoints behind.
//! 3. **End.** Slices of parallel merges are stitched together, outputs are
//!    moved into the index directory and a new version is committed.

pub mod attribute_merger;
pub mod column_merger;
pub mod deletion_map_merger;
pub mod inverted_index_merger;
pub mod join_merger;
pub mod merge_file_system;
pub mod merge_meta;
pub mod merge_plan;
pub mod merger_resource;
pub mod parallel_end_merge;
pub mod partition_merger;
pub mod primary_key_merger;
pub mod reclaim_map;
pub mod scheduler;
pub mod segment_merge_info;
pub mod split;
pub mod strategy;
pub mod task_executor;
pub mod work_item;

pub use attribute_merger::AttributeMerger;
pub use column_merger::{ColumnMerger, ParallelMergeItem};
pub use merge_file_system::{BufferedMergeFileSystem, MergeFileSystem};
pub use merge_meta::{MergeMeta, MergePlanMeta, MergePlanResource};
pub use merge_plan::{MergePlan, MergeTask};
pub use merger_resource::{MergerResource, OutputSegmentMergeInfo};
pub use parallel_end_merge::ParallelEndMergeExecutor;
pub use partition_merger::IndexPartitionMerger;
pub use reclaim_map::ReclaimMap;
pub use scheduler::{MultiThreadedMergeScheduler, ScheduleStats};
pub use segment_merge_info::{SegmentMergeInfo, SegmentMergeInfos, create_segment_merge_infos};
pub use split::{SegmentSplitStrategy, SplitStrategyConfig};
pub use strategy::{MergeStrategy, MergeStrategyRegistry};
pub use task_executor::{MergeTaskExecutor, TaskExecuteMeta};
pub use work_item::{ColumnMergeWorkItem, MergeWorkItem};
