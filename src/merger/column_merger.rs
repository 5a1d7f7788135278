//! The interface every type merger implements.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, SegmentDirectory};
use crate::merger::merger_resource::MergerResource;
use crate::storage::Storage;

/// One of `total_parallel_count` slices of a parallel merge, covering new
/// doc ids `[begin, end)` of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelMergeItem {
    pub part_id: u32,
    pub total_parallel_count: u32,
    pub begin: DocId,
    pub end: DocId,
}

/// Split `[0, new_doc_count)` into `parallel_count` contiguous ranges.
pub fn split_parallel_ranges(new_doc_count: u32, parallel_count: usize) -> Vec<ParallelMergeItem> {
    let count = parallel_count.max(1) as u64;
    let total = new_doc_count as u64;
    (0..count)
        .map(|part| ParallelMergeItem {
            part_id: part as u32,
            total_parallel_count: count as u32,
            begin: (total * part / count) as DocId,
            end: (total * (part + 1) / count) as DocId,
        })
        .collect()
}

/// Find the partial output `rel_path` in one of the merge instance roots.
pub(crate) fn locate_part(
    storage: &dyn Storage,
    instance_roots: &[String],
    rel_path: &str,
) -> Result<String> {
    instance_roots
        .iter()
        .map(|root| format!("{root}/{rel_path}"))
        .find(|path| storage.file_exists(path))
        .ok_or_else(|| {
            IndexlibError::index_collapsed(format!(
                "parallel merge output [{rel_path}] missing in every instance"
            ))
        })
}

/// Rewrites one column or index of one table for a merge plan.
///
/// Sources are read through the resource's segment directory; everything
/// is written to the storage passed in, under the target roots.
pub trait ColumnMerger: Send + Sync + Debug {
    /// Stable name, unique within a plan, e.g. `attribute/price`.
    fn identifier(&self) -> String;

    /// Check that every source segment has the data this merger reads.
    fn begin_merge(&self, _segment_directory: &SegmentDirectory) -> Result<()> {
        Ok(())
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64;

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()>;

    fn supports_parallel(&self) -> bool {
        false
    }

    fn create_parallel_merge_items(
        &self,
        resource: &MergerResource,
        parallel_count: usize,
    ) -> Result<Vec<ParallelMergeItem>> {
        if !self.supports_parallel() {
            return Err(IndexlibError::unsupported(format!(
                "[{}] cannot be merged in parallel",
                self.identifier()
            )));
        }
        Ok(split_parallel_ranges(
            resource.reclaim_map.new_doc_count(),
            parallel_count,
        ))
    }

    /// Merge one slice into a partial output below
    /// [`MergerResource::parallel_dir`].
    fn merge_part(
        &self,
        _resource: &MergerResource,
        _item: &ParallelMergeItem,
        _storage: &dyn Storage,
    ) -> Result<()> {
        Err(IndexlibError::unsupported(format!(
            "[{}] cannot be merged in parallel",
            self.identifier()
        )))
    }

    /// Stitch the partial outputs found below `instance_roots` in `source`
    /// into the final target files in `dest`. Parts may have completed in
    /// any order.
    fn end_parallel_merge(
        &self,
        _resource: &MergerResource,
        _total_parallel_count: u32,
        _instance_roots: &[String],
        _source: &dyn Storage,
        _dest: &dyn Storage,
    ) -> Result<()> {
        Err(IndexlibError::unsupported(format!(
            "[{}] cannot be merged in parallel",
            self.identifier()
        )))
    }
}
