//! Everything a column merger needs to rewrite one table of one plan.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::attribute::container::AttributeReaderContainer;
use crate::config::Schema;
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, SegmentDirectory, SegmentId};
use crate::merger::reclaim_map::ReclaimMap;
use crate::merger::segment_merge_info::SegmentMergeInfo;

/// A target segment of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSegmentMergeInfo {
    pub target_index: usize,
    pub segment_id: SegmentId,

    /// Directory of this table within the target segment.
    pub root: String,

    pub doc_count: u32,
}

#[derive(Debug, Clone)]
pub struct MergerResource {
    pub plan_idx: usize,

    /// Map of this table.
    pub reclaim_map: Arc<ReclaimMap>,

    /// Map of the sub table, set on the main table of a schema with sub
    /// documents.
    pub sub_reclaim_map: Option<Arc<ReclaimMap>>,

    pub segment_directory: SegmentDirectory,
    pub attr_readers: Arc<AttributeReaderContainer>,
    pub segment_merge_infos: Vec<SegmentMergeInfo>,
    pub outputs: Vec<OutputSegmentMergeInfo>,

    /// Segments merged away by any plan of the task.
    pub merged_segments: BTreeSet<SegmentId>,
}

impl MergerResource {
    pub fn schema(&self) -> &Arc<Schema> {
        self.attr_readers.schema()
    }

    pub fn is_sub(&self) -> bool {
        self.segment_directory.is_sub()
    }

    /// Whether `segment_id` remains in the version after the merge.
    pub fn survives(&self, segment_id: SegmentId) -> bool {
        !self.merged_segments.contains(&segment_id) && self.segment_directory.contains(segment_id)
    }

    /// Whether this plan merges `segment_id` away.
    pub fn merges(&self, segment_id: SegmentId) -> bool {
        self.segment_merge_infos.iter().any(|s| s.segment_id == segment_id)
    }

    /// Target receiving patches carried forward from merged segments.
    pub fn first_output(&self) -> Result<&OutputSegmentMergeInfo> {
        self.outputs.first().ok_or_else(|| {
            IndexlibError::inconsistent_state(format!("plan [{}] has no target", self.plan_idx))
        })
    }

    /// Source segment and local id of new document `new_id`.
    pub fn old_doc(&self, new_id: DocId) -> Result<(SegmentId, DocId)> {
        self.reclaim_map
            .get_old_doc_id_and_seg_id(new_id)
            .ok_or_else(|| {
                IndexlibError::index_collapsed(format!(
                    "new doc [{new_id}] of plan [{}] has no source",
                    self.plan_idx
                ))
            })
    }

    /// Target and target-local id of new document `new_id`.
    pub fn target_of(&self, new_id: DocId) -> Result<(&OutputSegmentMergeInfo, DocId)> {
        let (target, local) = self.reclaim_map.get_local_id_in_target(new_id).ok_or_else(|| {
            IndexlibError::index_collapsed(format!(
                "new doc [{new_id}] of plan [{}] has no target",
                self.plan_idx
            ))
        })?;
        let output = self.outputs.get(target).ok_or_else(|| {
            IndexlibError::inconsistent_state(format!("plan [{}] lacks target [{target}]", self.plan_idx))
        })?;
        Ok((output, local))
    }

    /// Directory, relative to a merge instance root, of the partial outputs
    /// of a parallel merger.
    pub fn parallel_dir(&self, merger_id: &str) -> String {
        format!("parallel/{}/{merger_id}", self.item_prefix())
    }

    /// Prefix of work item identifiers of this table, e.g. `plan_0/sub`.
    pub fn item_prefix(&self) -> String {
        if self.is_sub() {
            format!("plan_{}/sub", self.plan_idx)
        } else {
            format!("plan_{}", self.plan_idx)
        }
    }
}
