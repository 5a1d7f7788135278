//! Per-segment metadata merge strategies decide on.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index_base::{DocId, Locator, SegmentDirectory, SegmentId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMergeInfo {
    pub segment_id: SegmentId,
    pub doc_count: u32,
    pub deleted_doc_count: u32,

    /// First global doc id of the segment in its version.
    pub base_doc_id: DocId,

    pub timestamp: i64,
    #[serde(default)]
    pub locator: Locator,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub level_idx: u32,
    #[serde(default)]
    pub in_level_idx: u32,
}

impl SegmentMergeInfo {
    pub fn new(segment_id: SegmentId, doc_count: u32, deleted_doc_count: u32) -> Self {
        SegmentMergeInfo {
            segment_id,
            doc_count,
            deleted_doc_count,
            base_doc_id: 0,
            timestamp: 0,
            locator: Locator::default(),
            merged: false,
            level_idx: 0,
            in_level_idx: 0,
        }
    }

    pub fn valid_doc_count(&self) -> u32 {
        self.doc_count.saturating_sub(self.deleted_doc_count)
    }

    /// Deleted documents in percent of all documents.
    pub fn delete_percent(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_doc_count as f64 * 100.0 / self.doc_count as f64
        }
    }
}

pub type SegmentMergeInfos = Vec<SegmentMergeInfo>;

/// Merge infos of every segment of `dir`, in segment id order.
///
/// Deleted counts reflect the effective deletion maps at call time.
pub fn create_segment_merge_infos(dir: &SegmentDirectory) -> Result<SegmentMergeInfos> {
    let level_info = &dir.version().level_info;
    let mut infos = Vec::new();
    for (segment_id, base_doc_id) in dir.base_doc_ids().iter().copied() {
        let segment_info = dir.segment_info(segment_id)?;
        let deletion_map = dir.load_deletion_map(segment_id)?;
        let level_idx = level_info.level_of(segment_id).unwrap_or(0);
        let in_level_idx = level_info
            .levels
            .get(level_idx as usize)
            .and_then(|l| l.segments.iter().position(|&s| s == segment_id))
            .unwrap_or(0) as u32;
        infos.push(SegmentMergeInfo {
            segment_id,
            doc_count: segment_info.doc_count,
            deleted_doc_count: deletion_map.deleted_count(),
            base_doc_id,
            timestamp: segment_info.timestamp,
            locator: segment_info.locator,
            merged: segment_info.merged,
            level_idx,
            in_level_idx,
        });
    }
    Ok(infos)
}
