//! Merge plans and tasks: what a strategy decided to merge.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index_base::SegmentId;
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::split::SplitStrategyConfig;

/// Input segments of one merge, in merge order, and how its output is split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub segments: Vec<SegmentMergeInfo>,

    #[serde(default)]
    pub split: SplitStrategyConfig,

    /// Level the target segments are placed on.
    #[serde(default)]
    pub target_level: u32,
}

impl MergePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, split: SplitStrategyConfig) -> Self {
        self.split = split;
        self
    }

    pub fn with_target_level(mut self, level: u32) -> Self {
        self.target_level = level;
        self
    }

    pub fn add_segment(&mut self, info: SegmentMergeInfo) {
        self.segments.push(info);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|s| s.segment_id).collect()
    }

    pub fn contains(&self, segment_id: SegmentId) -> bool {
        self.segments.iter().any(|s| s.segment_id == segment_id)
    }

    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }

    pub fn valid_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.valid_doc_count() as u64).sum()
    }

    /// Newest timestamp among the inputs.
    pub fn max_timestamp(&self) -> i64 {
        self.segments.iter().map(|s| s.timestamp).max().unwrap_or(0)
    }
}

/// Ordered merge plans produced by one strategy run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeTask {
    pub plans: Vec<MergePlan>,
}

impl MergeTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plan(&mut self, plan: MergePlan) {
        if !plan.is_empty() {
            self.plans.push(plan);
        }
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MergePlan> {
        self.plans.iter()
    }

    /// Every segment some plan merges away.
    pub fn merged_segment_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<_> = self.plans.iter().flat_map(|p| p.segment_ids()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Canonical serialized form; identical inputs give identical bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
