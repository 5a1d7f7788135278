//! Merge everything small enough into as few segments as the output limits allow.

use log::info;

use crate::config::MergeStrategyParameter;
use crate::config::merge_strategy_parameter::{parse_value, unknown_key};
use crate::error::{IndexlibError, Result};
use crate::index_base::LevelInfo;
use crate::merger::merge_plan::{MergePlan, MergeTask};
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::split::SplitStrategyConfig;
use crate::merger::strategy::{MergeStrategy, all_params, sorted_by_segment_id};

pub const IDENTIFIER: &str = "optimize";

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeMergeStrategy {
    /// Segments with more documents than this are left alone.
    pub max_doc_count: u32,
    pub after_merge_max_doc_count: Option<u32>,
    pub after_merge_max_segment_count: Option<u32>,
    pub skip_single_merged_segment: bool,
}

impl Default for OptimizeMergeStrategy {
    fn default() -> Self {
        OptimizeMergeStrategy {
            max_doc_count: u32::MAX,
            after_merge_max_doc_count: None,
            after_merge_max_segment_count: None,
            skip_single_merged_segment: true,
        }
    }
}

impl OptimizeMergeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    fn split_config(&self) -> SplitStrategyConfig {
        match (self.after_merge_max_segment_count, self.after_merge_max_doc_count) {
            (Some(segment_count), _) => SplitStrategyConfig::SegmentCount { segment_count },
            (None, Some(max_doc_count)) => SplitStrategyConfig::MaxDocCount { max_doc_count },
            (None, None) => SplitStrategyConfig::Default,
        }
    }

    fn optimize(&self, seg_merge_infos: &[SegmentMergeInfo]) -> MergeTask {
        let mut task = MergeTask::new();
        let inputs: Vec<_> = sorted_by_segment_id(seg_merge_infos)
            .into_iter()
            .filter(|s| s.doc_count <= self.max_doc_count)
            .collect();
        if inputs.is_empty() {
            return task;
        }
        if self.skip_single_merged_segment
            && inputs.len() == 1
            && inputs[0].merged
            && inputs[0].deleted_doc_count == 0
        {
            info!(
                "segment [{}] is already optimized, nothing to merge",
                inputs[0].segment_id
            );
            return task;
        }
        let mut plan = MergePlan::new().with_split(self.split_config());
        for info in inputs {
            plan.add_segment(info);
        }
        task.add_plan(plan);
        task
    }
}

impl MergeStrategy for OptimizeMergeStrategy {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn set_parameter(&mut self, param: &MergeStrategyParameter) -> Result<()> {
        for (key, value) in all_params(param)? {
            match key.as_str() {
                "max-doc-count" => self.max_doc_count = parse_value(&key, &value)?,
                "after-merge-max-doc-count" => {
                    self.after_merge_max_doc_count = Some(parse_value(&key, &value)?)
                }
                "after-merge-max-segment-count" => {
                    self.after_merge_max_segment_count = Some(parse_value(&key, &value)?)
                }
                "skip-single-merged-segment" => {
                    self.skip_single_merged_segment = parse_value(&key, &value)?
                }
                _ => return Err(unknown_key(IDENTIFIER, &key)),
            }
        }
        if self.after_merge_max_doc_count == Some(0) || self.after_merge_max_segment_count == Some(0)
        {
            return Err(IndexlibError::bad_parameter(
                "after merge limits must be positive",
            ));
        }
        Ok(())
    }

    fn create_merge_task(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        _level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        Ok(self.optimize(seg_merge_infos))
    }

    fn create_merge_task_for_optimize(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        _level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        Ok(self.optimize(seg_merge_infos))
    }
}
