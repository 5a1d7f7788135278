//! Full merge onto the bottom level, for key-value style tables.

use log::info;

use crate::config::MergeStrategyParameter;
use crate::config::merge_strategy_parameter::unknown_key;
use crate::error::Result;
use crate::index_base::LevelInfo;
use crate::merger::merge_plan::{MergePlan, MergeTask};
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::strategy::{MergeStrategy, all_params, sorted_by_segment_id};

pub const IDENTIFIER: &str = "key_value_optimize";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueOptimizeMergeStrategy;

impl KeyValueOptimizeMergeStrategy {
    pub fn new() -> Self {
        KeyValueOptimizeMergeStrategy
    }

    fn optimize(&self, seg_merge_infos: &[SegmentMergeInfo], level_info: &LevelInfo) -> MergeTask {
        let mut task = MergeTask::new();
        let bottom = level_info.bottom_level_idx();
        if let [only] = seg_merge_infos {
            if level_info.level_of(only.segment_id) == Some(bottom) {
                info!(
                    "segment [{}] is alone on bottom level [{bottom}], nothing to merge",
                    only.segment_id
                );
                return task;
            }
        }
        let mut plan = MergePlan::new().with_target_level(bottom);
        for info in sorted_by_segment_id(seg_merge_infos) {
            plan.add_segment(info);
        }
        task.add_plan(plan);
        task
    }
}

impl MergeStrategy for KeyValueOptimizeMergeStrategy {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn set_parameter(&mut self, param: &MergeStrategyParameter) -> Result<()> {
        match all_params(param)?.into_iter().next() {
            Some((key, _)) => Err(unknown_key(IDENTIFIER, &key)),
            None => Ok(()),
        }
    }

    fn create_merge_task(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        Ok(self.optimize(seg_merge_infos, level_info))
    }

    fn create_merge_task_for_optimize(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        Ok(self.optimize(seg_merge_infos, level_info))
    }
}
