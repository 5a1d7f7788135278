//! Merge strategies: policies choosing which segments merge together.
//!
//! A strategy only looks at [`SegmentMergeInfo`] metadata and the level
//! layout of the version; it never touches segment data. Given the same
//! input it must return the same [`MergeTask`], because independent merge
//! instances recompute nothing and rely on the persisted plan.

use std::fmt::Debug;

use crate::config::{MergeStrategyParameter, StrategyParams};
use crate::error::Result;
use crate::index_base::LevelInfo;
use crate::merger::merge_plan::MergeTask;
use crate::merger::segment_merge_info::SegmentMergeInfo;

pub mod balance_tree;
pub mod key_value_optimize;
pub mod optimize;
pub mod registry;

pub use balance_tree::BalanceTreeMergeStrategy;
pub use key_value_optimize::KeyValueOptimizeMergeStrategy;
pub use optimize::OptimizeMergeStrategy;
pub use registry::MergeStrategyRegistry;

/// Trait for segment selection policies.
pub trait MergeStrategy: Send + Sync + Debug {
    /// Registered name of the strategy.
    fn identifier(&self) -> &'static str;

    /// Apply `key=value` parameters. Unknown keys are rejected.
    fn set_parameter(&mut self, param: &MergeStrategyParameter) -> Result<()>;

    /// Plans for a regular, threshold driven merge.
    fn create_merge_task(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        level_info: &LevelInfo,
    ) -> Result<MergeTask>;

    /// Plans for an explicit optimize (full) merge.
    fn create_merge_task_for_optimize(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        level_info: &LevelInfo,
    ) -> Result<MergeTask>;
}

/// All `key=value` pairs of the three parameter strings, in order.
pub(crate) fn all_params(param: &MergeStrategyParameter) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for text in [
        &param.input_limit_param,
        &param.strategy_conditions,
        &param.output_limit_param,
    ] {
        let parsed = StrategyParams::parse(text)?;
        entries.extend(parsed.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    }
    Ok(entries)
}

/// Infos ordered by segment id, the order every plan lists its inputs in.
pub(crate) fn sorted_by_segment_id(infos: &[SegmentMergeInfo]) -> Vec<SegmentMergeInfo> {
    let mut sorted = infos.to_vec();
    sorted.sort_by_key(|s| s.segment_id);
    sorted
}
