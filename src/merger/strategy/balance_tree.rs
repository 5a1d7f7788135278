//! Size-tiered merging in doubling layers.
//!
//! Layer 0 holds segments with at most `base-doc-count` valid documents,
//! layer `k` those with at most `base-doc-count * 2^k`. Once a layer holds
//! `conflict-segment-number` segments they merge into one; the output may
//! land in a higher layer and take part in that layer's merge in the same
//! task. Segments larger than `max-doc-count` form the top layer, which
//! merges whenever it holds more than one segment.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::config::MergeStrategyParameter;
use crate::config::merge_strategy_parameter::{parse_value, unknown_key};
use crate::error::{IndexlibError, Result};
use crate::index_base::LevelInfo;
use crate::merger::merge_plan::{MergePlan, MergeTask};
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::strategy::{MergeStrategy, all_params, sorted_by_segment_id};

pub const IDENTIFIER: &str = "balance_tree";

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceTreeMergeStrategy {
    pub base_doc_count: u32,
    pub max_doc_count: u32,
    pub conflict_segment_number: usize,
    pub conflict_delete_percent: f64,
    pub max_valid_doc_count: u32,
}

impl Default for BalanceTreeMergeStrategy {
    fn default() -> Self {
        BalanceTreeMergeStrategy {
            base_doc_count: 10240,
            max_doc_count: 1 << 23,
            conflict_segment_number: 2,
            conflict_delete_percent: 30.0,
            max_valid_doc_count: u32::MAX,
        }
    }
}

impl BalanceTreeMergeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer of a segment with `valid` documents.
    pub fn layer_of(&self, valid: u64) -> u32 {
        let base = self.base_doc_count.max(1) as u64;
        let mut layer = 0;
        let mut bound = base;
        while valid > bound {
            bound = bound.saturating_mul(2);
            layer += 1;
        }
        layer
    }

    fn is_top_layer(&self, info: &SegmentMergeInfo) -> bool {
        info.doc_count > self.max_doc_count
    }

    fn needs_reclaim(&self, info: &SegmentMergeInfo) -> bool {
        info.deleted_doc_count > 0
            && info.delete_percent() > self.conflict_delete_percent
            && info.valid_doc_count() < self.max_valid_doc_count
    }

    fn layered_plans(&self, candidates: &[SegmentMergeInfo]) -> Vec<MergePlan> {
        let mut layers: Vec<Vec<SegmentMergeInfo>> = Vec::new();
        for info in candidates {
            let layer = self.layer_of(info.valid_doc_count() as u64) as usize;
            if layers.len() <= layer {
                layers.resize(layer + 1, Vec::new());
            }
            layers[layer].push(info.clone());
        }

        let mut plans = Vec::new();
        // Merge outputs keyed by the layer they land in; each counts as one
        // segment of that layer.
        let mut carried: BTreeMap<usize, Vec<MergePlan>> = BTreeMap::new();
        let mut layer = 0;
        while layer < layers.len() || !carried.is_empty() {
            let members = layers.get(layer).cloned().unwrap_or_default();
            let incoming = carried.remove(&layer).unwrap_or_default();
            if members.len() + incoming.len() < self.conflict_segment_number.max(2) {
                plans.extend(incoming);
                layer += 1;
                continue;
            }
            let mut plan = MergePlan::new();
            for info in incoming.into_iter().flat_map(|p| p.segments).chain(members) {
                plan.add_segment(info);
            }
            let valid = plan.valid_doc_count();
            let next = self.layer_of(valid) as usize;
            debug!(
                "balance tree layer [{layer}] merges {:?} into layer [{next}]",
                plan.segment_ids()
            );
            if next > layer && valid <= self.max_doc_count as u64 {
                carried.entry(next).or_default().push(plan);
            } else {
                plans.push(plan);
            }
            layer += 1;
        }
        plans
    }
}

impl MergeStrategy for BalanceTreeMergeStrategy {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn set_parameter(&mut self, param: &MergeStrategyParameter) -> Result<()> {
        for (key, value) in all_params(param)? {
            match key.as_str() {
                "base-doc-count" => self.base_doc_count = parse_value(&key, &value)?,
                "max-doc-count" => self.max_doc_count = parse_value(&key, &value)?,
                "conflict-segment-number" => {
                    self.conflict_segment_number = parse_value(&key, &value)?
                }
                "conflict-delete-percent" => {
                    self.conflict_delete_percent = parse_value(&key, &value)?
                }
                "max-valid-doc-count" => self.max_valid_doc_count = parse_value(&key, &value)?,
                _ => return Err(unknown_key(IDENTIFIER, &key)),
            }
        }
        if self.base_doc_count == 0 {
            return Err(IndexlibError::bad_parameter("base-doc-count must be positive"));
        }
        if !(0.0..=100.0).contains(&self.conflict_delete_percent) {
            return Err(IndexlibError::bad_parameter(
                "conflict-delete-percent must be within [0, 100]",
            ));
        }
        Ok(())
    }

    fn create_merge_task(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        _level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        let sorted = sorted_by_segment_id(seg_merge_infos);
        let candidates: Vec<_> = sorted
            .iter()
            .filter(|s| !self.is_top_layer(s))
            .cloned()
            .collect();

        let mut task = MergeTask::new();
        let mut planned = Vec::new();
        let top: Vec<_> = sorted.iter().filter(|s| self.is_top_layer(s)).cloned().collect();
        if top.len() > 1 {
            debug!(
                "balance tree merges top layer {:?}",
                top.iter().map(|s| s.segment_id).collect::<Vec<_>>()
            );
            let mut plan = MergePlan::new();
            for info in top {
                plan.add_segment(info);
            }
            planned.extend(plan.segment_ids());
            task.add_plan(plan);
        }
        for mut plan in self.layered_plans(&candidates) {
            plan.segments.sort_by_key(|s| s.segment_id);
            planned.extend(plan.segment_ids());
            task.add_plan(plan);
        }
        for info in sorted.iter().filter(|s| !planned.contains(&s.segment_id)) {
            if self.needs_reclaim(info) {
                debug!(
                    "balance tree reclaims segment [{}] with [{:.1}%] deleted",
                    info.segment_id,
                    info.delete_percent()
                );
                let mut plan = MergePlan::new();
                plan.add_segment(info.clone());
                task.add_plan(plan);
            }
        }
        info!(
            "balance tree created [{}] plans over [{}] segments",
            task.len(),
            seg_merge_infos.len()
        );
        Ok(task)
    }

    fn create_merge_task_for_optimize(
        &self,
        seg_merge_infos: &[SegmentMergeInfo],
        _level_info: &LevelInfo,
    ) -> Result<MergeTask> {
        let mut task = MergeTask::new();
        let single_clean = seg_merge_infos.len() == 1 && seg_merge_infos[0].deleted_doc_count == 0;
        if !single_clean {
            let mut plan = MergePlan::new();
            for info in sorted_by_segment_id(seg_merge_infos) {
                plan.add_segment(info);
            }
            task.add_plan(plan);
        }
        Ok(task)
    }
}
