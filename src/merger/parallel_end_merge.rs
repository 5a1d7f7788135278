//! Stitches the slices of parallel merges into final target files.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::error::{IndexlibError, Result};
use crate::merger::work_item::{ColumnMergeWorkItem, MergeWorkItem};
use crate::storage::Storage;

#[derive(Debug)]
pub struct ParallelEndMergeExecutor {
    storage: Arc<dyn Storage>,
    instance_roots: Vec<String>,
}

impl ParallelEndMergeExecutor {
    pub fn new(storage: Arc<dyn Storage>, instance_roots: Vec<String>) -> Self {
        ParallelEndMergeExecutor {
            storage,
            instance_roots,
        }
    }

    /// Parallel items keyed by group, in group order.
    pub fn group(items: &[Arc<ColumnMergeWorkItem>]) -> BTreeMap<String, Vec<Arc<ColumnMergeWorkItem>>> {
        let mut groups: BTreeMap<String, Vec<Arc<ColumnMergeWorkItem>>> = BTreeMap::new();
        for item in items {
            if let Some(group) = item.parallel_group() {
                groups.entry(group.to_string()).or_default().push(item.clone());
            }
        }
        groups
    }

    /// Check that the items of a group are the complete, disjoint slices of
    /// one merger over one plan.
    pub fn check_one_task_group(group: &str, items: &[Arc<ColumnMergeWorkItem>]) -> Result<u32> {
        let collapsed = |reason: String| {
            IndexlibError::index_collapsed(format!("parallel group [{group}]: {reason}"))
        };
        let first = items
            .first()
            .ok_or_else(|| collapsed("no items".to_string()))?;
        let merger_id = first.merger().identifier();
        let resource = first.resource();
        let targets: Vec<_> = resource.outputs.iter().map(|o| o.segment_id).collect();

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let part = item
                .part()
                .ok_or_else(|| collapsed(format!("[{}] is not a slice", item.identifier())))?;
            if item.merger().identifier() != merger_id {
                return Err(collapsed(format!(
                    "mixes mergers [{merger_id}] and [{}]",
                    item.merger().identifier()
                )));
            }
            let other = item.resource();
            if other.plan_idx != resource.plan_idx
                || other.is_sub() != resource.is_sub()
                || other.outputs.iter().map(|o| o.segment_id).ne(targets.iter().copied())
            {
                return Err(collapsed(format!(
                    "[{}] belongs to another plan or target set",
                    item.identifier()
                )));
            }
            parts.push(*part);
        }

        let total = parts[0].total_parallel_count;
        if parts.iter().any(|p| p.total_parallel_count != total) {
            return Err(collapsed("inconsistent parallel count".to_string()));
        }
        parts.sort_by_key(|p| p.part_id);
        if parts.len() != total as usize
            || parts.iter().enumerate().any(|(idx, p)| p.part_id != idx as u32)
        {
            return Err(collapsed(format!(
                "expected parts 0..{total}, found {:?}",
                parts.iter().map(|p| p.part_id).collect::<Vec<_>>()
            )));
        }
        let mut expected_begin = 0;
        for part in &parts {
            if part.begin != expected_begin || part.end < part.begin {
                return Err(collapsed(format!(
                    "part [{}] covers [{}, {}), expected to start at [{expected_begin}]",
                    part.part_id, part.begin, part.end
                )));
            }
            expected_begin = part.end;
        }
        let new_doc_count = resource.reclaim_map.new_doc_count();
        if expected_begin != new_doc_count {
            return Err(collapsed(format!(
                "parts end at [{expected_begin}], plan has [{new_doc_count}] documents"
            )));
        }
        Ok(total)
    }

    /// Validate and finish every group, one after another.
    pub fn run(&self, items: &[Arc<ColumnMergeWorkItem>]) -> Result<usize> {
        let groups = Self::group(items);
        for (group, group_items) in &groups {
            let total = Self::check_one_task_group(group, group_items)?;
            let first = &group_items[0];
            info!("ending parallel merge of [{group}] over [{total}] parts");
            first.merger().end_parallel_merge(
                first.resource(),
                total,
                &self.instance_roots,
                self.storage.as_ref(),
                self.storage.as_ref(),
            )?;
        }
        Ok(groups.len())
    }
}
