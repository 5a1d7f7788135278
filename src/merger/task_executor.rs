//! Turns a prepared merge into work items and runs one instance's share.

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attribute::container::AttributeReaderContainer;
use crate::config::{MergeConfig, Schema};
use crate::error::{IndexlibError, Result};
use crate::index_base::{SegmentDirectory, SegmentId, layout};
use crate::merger::attribute_merger::AttributeMerger;
use crate::merger::column_merger::ColumnMerger;
use crate::merger::deletion_map_merger::DeletionMapMerger;
use crate::merger::inverted_index_merger::InvertedIndexMerger;
use crate::merger::join_merger::{JoinMerger, JoinSide};
use crate::merger::merge_file_system::{BufferedMergeFileSystem, MergeFileSystem};
use crate::merger::merge_meta::{MergeMeta, TASK_EXECUTE_META_FILE};
use crate::merger::merger_resource::{MergerResource, OutputSegmentMergeInfo};
use crate::merger::primary_key_merger::PrimaryKeyMerger;
use crate::merger::scheduler::{MultiThreadedMergeScheduler, ScheduleStats};
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::work_item::{ColumnMergeWorkItem, MergeWorkItem, checkpoint_path};
use crate::storage::Storage;

/// Column mergers of one table. `sub` selects the sub-document side of the
/// join attributes.
pub fn create_column_mergers(schema: &Schema, sub: bool) -> Vec<Arc<dyn ColumnMerger>> {
    let mut mergers: Vec<Arc<dyn ColumnMerger>> = Vec::new();
    mergers.push(Arc::new(DeletionMapMerger::new()));
    if let Some(pk) = &schema.primary_key {
        mergers.push(Arc::new(PrimaryKeyMerger::new(pk.clone())));
    }
    for attribute in &schema.attributes {
        mergers.push(Arc::new(AttributeMerger::init(attribute)));
    }
    for pack in &schema.pack_attributes {
        mergers.push(Arc::new(AttributeMerger::init_pack(pack)));
    }
    for index in &schema.indexes {
        mergers.push(Arc::new(InvertedIndexMerger::new(index.clone())));
    }
    if sub {
        mergers.push(Arc::new(JoinMerger::new(JoinSide::Sub)));
    } else if schema.has_sub_schema() {
        mergers.push(Arc::new(JoinMerger::new(JoinSide::Main)));
    }
    mergers
}

/// Which work items each merge instance runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecuteMeta {
    pub instance_count: usize,
    pub assignments: Vec<Vec<String>>,
}

impl TaskExecuteMeta {
    /// Greedy balance: items by cost descending (identifier breaks ties),
    /// each onto the instance with the smallest total cost so far.
    pub fn assign(items: &[Arc<ColumnMergeWorkItem>], instance_count: usize) -> Self {
        let instance_count = instance_count.max(1);
        let mut order: Vec<_> = items.iter().collect();
        order.sort_by(|a, b| {
            b.cost()
                .total_cmp(&a.cost())
                .then_with(|| a.identifier().cmp(b.identifier()))
        });
        let mut loads = vec![0.0f64; instance_count];
        let mut assignments = vec![Vec::new(); instance_count];
        for item in order {
            let (target, _) = loads
                .iter()
                .enumerate()
                .fold((0, f64::INFINITY), |best, (idx, &load)| {
                    if load < best.1 { (idx, load) } else { best }
                });
            loads[target] += item.cost();
            assignments[target].push(item.identifier().to_string());
        }
        TaskExecuteMeta {
            instance_count,
            assignments,
        }
    }
}

#[derive(Debug)]
pub struct MergeTaskExecutor<'a> {
    meta: &'a MergeMeta,
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    config: MergeConfig,
}

impl<'a> MergeTaskExecutor<'a> {
    pub fn new(
        meta: &'a MergeMeta,
        storage: Arc<dyn Storage>,
        schema: Arc<Schema>,
        config: MergeConfig,
    ) -> Self {
        MergeTaskExecutor {
            meta,
            storage,
            schema,
            config,
        }
    }

    /// Every work item of the task, main table before sub table, plan by
    /// plan.
    pub fn create_work_items(&self) -> Result<Vec<Arc<ColumnMergeWorkItem>>> {
        let dir = SegmentDirectory::open(self.storage.clone(), self.meta.base_version().clone())?;
        let main_readers = Arc::new(AttributeReaderContainer::new(dir.clone(), self.schema.clone()));
        let sub = match &self.schema.sub_schema {
            Some(sub_schema) => {
                let sub_dir = dir.sub_directory()?;
                let sub_schema = Arc::new(sub_schema.as_ref().clone());
                let readers = Arc::new(AttributeReaderContainer::new(sub_dir.clone(), sub_schema.clone()));
                Some((sub_dir, sub_schema, readers))
            }
            None => None,
        };
        let merged: BTreeSet<SegmentId> = self.meta.merged_segment_ids().into_iter().collect();

        let main_mergers = create_column_mergers(&self.schema, false);
        for merger in &main_mergers {
            merger.begin_merge(&dir)?;
        }
        let sub_mergers = match &sub {
            Some((sub_dir, sub_schema, _)) => {
                let mergers = create_column_mergers(sub_schema, true);
                for merger in &mergers {
                    merger.begin_merge(sub_dir)?;
                }
                mergers
            }
            None => Vec::new(),
        };

        let mut items = Vec::new();
        for (plan_idx, plan) in self.meta.plans().iter().enumerate() {
            let resource = Arc::new(MergerResource {
                plan_idx,
                reclaim_map: plan.reclaim_map.clone(),
                sub_reclaim_map: plan.sub_reclaim_map.clone(),
                segment_directory: dir.clone(),
                attr_readers: main_readers.clone(),
                segment_merge_infos: plan.plan.segments.clone(),
                outputs: outputs(&plan.meta.target_segment_ids, &plan.meta.target_doc_counts, false),
                merged_segments: merged.clone(),
            });
            self.push_items(&mut items, &main_mergers, &resource)?;

            if let Some((sub_dir, _, sub_readers)) = &sub {
                let sub_map = plan.sub_reclaim_map.clone().ok_or_else(|| {
                    IndexlibError::inconsistent_state(format!(
                        "plan [{plan_idx}] lacks the sub document reclaim map"
                    ))
                })?;
                let sub_infos = plan
                    .plan
                    .segment_ids()
                    .into_iter()
                    .map(|id| Ok(SegmentMergeInfo::new(id, sub_dir.segment_info(id)?.doc_count, 0)))
                    .collect::<Result<Vec<_>>>()?;
                let resource = Arc::new(MergerResource {
                    plan_idx,
                    reclaim_map: sub_map,
                    sub_reclaim_map: None,
                    segment_directory: sub_dir.clone(),
                    attr_readers: sub_readers.clone(),
                    segment_merge_infos: sub_infos,
                    outputs: outputs(
                        &plan.meta.target_segment_ids,
                        &plan.meta.sub_target_doc_counts,
                        true,
                    ),
                    merged_segments: merged.clone(),
                });
                self.push_items(&mut items, &sub_mergers, &resource)?;
            }
        }
        Ok(items)
    }

    fn push_items(
        &self,
        items: &mut Vec<Arc<ColumnMergeWorkItem>>,
        mergers: &[Arc<dyn ColumnMerger>],
        resource: &Arc<MergerResource>,
    ) -> Result<()> {
        for merger in mergers {
            if self.config.parallel_count > 1 && merger.supports_parallel() {
                for part in merger.create_parallel_merge_items(resource, self.config.parallel_count)? {
                    items.push(Arc::new(
                        ColumnMergeWorkItem::for_part(merger.clone(), resource.clone(), part)
                            .with_checkpoint(self.config.enable_checkpoint),
                    ));
                }
            } else {
                items.push(Arc::new(
                    ColumnMergeWorkItem::new(merger.clone(), resource.clone())
                        .with_checkpoint(self.config.enable_checkpoint),
                ));
            }
        }
        Ok(())
    }

    /// The persisted assignment, or a fresh one stored for the other
    /// instances.
    pub fn load_or_create_execute_meta(
        &self,
        items: &[Arc<ColumnMergeWorkItem>],
    ) -> Result<TaskExecuteMeta> {
        let path = format!("{}/{TASK_EXECUTE_META_FILE}", self.meta.root());
        if self.storage.file_exists(&path) {
            let stored: TaskExecuteMeta = serde_json::from_slice(&self.storage.read_all(&path)?)?;
            if stored.instance_count == self.config.instance_count {
                return Ok(stored);
            }
            warn!(
                "task execute meta was made for [{}] instances, now [{}]; reassigning",
                stored.instance_count, self.config.instance_count
            );
        }
        let assigned = TaskExecuteMeta::assign(items, self.config.instance_count);
        self.storage
            .write_all(&path, &serde_json::to_vec_pretty(&assigned)?)?;
        Ok(assigned)
    }

    /// Run the items assigned to `instance_id`, skipping checkpointed ones.
    pub fn execute(&self, instance_id: usize) -> Result<ScheduleStats> {
        if instance_id >= self.config.instance_count {
            return Err(IndexlibError::bad_parameter(format!(
                "merge instance [{instance_id}] out of [{}]",
                self.config.instance_count
            )));
        }
        let items = self.create_work_items()?;
        let execute_meta = self.load_or_create_execute_meta(&items)?;
        let by_id: AHashMap<&str, &Arc<ColumnMergeWorkItem>> =
            items.iter().map(|item| (item.identifier(), item)).collect();
        let root = self.meta.instance_root(instance_id);

        let mut todo: Vec<Arc<dyn MergeWorkItem>> = Vec::new();
        let mut skipped = 0;
        for id in &execute_meta.assignments[instance_id] {
            let item = by_id.get(id.as_str()).ok_or_else(|| {
                IndexlibError::index_collapsed(format!("unknown merge work item [{id}]"))
            })?;
            if self.config.enable_checkpoint
                && self
                    .storage
                    .file_exists(&format!("{root}/{}", checkpoint_path(id)))
            {
                skipped += 1;
                continue;
            }
            todo.push((*item).clone());
        }
        info!(
            "merge instance [{instance_id}]: [{}] items to run, [{skipped}] already checkpointed",
            todo.len()
        );

        // The reclaim maps stay resident while items run.
        let resident = self.meta.reclaim_map_memory_use();
        let budget = self.config.max_mem_use_bytes().saturating_sub(resident);
        debug!(
            "merge instance [{instance_id}]: [{resident}] bytes of reclaim maps, [{budget}] left for items"
        );
        let scheduler = MultiThreadedMergeScheduler::new(budget, self.config.thread_num);
        let commit_lock = Arc::new(Mutex::new(()));
        scheduler.run(&todo, |_| {
            Box::new(BufferedMergeFileSystem::new(
                self.storage.clone(),
                &root,
                commit_lock.clone(),
            )) as Box<dyn MergeFileSystem>
        })
    }
}

fn outputs(target_ids: &[SegmentId], doc_counts: &[u32], sub: bool) -> Vec<OutputSegmentMergeInfo> {
    target_ids
        .iter()
        .zip(doc_counts)
        .enumerate()
        .map(|(target_index, (&segment_id, &doc_count))| OutputSegmentMergeInfo {
            target_index,
            segment_id,
            root: layout::segment_root(segment_id, sub),
            doc_count,
        })
        .collect()
}
