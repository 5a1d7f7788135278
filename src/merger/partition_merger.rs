//! Merge driver of one index partition: prepare, run, end.
//!
//! [`IndexPartitionMerger::prepare_merge`] plans the task and persists it with
//! its reclaim maps; [`IndexPartitionMerger::do_merge`] runs the share of one
//! merge instance; [`IndexPartitionMerger::end_merge`] finishes parallel
//! merges, moves the outputs into place and commits a new version. A merge
//! killed at any point resumes from what was persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::attribute::container::AttributeReaderContainer;
use crate::attribute::patch::{AttributePatchReader, AttributePatchWriter};
use crate::config::{IndexPartitionOptions, Schema};
use crate::error::{IndexlibError, Result};
use crate::index_base::{
    DeletionMap, DocId, SegmentDirectory, SegmentId, SegmentInfo, Version, VersionCommitter, layout,
};
use crate::merger::merge_meta::{MergeMeta, MergePlanMeta, MergePlanResource};
use crate::merger::merge_plan::MergeTask;
use crate::merger::parallel_end_merge::ParallelEndMergeExecutor;
use crate::merger::reclaim_map::ReclaimMap;
use crate::merger::scheduler::ScheduleStats;
use crate::merger::segment_merge_info::{SegmentMergeInfo, create_segment_merge_infos};
use crate::merger::split::SegmentSplitStrategy;
use crate::merger::strategy::MergeStrategyRegistry;
use crate::merger::task_executor::MergeTaskExecutor;
use crate::metrics::MetricReporter;
use crate::storage::Storage;

pub const METRIC_MERGED_SEGMENTS: &str = "merge/merged_segment_count";
pub const METRIC_MERGED_DOCS: &str = "merge/merged_doc_count";
pub const METRIC_RECLAIMED_DOCS: &str = "merge/reclaimed_doc_count";
pub const METRIC_RECLAIM_MAP_MEMORY: &str = "merge/reclaim_map_memory_estimate";

#[derive(Debug)]
pub struct IndexPartitionMerger {
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    options: IndexPartitionOptions,
    registry: MergeStrategyRegistry,
    metrics: MetricReporter,
}

impl IndexPartitionMerger {
    pub fn new(storage: Arc<dyn Storage>, schema: Arc<Schema>, options: IndexPartitionOptions) -> Self {
        IndexPartitionMerger {
            storage,
            schema,
            options,
            registry: MergeStrategyRegistry::default(),
            metrics: MetricReporter::noop(),
        }
    }

    pub fn with_registry(mut self, registry: MergeStrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricReporter) -> Self {
        self.metrics = metrics;
        self.metrics.declare(METRIC_MERGED_SEGMENTS, "count");
        self.metrics.declare(METRIC_MERGED_DOCS, "count");
        self.metrics.declare(METRIC_RECLAIMED_DOCS, "count");
        self.metrics.declare(METRIC_RECLAIM_MAP_MEMORY, "bytes");
        self
    }

    fn meta_root(&self) -> &str {
        self.options.merge.merge_meta_prefix.trim_matches('/')
    }

    /// Plan a merge of the latest version. Resumes the persisted merge when
    /// one exists; `None` when there is nothing to merge.
    pub fn prepare_merge(&self, optimize: bool) -> Result<Option<MergeMeta>> {
        if let Some(meta) = MergeMeta::load(self.storage.as_ref(), self.meta_root())? {
            info!(
                "resuming merge of version [{}] with [{}] plans",
                meta.base_version().version_id,
                meta.plan_count()
            );
            return Ok(Some(meta));
        }
        let Some(version) = Version::load_latest(self.storage.as_ref())? else {
            info!("index has no version, nothing to merge");
            return Ok(None);
        };
        self.plan(version, optimize).inspect_err(|e| error!("preparing merge failed: {e}"))
    }

    fn plan(&self, version: Version, optimize: bool) -> Result<Option<MergeMeta>> {
        let dir = SegmentDirectory::open(self.storage.clone(), version.clone())?;
        let seg_merge_infos = create_segment_merge_infos(&dir)?;
        let merge_config = &self.options.merge;
        let strategy = self.registry.create(
            &merge_config.merge_strategy,
            &merge_config.merge_strategy_parameter,
        )?;
        let task = if optimize {
            strategy.create_merge_task_for_optimize(&seg_merge_infos, &version.level_info)?
        } else {
            strategy.create_merge_task(&seg_merge_infos, &version.level_info)?
        };
        if task.is_empty() {
            info!(
                "strategy [{}] found nothing to merge in version [{}]",
                strategy.identifier(),
                version.version_id
            );
            return Ok(None);
        }
        info!(
            "strategy [{}] planned [{}] merge plans over segments {:?}",
            strategy.identifier(),
            task.len(),
            task.merged_segment_ids()
        );

        let deletion_maps = dir.load_deletion_maps()?;
        let readers = AttributeReaderContainer::new(dir.clone(), self.schema.clone());
        let sub = match &self.schema.sub_schema {
            Some(_) => {
                let sub_dir = dir.sub_directory()?;
                let sub_infos = create_segment_merge_infos(&sub_dir)?;
                let sub_deletion_maps = sub_dir.load_deletion_maps()?;
                Some((sub_infos, sub_deletion_maps))
            }
            None => None,
        };

        self.admit_reclaim_maps(&task, sub.as_ref().map(|(infos, _)| infos.as_slice()));

        let mut next_segment_id = self.next_segment_id(&version)?;
        let mut meta = MergeMeta::new(self.meta_root(), version.clone());
        for plan in task.iter() {
            let split = SegmentSplitStrategy::new(plan.split.clone());
            let reclaim_map = ReclaimMap::init(
                &plan.segments,
                &deletion_maps,
                &readers,
                &self.schema.sort_descriptions,
                &dir,
                &split,
                true,
            )?;
            let sub_reclaim_map = match &sub {
                Some((sub_infos, sub_deletion_maps)) => {
                    let plan_sub_infos: Vec<SegmentMergeInfo> = plan
                        .segments
                        .iter()
                        .map(|main| {
                            sub_infos
                                .iter()
                                .find(|s| s.segment_id == main.segment_id)
                                .cloned()
                                .ok_or_else(|| {
                                    IndexlibError::inconsistent_state(format!(
                                        "segment [{}] has no sub segment",
                                        main.segment_id
                                    ))
                                })
                        })
                        .collect::<Result<_>>()?;
                    Some(Arc::new(ReclaimMap::init_for_sub_doc(
                        &reclaim_map,
                        &plan_sub_infos,
                        sub_deletion_maps,
                        &readers,
                        true,
                    )?))
                }
                None => None,
            };

            let target_count = reclaim_map.target_count();
            let target_segment_ids: Vec<SegmentId> =
                (next_segment_id..next_segment_id + target_count as SegmentId).collect();
            next_segment_id += target_count as SegmentId;
            let plan_meta = MergePlanMeta {
                target_segment_ids,
                target_doc_counts: reclaim_map.target_doc_counts().to_vec(),
                sub_target_doc_counts: sub_reclaim_map
                    .as_ref()
                    .map(|m| m.target_doc_counts().to_vec())
                    .unwrap_or_default(),
                timestamp: plan.max_timestamp(),
                locator: plan
                    .segments
                    .iter()
                    .map(|s| s.locator)
                    .max()
                    .unwrap_or_default(),
                target_level: plan.target_level,
                base_version_id: version.version_id,
            };
            info!(
                "plan {:?} -> segments {:?} with [{}] documents, [{}] reclaimed",
                plan.segment_ids(),
                plan_meta.target_segment_ids,
                reclaim_map.new_doc_count(),
                reclaim_map.deleted_doc_count()
            );
            meta.add_plan(MergePlanResource {
                plan: plan.clone(),
                meta: plan_meta,
                reclaim_map: Arc::new(reclaim_map),
                sub_reclaim_map,
            });
        }
        meta.store(self.storage.as_ref())?;
        Ok(Some(meta))
    }

    /// Estimate the memory every plan's reclaim maps hold from planning to
    /// the end of the merge, and check it against the merge budget. A task
    /// above the budget still runs; the budget is raised to what it needs.
    fn admit_reclaim_maps(&self, task: &MergeTask, sub_infos: Option<&[SegmentMergeInfo]>) {
        let sorted = !self.schema.sort_descriptions.is_empty();
        let mut required = 0i64;
        for plan in task.iter() {
            required = required.saturating_add(ReclaimMap::estimate_memory_use(&plan.segments, sorted, true));
            if let Some(sub_infos) = sub_infos {
                let plan_sub_infos: Vec<SegmentMergeInfo> = sub_infos
                    .iter()
                    .filter(|s| plan.contains(s.segment_id))
                    .cloned()
                    .collect();
                required = required.saturating_add(ReclaimMap::estimate_memory_use(&plan_sub_infos, false, true));
            }
        }
        let budget = self.options.merge.max_mem_use_bytes();
        if required > budget {
            warn!(
                "reclaim maps of [{}] plans need [{required}] bytes, above the budget [{budget}]; raising it",
                task.len()
            );
        } else {
            debug!("reclaim maps of [{}] plans need [{required}] bytes", task.len());
        }
        self.metrics.report(METRIC_RECLAIM_MAP_MEMORY, required as f64);
    }

    /// One past the largest segment id in the version or on storage.
    fn next_segment_id(&self, version: &Version) -> Result<SegmentId> {
        let on_storage = self
            .storage
            .list_files_with_prefix(layout::SEGMENT_DIR_PREFIX)?
            .iter()
            .filter_map(|name| layout::parse_segment_dir(name))
            .max();
        Ok(on_storage
            .into_iter()
            .chain(version.last_segment())
            .max()
            .map_or(0, |id| id + 1))
    }

    fn executor<'a>(&self, meta: &'a MergeMeta) -> MergeTaskExecutor<'a> {
        MergeTaskExecutor::new(
            meta,
            self.storage.clone(),
            self.schema.clone(),
            self.options.merge.clone(),
        )
    }

    /// Run the work items assigned to merge instance `instance_id`.
    pub fn do_merge(&self, meta: &MergeMeta, instance_id: usize) -> Result<ScheduleStats> {
        self.executor(meta)
            .execute(instance_id)
            .inspect_err(|e| error!("merge instance [{instance_id}] failed: {e}"))
    }

    /// Finish parallel merges, publish the target segments and commit the
    /// merged version.
    pub fn end_merge(&self, meta: &MergeMeta) -> Result<Version> {
        self.finish(meta)
            .inspect_err(|e| error!("ending merge failed: {e}"))
    }

    fn finish(&self, meta: &MergeMeta) -> Result<Version> {
        let storage = self.storage.as_ref();
        let latest = Version::load_latest(storage)?.ok_or_else(|| {
            IndexlibError::inconsistent_state("index lost every version during the merge")
        })?;
        let merged = meta.merged_segment_ids();
        let targets = meta.target_segment_ids();
        if let Some(missing) = merged.iter().find(|&&id| !latest.has_segment(id)) {
            return Err(IndexlibError::inconsistent_state(format!(
                "merged segment [{missing}] is not in version [{}]",
                latest.version_id
            )));
        }
        if let Some(taken) = targets.iter().find(|&&id| latest.has_segment(id)) {
            return Err(IndexlibError::inconsistent_state(format!(
                "target segment [{taken}] is already in version [{}]",
                latest.version_id
            )));
        }

        let instance_roots: Vec<String> = (0..self.options.merge.instance_count)
            .map(|k| meta.instance_root(k))
            .collect();
        let items = self.executor(meta).create_work_items()?;
        let groups = ParallelEndMergeExecutor::new(self.storage.clone(), instance_roots.clone())
            .run(&items)?;
        if groups > 0 {
            info!("finished [{groups}] parallel merges");
        }

        let mut moved = 0;
        for root in &instance_roots {
            let prefix = format!("{root}/");
            for name in storage.list_files_with_prefix(&prefix)? {
                let Some(relative) = name.strip_prefix(&prefix) else {
                    continue;
                };
                if relative.starts_with(layout::SEGMENT_DIR_PREFIX) {
                    storage.rename_file(&name, relative)?;
                    moved += 1;
                }
            }
        }
        info!("moved [{moved}] merged files into place");
        let redirected = self.redirect_patches(meta, &latest)?;
        if redirected > 0 {
            info!("redirected [{redirected}] patches of segments built during the merge");
        }

        let mut version = latest.clone();
        version.version_id = latest.version_id + 1;
        for &id in &merged {
            version.remove_segment(id);
        }
        let mut merged_docs = 0u64;
        let mut reclaimed_docs = 0u64;
        for plan in meta.plans() {
            let plan_meta = &plan.meta;
            for (idx, &segment_id) in plan_meta.target_segment_ids.iter().enumerate() {
                let mut info = SegmentInfo::new(plan_meta.target_doc_counts[idx], plan_meta.timestamp);
                info.locator = plan_meta.locator;
                info.merged = true;
                info.store(storage, &layout::segment_root(segment_id, false))?;
                if let Some(&sub_count) = plan_meta.sub_target_doc_counts.get(idx) {
                    let mut sub_info = SegmentInfo::new(sub_count, plan_meta.timestamp);
                    sub_info.locator = plan_meta.locator;
                    sub_info.merged = true;
                    sub_info.store(storage, &layout::segment_root(segment_id, true))?;
                }
                version.add_segment_on_level(segment_id, plan_meta.target_level);
            }
            merged_docs += plan.reclaim_map.new_doc_count() as u64;
            reclaimed_docs += plan.reclaim_map.deleted_doc_count() as u64;
        }

        VersionCommitter::new(storage, self.options.build.keep_version_count).commit(&mut version)?;
        meta.delete(storage)?;
        info!(
            "merge committed version [{}]: segments {merged:?} -> {targets:?}",
            version.version_id
        );

        self.metrics.report(METRIC_MERGED_SEGMENTS, merged.len() as f64);
        self.metrics.report(METRIC_MERGED_DOCS, merged_docs as f64);
        self.metrics.report(METRIC_RECLAIMED_DOCS, reclaimed_docs as f64);
        Ok(version)
    }

    /// Segments committed after the merge was planned may have written
    /// deletions and updates against segments the merge replaces. Rewrite
    /// them against the targets those documents moved to.
    fn redirect_patches(&self, meta: &MergeMeta, latest: &Version) -> Result<usize> {
        let base = meta.base_version();
        let mut written = 0;
        for &src in latest.segments.iter().filter(|&&id| !base.has_segment(id)) {
            written += self.redirect_table_patches(meta, src, false)?;
            if self.schema.sub_schema.is_some() {
                written += self.redirect_table_patches(meta, src, true)?;
            }
        }
        Ok(written)
    }

    fn redirect_table_patches(&self, meta: &MergeMeta, src: SegmentId, sub: bool) -> Result<usize> {
        let storage = self.storage.as_ref();
        let root = layout::segment_root(src, sub);

        let mut deletions: BTreeMap<SegmentId, DeletionMap> = BTreeMap::new();
        let del_dir = format!("{root}/{}/", layout::DELETION_MAP_DIR);
        for path in storage.list_files_with_prefix(&del_dir)? {
            let Some(dst) = path
                .strip_prefix(&del_dir)
                .and_then(layout::parse_deletion_map_file)
            else {
                continue;
            };
            let Some(plan) = PlanTargets::find(meta, dst, sub) else {
                continue;
            };
            for local in DeletionMap::load(storage, &path)?.deleted_docs() {
                let Some((target, doc_count, target_local)) = plan.locate(dst, local)? else {
                    continue;
                };
                deletions
                    .entry(target)
                    .or_insert_with(|| DeletionMap::new(doc_count))
                    .delete(target_local)?;
            }
        }

        let mut updates: BTreeMap<(String, SegmentId), AttributePatchWriter> = BTreeMap::new();
        let attr_dir = format!("{root}/{}/", layout::ATTRIBUTE_DIR);
        for path in storage.list_files_with_prefix(&attr_dir)? {
            let Some((name, file_name)) = path
                .strip_prefix(&attr_dir)
                .and_then(|relative| relative.rsplit_once('/'))
            else {
                continue;
            };
            let Some((file_src, dst)) = layout::parse_patch_file_name(file_name) else {
                continue;
            };
            if file_src != src {
                continue;
            }
            let Some(plan) = PlanTargets::find(meta, dst, sub) else {
                continue;
            };
            let dst_doc_count = SegmentInfo::load(storage, &layout::segment_root(dst, sub))?.doc_count;
            let mut reader = AttributePatchReader::from_bytes(&storage.read_all(&path)?, &path, dst_doc_count)?;
            while let Some((local, value)) = reader.next_entry() {
                let Some((target, _, target_local)) = plan.locate(dst, local)? else {
                    continue;
                };
                updates
                    .entry((name.to_string(), target))
                    .or_default()
                    .set(target_local, value);
            }
        }

        for (target, deletion_map) in &deletions {
            debug!(
                "segment [{src}] deletes [{}] documents of merged segment [{target}]",
                deletion_map.deleted_count()
            );
            deletion_map.store(storage, &layout::deletion_map_path(&root, *target))?;
        }
        for ((name, target), writer) in &updates {
            writer.store(storage, &layout::attribute_patch_path(&root, name, src, *target))?;
        }
        Ok(deletions.len() + updates.len())
    }

    /// Prepare, run every instance in turn and end the merge. `None` when
    /// there was nothing to merge.
    pub fn merge(&self, optimize: bool) -> Result<Option<Version>> {
        let Some(meta) = self.prepare_merge(optimize)? else {
            return Ok(None);
        };
        for instance_id in 0..self.options.merge.instance_count {
            self.do_merge(&meta, instance_id)?;
        }
        self.end_merge(&meta).map(Some)
    }
}

/// Where the documents of one plan's source segments went.
struct PlanTargets<'a> {
    plan: &'a MergePlanResource,
    reclaim_map: &'a ReclaimMap,
    sub: bool,
}

impl<'a> PlanTargets<'a> {
    fn find(meta: &'a MergeMeta, segment_id: SegmentId, sub: bool) -> Option<Self> {
        let plan = meta.plans().iter().find(|p| p.plan.contains(segment_id))?;
        let reclaim_map = if sub {
            plan.sub_reclaim_map.as_deref()?
        } else {
            plan.reclaim_map.as_ref()
        };
        Some(PlanTargets {
            plan,
            reclaim_map,
            sub,
        })
    }

    /// `(target segment, target doc count, local id in target)` of a source
    /// document; `None` when the merge dropped it.
    fn locate(&self, segment_id: SegmentId, local: DocId) -> Result<Option<(SegmentId, u32, DocId)>> {
        let Some(new_id) = self.reclaim_map.get_new_doc_id(segment_id, local) else {
            return Ok(None);
        };
        let (idx, target_local) = self.reclaim_map.get_local_id_in_target(new_id).ok_or_else(|| {
            IndexlibError::index_collapsed(format!("new doc [{new_id}] has no target segment"))
        })?;
        let meta = &self.plan.meta;
        let doc_counts = if self.sub {
            &meta.sub_target_doc_counts
        } else {
            &meta.target_doc_counts
        };
        match (meta.target_segment_ids.get(idx), doc_counts.get(idx)) {
            (Some(&target), Some(&doc_count)) => Ok(Some((target, doc_count, target_local))),
            _ => Err(IndexlibError::index_collapsed(format!(
                "plan {:?} has no target [{idx}]",
                self.plan.plan.segment_ids()
            ))),
        }
    }
}
