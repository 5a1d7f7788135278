//! Persisted state of a prepared merge.
//!
//! Layout below the merge meta root:
//!
//! ```text
//! base_version                      version the task was planned against
//! merge_plan_<i>/plan               MergePlan (JSON)
//! merge_plan_<i>/plan_meta          MergePlanMeta (JSON)
//! merge_plan_<i>/resource/reclaim_map
//! merge_plan_<i>/resource/sub_reclaim_map
//! task_execute_meta                 work item assignment per instance
//! instance_<k>/...                  outputs and checkpoints of instance k
//! ```
//!
//! `base_version` is written last; a root without it holds no usable meta.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index_base::{Locator, SegmentId, Version, VersionId};
use crate::merger::merge_plan::MergePlan;
use crate::merger::reclaim_map::ReclaimMap;
use crate::storage::Storage;

const BASE_VERSION_FILE: &str = "base_version";
const PLAN_FILE: &str = "plan";
const PLAN_META_FILE: &str = "plan_meta";
const RECLAIM_MAP_FILE: &str = "resource/reclaim_map";
const SUB_RECLAIM_MAP_FILE: &str = "resource/sub_reclaim_map";
pub const TASK_EXECUTE_META_FILE: &str = "task_execute_meta";

/// What a plan produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergePlanMeta {
    pub target_segment_ids: Vec<SegmentId>,
    pub target_doc_counts: Vec<u32>,
    #[serde(default)]
    pub sub_target_doc_counts: Vec<u32>,

    /// Largest timestamp of the merged segments.
    pub timestamp: i64,
    pub locator: Locator,
    pub target_level: u32,
    pub base_version_id: VersionId,
}

/// One plan with its resources.
#[derive(Debug, Clone)]
pub struct MergePlanResource {
    pub plan: MergePlan,
    pub meta: MergePlanMeta,
    pub reclaim_map: Arc<ReclaimMap>,
    pub sub_reclaim_map: Option<Arc<ReclaimMap>>,
}

#[derive(Debug, Clone)]
pub struct MergeMeta {
    root: String,
    base_version: Version,
    plans: Vec<MergePlanResource>,
}

impl MergeMeta {
    pub fn new(root: &str, base_version: Version) -> Self {
        MergeMeta {
            root: root.trim_end_matches('/').to_string(),
            base_version,
            plans: Vec::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn base_version(&self) -> &Version {
        &self.base_version
    }

    pub fn add_plan(&mut self, plan: MergePlanResource) {
        self.plans.push(plan);
    }

    pub fn plans(&self) -> &[MergePlanResource] {
        &self.plans
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    /// Segments merged away by any plan, sorted.
    pub fn merged_segment_ids(&self) -> Vec<SegmentId> {
        let mut ids: Vec<_> = self
            .plans
            .iter()
            .flat_map(|p| p.plan.segment_ids())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Bytes held by the reclaim maps of every plan.
    pub fn reclaim_map_memory_use(&self) -> i64 {
        self.plans
            .iter()
            .map(|p| {
                p.reclaim_map.memory_use() + p.sub_reclaim_map.as_ref().map_or(0, |m| m.memory_use())
            })
            .sum::<usize>() as i64
    }

    pub fn target_segment_ids(&self) -> Vec<SegmentId> {
        self.plans
            .iter()
            .flat_map(|p| p.meta.target_segment_ids.iter().copied())
            .collect()
    }

    pub fn instance_root(&self, instance_id: usize) -> String {
        format!("{}/instance_{instance_id}", self.root)
    }

    fn plan_dir(&self, plan_idx: usize) -> String {
        format!("{}/merge_plan_{plan_idx}", self.root)
    }

    pub fn exists(storage: &dyn Storage, root: &str) -> bool {
        storage.file_exists(&format!("{}/{BASE_VERSION_FILE}", root.trim_end_matches('/')))
    }

    pub fn store(&self, storage: &dyn Storage) -> Result<()> {
        for (idx, plan) in self.plans.iter().enumerate() {
            let dir = self.plan_dir(idx);
            storage.write_all(&format!("{dir}/{PLAN_FILE}"), &serde_json::to_vec_pretty(&plan.plan)?)?;
            storage.write_all(
                &format!("{dir}/{PLAN_META_FILE}"),
                &serde_json::to_vec_pretty(&plan.meta)?,
            )?;
            plan.reclaim_map
                .store(storage, &format!("{dir}/{RECLAIM_MAP_FILE}"))?;
            if let Some(sub) = &plan.sub_reclaim_map {
                sub.store(storage, &format!("{dir}/{SUB_RECLAIM_MAP_FILE}"))?;
            }
        }
        storage.write_all(
            &format!("{}/{BASE_VERSION_FILE}", self.root),
            &serde_json::to_vec_pretty(&self.base_version)?,
        )?;
        storage.sync()?;
        info!(
            "stored merge meta with [{}] plans below [{}]",
            self.plans.len(),
            self.root
        );
        Ok(())
    }

    /// Load the meta below `root`; `None` when no complete meta is there.
    pub fn load(storage: &dyn Storage, root: &str) -> Result<Option<Self>> {
        if !Self::exists(storage, root) {
            return Ok(None);
        }
        let base_path = format!("{}/{BASE_VERSION_FILE}", root.trim_end_matches('/'));
        let base_version: Version = serde_json::from_slice(&storage.read_all(&base_path)?)
            .map_err(|e| IndexlibError::index_collapsed(format!("bad [{base_path}]: {e}")))?;
        let mut meta = MergeMeta::new(root, base_version);
        let mut idx = 0;
        loop {
            let dir = meta.plan_dir(idx);
            let plan_path = format!("{dir}/{PLAN_FILE}");
            if !storage.file_exists(&plan_path) {
                break;
            }
            let plan: MergePlan = serde_json::from_slice(&storage.read_all(&plan_path)?)?;
            let plan_meta: MergePlanMeta =
                serde_json::from_slice(&storage.read_all(&format!("{dir}/{PLAN_META_FILE}"))?)?;
            let reclaim_map = ReclaimMap::load(storage, &format!("{dir}/{RECLAIM_MAP_FILE}"))?;
            let sub_path = format!("{dir}/{SUB_RECLAIM_MAP_FILE}");
            let sub_reclaim_map = if storage.file_exists(&sub_path) {
                Some(Arc::new(ReclaimMap::load(storage, &sub_path)?))
            } else {
                None
            };
            if reclaim_map.target_doc_counts() != plan_meta.target_doc_counts.as_slice() {
                return Err(IndexlibError::index_collapsed(format!(
                    "reclaim map of [{dir}] disagrees with its plan meta"
                )));
            }
            meta.add_plan(MergePlanResource {
                plan,
                meta: plan_meta,
                reclaim_map: Arc::new(reclaim_map),
                sub_reclaim_map,
            });
            idx += 1;
        }
        if meta.plans.is_empty() {
            return Err(IndexlibError::index_collapsed(format!(
                "merge meta [{root}] has no plans"
            )));
        }
        Ok(Some(meta))
    }

    /// Remove everything below the root, instance outputs included.
    pub fn delete(&self, storage: &dyn Storage) -> Result<()> {
        storage.delete_directory(&self.root)
    }
}
