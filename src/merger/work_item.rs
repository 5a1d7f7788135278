//! Units of merge work handed to the scheduler.

use std::fmt::Debug;
use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::merger::column_merger::{ColumnMerger, ParallelMergeItem};
use crate::merger::merge_file_system::MergeFileSystem;
use crate::merger::merger_resource::MergerResource;

pub const CHECKPOINT_DIR: &str = "checkpoint";

/// Checkpoint file of work item `identifier`, relative to its instance root.
pub fn checkpoint_path(identifier: &str) -> String {
    format!("{CHECKPOINT_DIR}/{}", identifier.replace('/', "#"))
}

pub trait MergeWorkItem: Send + Sync + Debug {
    fn identifier(&self) -> &str;

    /// Peak memory, in bytes, the item needs while running.
    fn required_resource(&self) -> i64;

    /// Relative cost used to balance items over instances.
    fn cost(&self) -> f64;

    /// Items of one parallel merge share a group and are finished together
    /// by the end-merge step.
    fn parallel_group(&self) -> Option<&str> {
        None
    }

    fn process(&self, fs: &mut dyn MergeFileSystem) -> Result<()>;
}

/// Runs one column merger, whole or one slice of it, for one plan.
#[derive(Debug, Clone)]
pub struct ColumnMergeWorkItem {
    identifier: String,
    group: Option<String>,
    merger: Arc<dyn ColumnMerger>,
    resource: Arc<MergerResource>,
    part: Option<ParallelMergeItem>,
    required_resource: i64,
    cost: f64,
    checkpoint: bool,
}

impl ColumnMergeWorkItem {
    pub fn new(merger: Arc<dyn ColumnMerger>, resource: Arc<MergerResource>) -> Self {
        let identifier = format!("{}/{}", resource.item_prefix(), merger.identifier());
        let required_resource = merger.estimate_memory_use(&resource);
        let cost = resource
            .segment_merge_infos
            .iter()
            .map(|info| info.doc_count as f64)
            .sum::<f64>()
            .max(1.0);
        ColumnMergeWorkItem {
            identifier,
            group: None,
            merger,
            resource,
            part: None,
            required_resource,
            cost,
            checkpoint: false,
        }
    }

    /// The slice `part` of a parallel merge.
    pub fn for_part(
        merger: Arc<dyn ColumnMerger>,
        resource: Arc<MergerResource>,
        part: ParallelMergeItem,
    ) -> Self {
        let mut item = Self::new(merger, resource);
        let share = part.total_parallel_count.max(1);
        item.group = Some(item.identifier.clone());
        item.identifier = format!("{}/part_{}", item.identifier, part.part_id);
        item.required_resource /= share as i64;
        item.cost /= share as f64;
        item.part = Some(part);
        item
    }

    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn merger(&self) -> &Arc<dyn ColumnMerger> {
        &self.merger
    }

    pub fn resource(&self) -> &Arc<MergerResource> {
        &self.resource
    }

    pub fn part(&self) -> Option<&ParallelMergeItem> {
        self.part.as_ref()
    }
}

impl MergeWorkItem for ColumnMergeWorkItem {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn required_resource(&self) -> i64 {
        self.required_resource
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn parallel_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn process(&self, fs: &mut dyn MergeFileSystem) -> Result<()> {
        debug!("merging [{}]", self.identifier);
        match &self.part {
            Some(part) => self.merger.merge_part(&self.resource, part, fs.storage())?,
            None => self.merger.merge(&self.resource, fs.storage())?,
        }
        if self.checkpoint {
            fs.storage()
                .write_all(&checkpoint_path(&self.identifier), self.identifier.as_bytes())?;
        }
        Ok(())
    }
}
