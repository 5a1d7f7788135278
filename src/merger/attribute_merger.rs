//! Attribute mergers: single-value, variable-length and pack attributes.
//!
//! Values are read through the attribute reader container, so updates
//! recorded in patch files are folded into the merged data. Patches that
//! merged segments hold for segments outside the plan are rewritten into
//! the first target segment so they survive the merge.

use std::collections::BTreeMap;

use log::debug;

use crate::attribute::format::{AttributeFiles, AttributeFormat};
use crate::attribute::patch::{AttributePatchReader, AttributePatchWriter};
use crate::config::{AttributeConfig, PackAttributeConfig};
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, PatchFileFinder, SegmentDirectory, layout};
use crate::merger::column_merger::{ColumnMerger, ParallelMergeItem, locate_part};
use crate::merger::merger_resource::MergerResource;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const PART_MAGIC: u32 = 0x4154_5052; // "ATPR"

#[derive(Debug, Clone)]
pub enum AttributeMerger {
    SingleValue { config: AttributeConfig },
    VarLen { config: AttributeConfig },
    Pack { config: PackAttributeConfig },
}

impl AttributeMerger {
    pub fn init(config: &AttributeConfig) -> Self {
        if config.is_single_value() {
            AttributeMerger::SingleValue {
                config: config.clone(),
            }
        } else {
            AttributeMerger::VarLen {
                config: config.clone(),
            }
        }
    }

    pub fn init_pack(config: &PackAttributeConfig) -> Self {
        AttributeMerger::Pack {
            config: config.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AttributeMerger::SingleValue { config } | AttributeMerger::VarLen { config } => {
                &config.name
            }
            AttributeMerger::Pack { config } => &config.name,
        }
    }

    fn format(&self) -> AttributeFormat {
        match self {
            AttributeMerger::SingleValue { config } | AttributeMerger::VarLen { config } => {
                AttributeFormat::of(config)
            }
            AttributeMerger::Pack { config } => AttributeFormat::of_pack(config),
        }
    }

    fn updatable(&self) -> bool {
        match self {
            AttributeMerger::SingleValue { config } | AttributeMerger::VarLen { config } => {
                config.updatable
            }
            AttributeMerger::Pack { .. } => false,
        }
    }

    /// Values of new documents `[begin, end)`, in new doc id order.
    fn collect_values(
        &self,
        resource: &MergerResource,
        begin: DocId,
        end: DocId,
    ) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::with_capacity(end.saturating_sub(begin) as usize);
        for new_id in begin..end {
            let (segment_id, local) = resource.old_doc(new_id)?;
            let segment = resource.attr_readers.segment(self.name(), segment_id)?;
            values.push(segment.get(local)?.to_vec());
        }
        Ok(values)
    }

    /// Write `values` of all new documents into the target segments.
    fn write_targets(
        &self,
        resource: &MergerResource,
        values: &[Vec<u8>],
        storage: &dyn Storage,
    ) -> Result<()> {
        let map = &resource.reclaim_map;
        for (output, (&base, &count)) in resource
            .outputs
            .iter()
            .zip(map.target_base_doc_ids().iter().zip(map.target_doc_counts()))
        {
            let slice = values
                .get(base as usize..(base + count) as usize)
                .ok_or_else(|| {
                    IndexlibError::inconsistent_state(format!(
                        "target [{}] of [{}] exceeds merged values",
                        output.segment_id,
                        self.name()
                    ))
                })?;
            let files = AttributeFiles::build(self.format(), slice.iter().map(Vec::as_slice))?;
            files.store(storage, &output.root, self.name())?;
        }
        Ok(())
    }

    /// Rewrite patches from merged segments to surviving segments.
    ///
    /// For every document of a surviving segment, only the latest update
    /// matters. It is carried forward when a segment of this plan wrote it;
    /// updates written by surviving segments stay where they are.
    fn carry_forward_patches(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        if !self.updatable() {
            return Ok(());
        }
        let dir = &resource.segment_directory;
        let patches = PatchFileFinder::new(dir).find_attribute_patches(self.name())?;
        for (dst, infos) in patches {
            if !resource.survives(dst)
                || !infos
                    .iter()
                    .any(|p| resource.merges(p.src_segment))
            {
                continue;
            }
            let dst_doc_count = dir.segment_info(dst)?.doc_count;
            let mut latest: BTreeMap<DocId, (bool, Vec<u8>)> = BTreeMap::new();
            for info in &infos {
                let from_merged = resource.merges(info.src_segment);
                let mut reader =
                    AttributePatchReader::open(dir.storage().as_ref(), info, dst_doc_count)?;
                while let Some((doc_id, value)) = reader.next_entry() {
                    latest.insert(doc_id, (from_merged, value));
                }
            }

            let mut writer = AttributePatchWriter::new();
            for (doc_id, (from_merged, value)) in latest {
                if from_merged {
                    writer.set(doc_id, value);
                }
            }
            if writer.is_empty() {
                continue;
            }
            let output = resource.first_output()?;
            let path = layout::attribute_patch_path(&output.root, self.name(), output.segment_id, dst);
            debug!(
                "carrying [{}] updates of [{}] for segment [{dst}] into [{path}]",
                writer.len(),
                self.name()
            );
            writer.store(storage, &path)?;
        }
        Ok(())
    }

    fn part_path(&self, resource: &MergerResource, part_id: u32) -> String {
        format!("{}/part_{part_id}", resource.parallel_dir(&self.identifier()))
    }
}

impl ColumnMerger for AttributeMerger {
    fn identifier(&self) -> String {
        format!("attribute/{}", self.name())
    }

    fn begin_merge(&self, segment_directory: &SegmentDirectory) -> Result<()> {
        let storage = segment_directory.storage();
        for segment_id in segment_directory.segment_ids() {
            let root = segment_directory.segment_root(segment_id);
            let path = layout::attribute_data_path(&root, self.name());
            if segment_directory.segment_info(segment_id)?.doc_count > 0 && !storage.file_exists(&path) {
                return Err(IndexlibError::index_collapsed(format!(
                    "attribute data [{path}] missing"
                )));
            }
        }
        Ok(())
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64 {
        let storage = resource.segment_directory.storage();
        let mut total = 0i64;
        for info in &resource.segment_merge_infos {
            let root = resource.segment_directory.segment_root(info.segment_id);
            total += storage
                .file_size(&layout::attribute_data_path(&root, self.name()))
                .unwrap_or(0) as i64;
            total += storage
                .file_size(&layout::attribute_offset_path(&root, self.name()))
                .unwrap_or(0) as i64;
        }
        // merged values are held once more while the target files are built
        total * 2 + resource.reclaim_map.new_doc_count() as i64 * 16
    }

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        let values = self.collect_values(resource, 0, resource.reclaim_map.new_doc_count())?;
        self.write_targets(resource, &values, storage)?;
        self.carry_forward_patches(resource, storage)
    }

    fn supports_parallel(&self) -> bool {
        !matches!(self, AttributeMerger::Pack { .. })
    }

    fn merge_part(
        &self,
        resource: &MergerResource,
        item: &ParallelMergeItem,
        storage: &dyn Storage,
    ) -> Result<()> {
        if !self.supports_parallel() {
            return Err(IndexlibError::unsupported(format!(
                "pack attribute [{}] cannot be merged in parallel",
                self.name()
            )));
        }
        let values = self.collect_values(resource, item.begin, item.end)?;
        let mut writer = StructWriter::in_memory();
        writer.write_u32(PART_MAGIC)?;
        writer.write_u32(item.begin)?;
        writer.write_u32(item.end)?;
        for value in &values {
            writer.write_bytes(value)?;
        }
        storage.write_all(&self.part_path(resource, item.part_id), &writer.finish()?)
    }

    fn end_parallel_merge(
        &self,
        resource: &MergerResource,
        total_parallel_count: u32,
        instance_roots: &[String],
        source: &dyn Storage,
        dest: &dyn Storage,
    ) -> Result<()> {
        let new_doc_count = resource.reclaim_map.new_doc_count();
        let mut values = Vec::with_capacity(new_doc_count as usize);
        for part_id in 0..total_parallel_count {
            let path = locate_part(source, instance_roots, &self.part_path(resource, part_id))?;
            let data = source.read_all(&path)?;
            let mut reader = StructReader::from_slice(&data);
            if reader.read_u32()? != PART_MAGIC {
                return Err(IndexlibError::index_collapsed(format!("bad part magic in [{path}]")));
            }
            let begin = reader.read_u32()?;
            let end = reader.read_u32()?;
            if begin as usize != values.len() || end < begin {
                return Err(IndexlibError::index_collapsed(format!(
                    "part [{path}] covers [{begin}, {end}) after [{}] values",
                    values.len()
                )));
            }
            for _ in begin..end {
                values.push(reader.read_bytes()?);
            }
            reader.expect_checksum(&path)?;
        }
        if values.len() != new_doc_count as usize {
            return Err(IndexlibError::index_collapsed(format!(
                "parts of [{}] hold [{}] values, expected [{new_doc_count}]",
                self.name(),
                values.len()
            )));
        }
        self.write_targets(resource, &values, dest)?;
        self.carry_forward_patches(resource, dest)
    }
}
