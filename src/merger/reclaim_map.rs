//! Old to new doc id translation of one merge plan.
//!
//! The map is built once per plan from the deletion-map snapshot taken when
//! the plan is prepared, persisted next to the plan, and then shared
//! read-only by every merger of every merge instance.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info};
use rayon::prelude::*;

use crate::attribute::codec::{SortValue, sort_value};
use crate::attribute::container::{AttributeReaderContainer, PatchedAttributeSegment};
use crate::config::{AttributeConfig, Schema, SortDescription, SortPattern};
use crate::error::{IndexlibError, Result};
use crate::index_base::{DeletionMap, DocId, SegmentDirectory, SegmentId, layout};
use crate::merger::segment_merge_info::SegmentMergeInfo;
use crate::merger::split::SegmentSplitStrategy;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const RECLAIM_MAP_MAGIC: u32 = 0x5243_4C4D; // "RCLM"
const REMOVED: DocId = DocId::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReclaimSegment {
    segment_id: SegmentId,
    doc_count: u32,
    offset: usize,
}

/// Join attribute values of a merged table with sub documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinValues {
    /// Per new main doc, the end (exclusive) of its sub documents, local to
    /// the target segment.
    pub main_join: Vec<DocId>,

    /// Per new sub doc, its main doc, local to the target segment.
    pub sub_join: Vec<DocId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimMap {
    segments: Vec<ReclaimSegment>,
    by_id: Vec<(SegmentId, usize)>,
    old_to_new: Vec<DocId>,
    new_to_old: Option<Vec<(SegmentId, DocId)>>,
    target_base_doc_ids: Vec<DocId>,
    target_doc_counts: Vec<u32>,
    deleted_doc_count: u32,
    join_values: Option<JoinValues>,
}

type SortKey = (Vec<SortValue>, SegmentId, DocId);

fn resolve_sort_attributes<'a>(
    schema: &'a Schema,
    sort_descs: &[SortDescription],
) -> Result<Vec<(&'a AttributeConfig, SortPattern)>> {
    sort_descs
        .iter()
        .map(|desc| {
            let config = schema.attribute(&desc.attribute).ok_or_else(|| {
                IndexlibError::schema(format!(
                    "sort attribute [{}] not in schema [{}]",
                    desc.attribute, schema.name
                ))
            })?;
            if !config.is_single_value() {
                return Err(IndexlibError::schema(format!(
                    "sort attribute [{}] must be single value",
                    desc.attribute
                )));
            }
            Ok((config, desc.sort_pattern))
        })
        .collect()
}

fn compare_keys(a: &SortKey, b: &SortKey, patterns: &[SortPattern]) -> Ordering {
    for (i, pattern) in patterns.iter().enumerate() {
        let ord = a.0[i].total_cmp(&b.0[i]);
        let ord = match pattern {
            SortPattern::Ascending => ord,
            SortPattern::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    (a.1, a.2).cmp(&(b.1, b.2))
}

fn layout_segments(infos: &[SegmentMergeInfo]) -> Result<(Vec<ReclaimSegment>, Vec<(SegmentId, usize)>)> {
    let mut segments = Vec::with_capacity(infos.len());
    let mut offset = 0usize;
    for info in infos {
        segments.push(ReclaimSegment {
            segment_id: info.segment_id,
            doc_count: info.doc_count,
            offset,
        });
        offset += info.doc_count as usize;
    }
    let mut by_id: Vec<_> = segments
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.segment_id, idx))
        .collect();
    by_id.sort_unstable();
    if by_id.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(IndexlibError::bad_parameter(
            "segment listed twice in merge infos",
        ));
    }
    Ok((segments, by_id))
}

fn read_join_value(segment: &PatchedAttributeSegment, doc_id: DocId) -> Result<DocId> {
    let bytes = segment.get(doc_id)?;
    let raw: [u8; 4] = bytes.try_into().map_err(|_| {
        IndexlibError::index_collapsed(format!("join value of doc [{doc_id}] has bad width"))
    })?;
    Ok(DocId::from_le_bytes(raw))
}

fn prefix_bases(counts: &[u32]) -> Vec<DocId> {
    let mut bases = Vec::with_capacity(counts.len());
    let mut base = 0;
    for &count in counts {
        bases.push(base);
        base += count;
    }
    bases
}

impl ReclaimMap {
    /// Build the map of a merge of `seg_merge_infos`, in that order.
    ///
    /// Sort attributes are checked against the schema of `attr_readers`
    /// before any data is read.
    pub fn init(
        seg_merge_infos: &[SegmentMergeInfo],
        deletion_maps: &BTreeMap<SegmentId, DeletionMap>,
        attr_readers: &AttributeReaderContainer,
        sort_descs: &[SortDescription],
        segment_directory: &SegmentDirectory,
        split: &SegmentSplitStrategy,
        need_reverse_mapping: bool,
    ) -> Result<ReclaimMap> {
        let schema = attr_readers.schema();
        let sort_attributes = resolve_sort_attributes(schema, sort_descs)?;
        split.validate(schema)?;
        if seg_merge_infos.is_empty() {
            return Err(IndexlibError::bad_parameter("merge infos cannot be empty"));
        }
        for info in seg_merge_infos {
            let on_disk = segment_directory.segment_info(info.segment_id).map_err(|_| {
                IndexlibError::bad_parameter(format!(
                    "segment [{}] not in segment directory",
                    info.segment_id
                ))
            })?;
            if on_disk.doc_count != info.doc_count {
                return Err(IndexlibError::inconsistent_state(format!(
                    "segment [{}] has [{}] docs, merge info says [{}]",
                    info.segment_id, on_disk.doc_count, info.doc_count
                )));
            }
        }

        let (segments, by_id) = layout_segments(seg_merge_infos)?;
        let mut survivors = Vec::new();
        let mut deleted_doc_count = 0u32;
        for segment in &segments {
            let deletion_map = deletion_maps.get(&segment.segment_id);
            for local in 0..segment.doc_count {
                if deletion_map.is_some_and(|m| m.is_deleted(local)) {
                    deleted_doc_count += 1;
                } else {
                    survivors.push((segment.segment_id, local));
                }
            }
        }

        if !sort_attributes.is_empty() {
            survivors = Self::sort_survivors(survivors, &sort_attributes, attr_readers)?;
        }

        let mut map = ReclaimMap {
            old_to_new: vec![REMOVED; segments.last().map_or(0, |s| s.offset + s.doc_count as usize)],
            segments,
            by_id,
            new_to_old: None,
            target_base_doc_ids: Vec::new(),
            target_doc_counts: Vec::new(),
            deleted_doc_count,
            join_values: None,
        };
        let new_to_old = map.assign(&survivors, split, attr_readers)?;
        if need_reverse_mapping {
            map.new_to_old = Some(new_to_old);
        }
        info!(
            "reclaim map of segments {:?}: [{}] docs kept, [{}] deleted, [{}] targets{}",
            map.segments.iter().map(|s| s.segment_id).collect::<Vec<_>>(),
            map.new_doc_count(),
            deleted_doc_count,
            map.target_count(),
            if sort_attributes.is_empty() { "" } else { ", sorted" }
        );
        Ok(map)
    }

    fn sort_survivors(
        survivors: Vec<(SegmentId, DocId)>,
        sort_attributes: &[(&AttributeConfig, SortPattern)],
        attr_readers: &AttributeReaderContainer,
    ) -> Result<Vec<(SegmentId, DocId)>> {
        let mut readers: AHashMap<(usize, SegmentId), Arc<PatchedAttributeSegment>> = AHashMap::new();
        let mut keyed: Vec<SortKey> = Vec::with_capacity(survivors.len());
        for (segment_id, local) in survivors {
            let mut key = Vec::with_capacity(sort_attributes.len());
            for (idx, (config, _)) in sort_attributes.iter().enumerate() {
                let reader = match readers.get(&(idx, segment_id)) {
                    Some(reader) => reader.clone(),
                    None => {
                        let reader = attr_readers.segment(&config.name, segment_id)?;
                        readers.insert((idx, segment_id), reader.clone());
                        reader
                    }
                };
                key.push(sort_value(config, reader.get(local)?)?);
            }
            keyed.push((key, segment_id, local));
        }
        let patterns: Vec<_> = sort_attributes.iter().map(|(_, p)| *p).collect();
        keyed.par_sort_by(|a, b| compare_keys(a, b, &patterns));
        Ok(keyed.into_iter().map(|(_, s, d)| (s, d)).collect())
    }

    /// Give `survivors` (in merge order) contiguous new ids per target.
    fn assign(
        &mut self,
        survivors: &[(SegmentId, DocId)],
        split: &SegmentSplitStrategy,
        attr_readers: &AttributeReaderContainer,
    ) -> Result<Vec<(SegmentId, DocId)>> {
        let total = survivors.len();
        let target_count = split.target_count(total);
        let mut targets = Vec::with_capacity(total);
        let mut readers: AHashMap<SegmentId, Arc<PatchedAttributeSegment>> = AHashMap::new();
        for (ordinal, &(segment_id, local)) in survivors.iter().enumerate() {
            let target = match split.required_attribute() {
                Some(name) => {
                    let reader = match readers.get(&segment_id) {
                        Some(reader) => reader.clone(),
                        None => {
                            let reader = attr_readers.segment(name, segment_id)?;
                            readers.insert(segment_id, reader.clone());
                            reader
                        }
                    };
                    split.target_of(ordinal, total, Some(reader.get(local)?))
                }
                None => split.target_of(ordinal, total, None),
            };
            targets.push(target.min(target_count - 1));
        }

        let mut counts = vec![0u32; target_count];
        for &target in &targets {
            counts[target] += 1;
        }
        let bases = prefix_bases(&counts);
        let mut next = bases.clone();
        let mut new_to_old = vec![(0, 0); total];
        for (&(segment_id, local), &target) in survivors.iter().zip(&targets) {
            let new_id = next[target];
            next[target] += 1;
            let idx = self.slot(segment_id, local).ok_or_else(|| {
                IndexlibError::index_collapsed(format!(
                    "doc [{local}] of segment [{segment_id}] outside reclaim map"
                ))
            })?;
            self.old_to_new[idx] = new_id;
            new_to_old[new_id as usize] = (segment_id, local);
        }
        self.target_base_doc_ids = bases;
        self.target_doc_counts = counts;
        Ok(new_to_old)
    }

    /// Map of the sub-document table, keeping sub docs grouped under their
    /// main doc in the main map's new order.
    ///
    /// Sub docs of deleted main docs are dropped. The result carries the
    /// rewritten join values of both tables.
    pub fn init_for_sub_doc(
        main_map: &ReclaimMap,
        sub_merge_infos: &[SegmentMergeInfo],
        sub_deletion_maps: &BTreeMap<SegmentId, DeletionMap>,
        main_attr_readers: &AttributeReaderContainer,
        need_reverse_mapping: bool,
    ) -> Result<ReclaimMap> {
        let main_reverse = main_map.new_to_old.as_ref().ok_or_else(|| {
            IndexlibError::inconsistent_state("sub doc reclaim needs the main reverse mapping")
        })?;
        let (segments, by_id) = layout_segments(sub_merge_infos)?;
        let mut map = ReclaimMap {
            old_to_new: vec![REMOVED; segments.last().map_or(0, |s| s.offset + s.doc_count as usize)],
            segments,
            by_id,
            new_to_old: None,
            target_base_doc_ids: Vec::new(),
            target_doc_counts: vec![0; main_map.target_count()],
            deleted_doc_count: 0,
            join_values: None,
        };

        let mut joins: AHashMap<SegmentId, Arc<PatchedAttributeSegment>> = AHashMap::new();
        let mut new_to_old = Vec::new();
        let mut join_values = JoinValues {
            main_join: Vec::with_capacity(main_reverse.len()),
            sub_join: Vec::new(),
        };
        for target in 0..main_map.target_count() {
            let base = main_map.target_base_doc_ids[target];
            let mut sub_local = 0u32;
            for main_local in 0..main_map.target_doc_counts[target] {
                let (segment_id, old_main) = main_reverse[(base + main_local) as usize];
                let join = match joins.get(&segment_id) {
                    Some(join) => join.clone(),
                    None => {
                        let join = main_attr_readers.segment(layout::MAIN_JOIN_ATTRIBUTE, segment_id)?;
                        joins.insert(segment_id, join.clone());
                        join
                    }
                };
                let begin = if old_main == 0 {
                    0
                } else {
                    read_join_value(&join, old_main - 1)?
                };
                let end = read_join_value(&join, old_main)?;
                let segment = map
                    .segment_index(segment_id)
                    .map(|idx| map.segments[idx])
                    .ok_or_else(|| {
                        IndexlibError::inconsistent_state(format!(
                            "segment [{segment_id}] has no sub merge info"
                        ))
                    })?;
                if begin > end || end > segment.doc_count {
                    return Err(IndexlibError::index_collapsed(format!(
                        "join range [{begin}, {end}) of doc [{old_main}] in segment [{segment_id}] \
                         exceeds [{}] sub docs",
                        segment.doc_count
                    )));
                }
                let deletion_map = sub_deletion_maps.get(&segment_id);
                for old_sub in begin..end {
                    if deletion_map.is_some_and(|m| m.is_deleted(old_sub)) {
                        continue;
                    }
                    map.old_to_new[segment.offset + old_sub as usize] = new_to_old.len() as DocId;
                    new_to_old.push((segment_id, old_sub));
                    join_values.sub_join.push(main_local);
                    sub_local += 1;
                }
                join_values.main_join.push(sub_local);
            }
            map.target_doc_counts[target] = sub_local;
        }
        map.target_base_doc_ids = prefix_bases(&map.target_doc_counts);
        map.deleted_doc_count = (map.old_to_new.len() - new_to_old.len()) as u32;
        map.join_values = Some(join_values);
        if need_reverse_mapping {
            map.new_to_old = Some(new_to_old);
        }
        debug!(
            "sub doc reclaim map: [{}] sub docs kept, [{}] dropped",
            map.new_doc_count(),
            map.deleted_doc_count
        );
        Ok(map)
    }

    fn segment_index(&self, segment_id: SegmentId) -> Option<usize> {
        self.by_id
            .binary_search_by_key(&segment_id, |&(s, _)| s)
            .ok()
            .map(|pos| self.by_id[pos].1)
    }

    fn slot(&self, segment_id: SegmentId, local: DocId) -> Option<usize> {
        let segment = self.segments[self.segment_index(segment_id)?];
        (local < segment.doc_count).then(|| segment.offset + local as usize)
    }

    /// New id of a source document; `None` when it was deleted or is not
    /// part of the merge.
    pub fn get_new_doc_id(&self, segment_id: SegmentId, local: DocId) -> Option<DocId> {
        let new_id = self.old_to_new[self.slot(segment_id, local)?];
        (new_id != REMOVED).then_some(new_id)
    }

    /// Source of a new document. Requires the reverse mapping.
    pub fn get_old_doc_id_and_seg_id(&self, new_id: DocId) -> Option<(SegmentId, DocId)> {
        self.new_to_old.as_ref()?.get(new_id as usize).copied()
    }

    pub fn has_reverse_mapping(&self) -> bool {
        self.new_to_old.is_some()
    }

    /// Documents kept by the merge, over all targets.
    pub fn new_doc_count(&self) -> u32 {
        self.target_doc_counts.iter().sum()
    }

    pub fn deleted_doc_count(&self) -> u32 {
        self.deleted_doc_count
    }

    /// Source segment ids in merge order.
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.iter().map(|s| s.segment_id)
    }

    pub fn target_count(&self) -> usize {
        self.target_doc_counts.len()
    }

    pub fn target_doc_counts(&self) -> &[u32] {
        &self.target_doc_counts
    }

    pub fn target_base_doc_ids(&self) -> &[DocId] {
        &self.target_base_doc_ids
    }

    /// Target segment index a new document lands in.
    pub fn get_target_segment_index(&self, new_id: DocId) -> Option<usize> {
        if new_id >= self.new_doc_count() {
            return None;
        }
        self.target_base_doc_ids
            .partition_point(|&base| base <= new_id)
            .checked_sub(1)
    }

    /// Target index and doc id local to that target.
    pub fn get_local_id_in_target(&self, new_id: DocId) -> Option<(usize, DocId)> {
        let target = self.get_target_segment_index(new_id)?;
        Some((target, new_id - self.target_base_doc_ids[target]))
    }

    pub fn join_values(&self) -> Option<&JoinValues> {
        self.join_values.as_ref()
    }

    /// Peak memory of building a map over `seg_merge_infos`.
    pub fn estimate_memory_use(
        seg_merge_infos: &[SegmentMergeInfo],
        sorted: bool,
        need_reverse_mapping: bool,
    ) -> i64 {
        let total: i64 = seg_merge_infos.iter().map(|s| s.doc_count as i64).sum();
        let valid: i64 = seg_merge_infos.iter().map(|s| s.valid_doc_count() as i64).sum();
        // old_to_new, survivor list and per-survivor target
        let mut bytes = total * 4 + valid * 16;
        if sorted {
            bytes += valid * 48;
        }
        if need_reverse_mapping {
            bytes += valid * 8;
        }
        bytes
    }

    pub fn memory_use(&self) -> usize {
        self.old_to_new.len() * 4
            + self.new_to_old.as_ref().map_or(0, |r| r.len() * 8)
            + self
                .join_values
                .as_ref()
                .map_or(0, |j| (j.main_join.len() + j.sub_join.len()) * 4)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u32(RECLAIM_MAP_MAGIC)?;
        writer.write_u32(self.segments.len() as u32)?;
        for segment in &self.segments {
            writer.write_u32(segment.segment_id)?;
            writer.write_u32(segment.doc_count)?;
        }
        for &new_id in &self.old_to_new {
            writer.write_u32(new_id)?;
        }
        writer.write_u32(self.target_doc_counts.len() as u32)?;
        for &count in &self.target_doc_counts {
            writer.write_u32(count)?;
        }
        writer.write_u8(u8::from(self.new_to_old.is_some()))?;
        match &self.join_values {
            Some(join) => {
                writer.write_u8(1)?;
                for values in [&join.main_join, &join.sub_join] {
                    writer.write_u32(values.len() as u32)?;
                    for &v in values.iter() {
                        writer.write_u32(v)?;
                    }
                }
            }
            None => writer.write_u8(0)?,
        }
        writer.finish()
    }

    pub fn from_bytes(data: &[u8], path: &str) -> Result<Self> {
        let mut reader = StructReader::from_slice(data);
        if reader.read_u32()? != RECLAIM_MAP_MAGIC {
            return Err(IndexlibError::index_collapsed(format!(
                "[{path}] is not a reclaim map"
            )));
        }
        let segment_count = reader.read_u32()? as usize;
        let mut infos = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            let segment_id = reader.read_u32()?;
            let doc_count = reader.read_u32()?;
            infos.push(SegmentMergeInfo::new(segment_id, doc_count, 0));
        }
        let (segments, by_id) = layout_segments(&infos)?;
        let total = segments.last().map_or(0, |s| s.offset + s.doc_count as usize);
        let mut old_to_new = Vec::with_capacity(total);
        for _ in 0..total {
            old_to_new.push(reader.read_u32()?);
        }
        let target_count = reader.read_u32()? as usize;
        let mut target_doc_counts = Vec::with_capacity(target_count);
        for _ in 0..target_count {
            target_doc_counts.push(reader.read_u32()?);
        }
        let has_reverse = reader.read_u8()? != 0;
        let join_values = if reader.read_u8()? != 0 {
            let mut lists = Vec::with_capacity(2);
            for _ in 0..2 {
                let len = reader.read_u32()? as usize;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(reader.read_u32()?);
                }
                lists.push(values);
            }
            let sub_join = lists.pop().unwrap_or_default();
            let main_join = lists.pop().unwrap_or_default();
            Some(JoinValues { main_join, sub_join })
        } else {
            None
        };
        reader.expect_checksum(path)?;

        let new_doc_count: u32 = target_doc_counts.iter().sum();
        let mut new_to_old = vec![None; new_doc_count as usize];
        for segment in &segments {
            for local in 0..segment.doc_count {
                let new_id = old_to_new[segment.offset + local as usize];
                if new_id == REMOVED {
                    continue;
                }
                match new_to_old.get_mut(new_id as usize) {
                    Some(slot @ None) => *slot = Some((segment.segment_id, local)),
                    _ => {
                        return Err(IndexlibError::index_collapsed(format!(
                            "reclaim map [{path}] assigns new doc [{new_id}] twice or out of range"
                        )));
                    }
                }
            }
        }
        let new_to_old = new_to_old.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| {
            IndexlibError::index_collapsed(format!("reclaim map [{path}] has unassigned new docs"))
        })?;

        Ok(ReclaimMap {
            deleted_doc_count: (total - new_to_old.len()) as u32,
            segments,
            by_id,
            old_to_new,
            new_to_old: has_reverse.then_some(new_to_old),
            target_base_doc_ids: prefix_bases(&target_doc_counts),
            target_doc_counts,
            join_values,
        })
    }

    pub fn store(&self, storage: &dyn Storage, path: &str) -> Result<()> {
        storage.write_all(path, &self.to_bytes()?)
    }

    pub fn load(storage: &dyn Storage, path: &str) -> Result<Self> {
        let data = storage.read_all(path)?;
        Self::from_bytes(&data, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::format::{AttributeFiles, AttributeFormat};
    use crate::config::FieldType;
    use crate::index_base::{SegmentInfo, Version};
    use crate::merger::split::SplitStrategyConfig;
    use crate::storage::memory::MemoryStorage;

    struct Fixture {
        dir: SegmentDirectory,
        container: AttributeReaderContainer,
        infos: Vec<SegmentMergeInfo>,
    }

    /// Segments `(id, scores)`; every segment has one doc per score.
    fn fixture(segments: &[(SegmentId, Vec<u32>)]) -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let schema = Arc::new(
            Schema::new("s")
                .with_attribute(AttributeConfig::new("score", FieldType::UInt32))
                .with_attribute(AttributeConfig::new("tags", FieldType::String).multi_value()),
        );
        let mut version = Version::new(0);
        let mut infos = Vec::new();
        for (segment_id, scores) in segments {
            let root = layout::segment_root(*segment_id, false);
            SegmentInfo::new(scores.len() as u32, *segment_id as i64)
                .store(storage.as_ref(), &root)
                .unwrap();
            let values: Vec<[u8; 4]> = scores.iter().map(|s| s.to_le_bytes()).collect();
            AttributeFiles::build(
                AttributeFormat::SingleValue { width: 4 },
                values.iter().map(|v| v.as_slice()),
            )
            .unwrap()
            .store(storage.as_ref(), &root, "score")
            .unwrap();
            version.add_segment(*segment_id);
            infos.push(SegmentMergeInfo::new(*segment_id, scores.len() as u32, 0));
        }
        let dir = SegmentDirectory::open(storage, version).unwrap();
        let container = AttributeReaderContainer::new(dir.clone(), schema);
        Fixture {
            dir,
            container,
            infos,
        }
    }

    fn deletions(entries: &[(SegmentId, u32, &[DocId])]) -> BTreeMap<SegmentId, DeletionMap> {
        entries
            .iter()
            .map(|(segment_id, doc_count, docs)| {
                let mut map = DeletionMap::new(*doc_count);
                for &doc in *docs {
                    map.delete(doc).unwrap();
                }
                (*segment_id, map)
            })
            .collect()
    }

    fn build(f: &Fixture, deleted: &BTreeMap<SegmentId, DeletionMap>, sort: &[SortDescription]) -> ReclaimMap {
        ReclaimMap::init(
            &f.infos,
            deleted,
            &f.container,
            sort,
            &f.dir,
            &SegmentSplitStrategy::default(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_natural_order_with_deletion() {
        let f = fixture(&[(0, vec![0; 10]), (1, vec![0; 10]), (2, vec![0; 10])]);
        let map = build(&f, &deletions(&[(1, 10, &[5])]), &[]);
        assert_eq!(map.new_doc_count(), 29);
        assert_eq!(map.deleted_doc_count(), 1);
        assert_eq!(map.get_new_doc_id(0, 9), Some(9));
        assert_eq!(map.get_new_doc_id(1, 4), Some(14));
        assert_eq!(map.get_new_doc_id(1, 5), None);
        assert_eq!(map.get_new_doc_id(1, 6), Some(15));
        assert_eq!(map.get_new_doc_id(2, 0), Some(19));
        assert_eq!(map.get_new_doc_id(3, 0), None);
        assert_eq!(map.get_new_doc_id(2, 10), None);
        assert_eq!(map.get_old_doc_id_and_seg_id(15), Some((1, 6)));
    }

    #[test]
    fn test_merge_order_follows_infos() {
        let mut f = fixture(&[(0, vec![0; 2]), (1, vec![0; 3])]);
        f.infos.reverse();
        let map = build(&f, &BTreeMap::new(), &[]);
        assert_eq!(map.segment_ids().collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(map.get_new_doc_id(1, 0), Some(0));
        assert_eq!(map.get_new_doc_id(0, 0), Some(3));
    }

    #[test]
    fn test_sorted_descending() {
        let f = fixture(&[(0, vec![5, 9, 1]), (1, vec![7, 3])]);
        let sort = [SortDescription::new("score", SortPattern::Descending)];
        let map = build(&f, &deletions(&[(1, 2, &[1])]), &sort);
        let order: Vec<_> = (0..map.new_doc_count())
            .map(|n| map.get_old_doc_id_and_seg_id(n).unwrap())
            .collect();
        assert_eq!(order, vec![(0, 1), (1, 0), (0, 0), (0, 2)]);
    }

    #[test]
    fn test_sort_ties_keep_source_order() {
        let f = fixture(&[(2, vec![1, 1]), (0, vec![1, 0])]);
        let sort = [SortDescription::new("score", SortPattern::Ascending)];
        let map = build(&f, &BTreeMap::new(), &sort);
        assert_eq!(map.get_new_doc_id(0, 1), Some(0));
        assert_eq!(map.get_new_doc_id(0, 0), Some(1));
        assert_eq!(map.get_new_doc_id(2, 0), Some(2));
        assert_eq!(map.get_new_doc_id(2, 1), Some(3));
    }

    #[test]
    fn test_multi_value_sort_attribute_rejected() {
        let f = fixture(&[(0, vec![1])]);
        let sort = [SortDescription::new("tags", SortPattern::Ascending)];
        let err = ReclaimMap::init(
            &f.infos,
            &BTreeMap::new(),
            &f.container,
            &sort,
            &f.dir,
            &SegmentSplitStrategy::default(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, IndexlibError::Schema(_)));
    }

    #[test]
    fn test_empty_or_unknown_segments_rejected() {
        let f = fixture(&[(0, vec![1])]);
        let split = SegmentSplitStrategy::default();
        assert!(ReclaimMap::init(&[], &BTreeMap::new(), &f.container, &[], &f.dir, &split, false).is_err());
        let unknown = [SegmentMergeInfo::new(7, 1, 0)];
        assert!(
            ReclaimMap::init(&unknown, &BTreeMap::new(), &f.container, &[], &f.dir, &split, false)
                .is_err()
        );
    }

    #[test]
    fn test_split_targets_are_contiguous() {
        let f = fixture(&[(0, vec![0; 5]), (1, vec![0; 5])]);
        let split = SegmentSplitStrategy::new(SplitStrategyConfig::MaxDocCount { max_doc_count: 4 });
        let map = ReclaimMap::init(
            &f.infos,
            &deletions(&[(0, 5, &[0])]),
            &f.container,
            &[],
            &f.dir,
            &split,
            false,
        )
        .unwrap();
        assert_eq!(map.target_doc_counts(), &[4, 4, 1]);
        assert_eq!(map.target_base_doc_ids(), &[0, 4, 8]);
        assert_eq!(map.get_local_id_in_target(5), Some((1, 1)));
        assert_eq!(map.get_target_segment_index(8), Some(2));
        assert_eq!(map.get_target_segment_index(9), None);
        assert!(!map.has_reverse_mapping());
    }

    #[test]
    fn test_store_and_load() {
        let storage = MemoryStorage::new_default();
        let f = fixture(&[(0, vec![3, 1, 2]), (4, vec![0, 5])]);
        let sort = [SortDescription::new("score", SortPattern::Ascending)];
        let map = build(&f, &deletions(&[(4, 2, &[1])]), &sort);
        map.store(&storage, "merge_meta/merge_plan_0/resource/reclaim_map")
            .unwrap();
        let loaded =
            ReclaimMap::load(&storage, "merge_meta/merge_plan_0/resource/reclaim_map").unwrap();
        assert_eq!(loaded, map);

        let mut bytes = map.to_bytes().unwrap();
        bytes[10] ^= 1;
        assert!(ReclaimMap::from_bytes(&bytes, "x").unwrap_err().is_index_collapsed());
    }

    #[test]
    fn test_memory_estimate_grows_with_sort() {
        let infos = [SegmentMergeInfo::new(0, 100, 10)];
        let plain = ReclaimMap::estimate_memory_use(&infos, false, false);
        let sorted = ReclaimMap::estimate_memory_use(&infos, true, true);
        assert!(plain > 0);
        assert!(sorted > plain);
    }

    #[test]
    fn test_sub_doc_map_follows_main_order() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let main_schema = Arc::new(Schema::new("main"));
        let mut version = Version::new(0);
        // segment 0: main docs with sub ranges [0,2) [2,2) [2,3); segment 1: [0,1) [1,3)
        for (segment_id, join, sub_count) in [(0u32, vec![2u32, 2, 3], 3u32), (1, vec![1, 3], 3)] {
            let root = layout::segment_root(segment_id, false);
            SegmentInfo::new(join.len() as u32, 0).store(storage.as_ref(), &root).unwrap();
            SegmentInfo::new(sub_count, 0)
                .store(storage.as_ref(), &layout::segment_root(segment_id, true))
                .unwrap();
            let values: Vec<[u8; 4]> = join.iter().map(|v| v.to_le_bytes()).collect();
            AttributeFiles::build(AttributeFormat::join(), values.iter().map(|v| v.as_slice()))
                .unwrap()
                .store(storage.as_ref(), &root, layout::MAIN_JOIN_ATTRIBUTE)
                .unwrap();
            version.add_segment(segment_id);
        }
        let dir = SegmentDirectory::open(storage, version).unwrap();
        let container = AttributeReaderContainer::new(dir.clone(), main_schema);
        let infos = [SegmentMergeInfo::new(0, 3, 0), SegmentMergeInfo::new(1, 2, 0)];
        let main_map = ReclaimMap::init(
            &infos,
            &deletions(&[(0, 3, &[0])]),
            &container,
            &[],
            &dir,
            &SegmentSplitStrategy::default(),
            true,
        )
        .unwrap();

        let sub_infos = [SegmentMergeInfo::new(0, 3, 0), SegmentMergeInfo::new(1, 3, 0)];
        let sub_map = ReclaimMap::init_for_sub_doc(
            &main_map,
            &sub_infos,
            &deletions(&[(1, 3, &[2])]),
            &container,
            true,
        )
        .unwrap();
        // Subs 0 and 1 of segment 0 belong to the deleted main doc.
        assert_eq!(sub_map.get_new_doc_id(0, 0), None);
        assert_eq!(sub_map.get_new_doc_id(0, 2), Some(0));
        assert_eq!(sub_map.get_new_doc_id(1, 0), Some(1));
        assert_eq!(sub_map.get_new_doc_id(1, 1), Some(2));
        assert_eq!(sub_map.get_new_doc_id(1, 2), None);
        let join = sub_map.join_values().unwrap();
        assert_eq!(join.main_join, vec![0, 1, 2, 3]);
        assert_eq!(join.sub_join, vec![1, 2, 3]);
        assert_eq!(sub_map.target_doc_counts(), &[3]);
    }
}
