//! Iterators replaying attribute patches in doc-id order.
//!
//! Patch files of a destination segment are merged by `(doc id, apply
//! order)`, so for any document the updates come out oldest first and the
//! consumer can let the last one win. Doc ids yielded are global to the
//! segment directory the iterator was opened on.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use byteorder::{ByteOrder, LittleEndian};

use crate::attribute::format::{AttributeFormat, AttributeSegmentReader};
use crate::attribute::patch::AttributePatchReader;
use crate::config::Schema;
use crate::error::{IndexlibError, Result};
use crate::index_base::patch_file_finder::{PatchFileFinder, PatchFileInfo};
use crate::index_base::{DocId, PatchFileFilter, SegmentDirectory, SegmentId, layout};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchItem {
    /// Attribute id within its table's schema.
    pub field_id: usize,
    pub doc_id: DocId,
    pub value: Vec<u8>,
    /// Whether `doc_id` is a sub-table doc.
    pub is_sub: bool,
}

#[derive(Debug)]
struct PatchStream {
    base: DocId,
    reader: AttributePatchReader,
}

/// Patches of one attribute, across one or more destination segments.
#[derive(Debug)]
pub struct SingleFieldPatchIterator {
    field_id: usize,
    is_sub: bool,
    streams: Vec<PatchStream>,
    /// One past the largest doc id any stream may yield.
    doc_limit: DocId,
    // (global doc id, stream index); streams of one destination are
    // created in apply order, so the index breaks ties correctly.
    heap: BinaryHeap<Reverse<(DocId, usize)>>,
}

impl SingleFieldPatchIterator {
    /// Patches of attribute `name` for every segment of `dir`.
    pub fn new(
        dir: &SegmentDirectory,
        field_id: usize,
        name: &str,
        filter: &PatchFileFilter,
    ) -> Result<Self> {
        let infos = filter.filter_all(PatchFileFinder::new(dir).find_attribute_patches(name)?);
        let mut targets = Vec::with_capacity(infos.len());
        for (dst, list) in infos {
            let base = dir.base_doc_id(dst).ok_or_else(|| {
                IndexlibError::inconsistent_state(format!("patch target [{dst}] not in directory"))
            })?;
            targets.push((base, dir.segment_info(dst)?.doc_count, list));
        }
        Self::from_infos(dir.storage().as_ref(), field_id, dir.is_sub(), targets)
    }

    /// Patches of attribute `name` for the single segment `dst`, with local
    /// doc ids.
    pub fn for_segment(
        dir: &SegmentDirectory,
        field_id: usize,
        name: &str,
        dst: SegmentId,
        filter: &PatchFileFilter,
    ) -> Result<Self> {
        let mut infos = filter.filter_all(PatchFileFinder::new(dir).find_attribute_patches(name)?);
        let targets = match infos.remove(&dst) {
            Some(list) => vec![(0, dir.segment_info(dst)?.doc_count, list)],
            None => Vec::new(),
        };
        Self::from_infos(dir.storage().as_ref(), field_id, dir.is_sub(), targets)
    }

    /// Build from `(base doc id, destination doc count, patch files)` triples.
    pub fn from_infos(
        storage: &dyn Storage,
        field_id: usize,
        is_sub: bool,
        targets: Vec<(DocId, u32, Vec<PatchFileInfo>)>,
    ) -> Result<Self> {
        let mut streams = Vec::new();
        let mut heap = BinaryHeap::new();
        let mut doc_limit = 0;
        for (base, doc_count, list) in targets {
            doc_limit = doc_limit.max(base + doc_count);
            for info in &list {
                let reader = AttributePatchReader::open(storage, info, doc_count)?;
                if let Some(doc_id) = reader.peek_doc_id() {
                    heap.push(Reverse((base + doc_id, streams.len())));
                }
                streams.push(PatchStream { base, reader });
            }
        }
        Ok(SingleFieldPatchIterator {
            field_id,
            is_sub,
            streams,
            doc_limit,
            heap,
        })
    }

    pub fn field_id(&self) -> usize {
        self.field_id
    }

    pub fn doc_limit(&self) -> DocId {
        self.doc_limit
    }

    pub fn peek_doc_id(&self) -> Option<DocId> {
        self.heap.peek().map(|Reverse((doc_id, _))| *doc_id)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Iterator for SingleFieldPatchIterator {
    type Item = PatchItem;

    fn next(&mut self) -> Option<PatchItem> {
        let Reverse((doc_id, idx)) = self.heap.pop()?;
        let stream = &mut self.streams[idx];
        let (_, value) = stream.reader.next_entry()?;
        if let Some(next) = stream.reader.peek_doc_id() {
            self.heap.push(Reverse((stream.base + next, idx)));
        }
        Some(PatchItem {
            field_id: self.field_id,
            doc_id,
            value,
            is_sub: self.is_sub,
        })
    }
}

/// Patches of every updatable attribute of a table, ordered by
/// `(doc id, field id)`.
#[derive(Debug)]
pub struct MultiFieldPatchIterator {
    fields: Vec<SingleFieldPatchIterator>,
    heap: BinaryHeap<Reverse<(DocId, usize, usize)>>,
}

impl MultiFieldPatchIterator {
    pub fn new(dir: &SegmentDirectory, schema: &Schema, filter: &PatchFileFilter) -> Result<Self> {
        let mut fields = Vec::new();
        for (field_id, attr) in schema.attributes.iter().enumerate() {
            if !attr.updatable {
                continue;
            }
            let iter = SingleFieldPatchIterator::new(dir, field_id, &attr.name, filter)?;
            if !iter.is_empty() {
                fields.push(iter);
            }
        }
        Ok(Self::from_fields(fields))
    }

    pub fn from_fields(fields: Vec<SingleFieldPatchIterator>) -> Self {
        let heap = fields
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| f.peek_doc_id().map(|doc| Reverse((doc, f.field_id(), idx))))
            .collect();
        MultiFieldPatchIterator { fields, heap }
    }

    pub fn peek_doc_id(&self) -> Option<DocId> {
        self.heap.peek().map(|Reverse((doc_id, _, _))| *doc_id)
    }

    /// One past the largest doc id any field may yield.
    pub fn doc_limit(&self) -> DocId {
        self.fields.iter().map(|f| f.doc_limit()).max().unwrap_or(0)
    }
}

impl Iterator for MultiFieldPatchIterator {
    type Item = PatchItem;

    fn next(&mut self) -> Option<PatchItem> {
        let Reverse((_, field_id, idx)) = self.heap.pop()?;
        let field = &mut self.fields[idx];
        let item = field.next()?;
        if let Some(doc) = field.peek_doc_id() {
            self.heap.push(Reverse((doc, field_id, idx)));
        }
        Some(item)
    }
}

/// Main-table and sub-table patches interleaved by main doc id.
///
/// A sub doc's patch sorts under the main doc owning it; on ties the main
/// doc's own patches come first.
#[derive(Debug)]
pub struct SubDocPatchIterator {
    main: MultiFieldPatchIterator,
    sub: MultiFieldPatchIterator,
    sub_to_main: Vec<DocId>,
}

impl SubDocPatchIterator {
    pub fn new(
        main_dir: &SegmentDirectory,
        schema: &Schema,
        filter: &PatchFileFilter,
    ) -> Result<Self> {
        let sub_schema = schema.sub_schema.as_deref().ok_or_else(|| {
            IndexlibError::schema(format!("schema [{}] has no sub schema", schema.name))
        })?;
        let sub_dir = main_dir.sub_directory()?;
        let main = MultiFieldPatchIterator::new(main_dir, schema, filter)?;
        let sub = MultiFieldPatchIterator::new(&sub_dir, sub_schema, filter)?;
        let sub_to_main = load_sub_to_main(main_dir, &sub_dir)?;
        Self::from_parts(main, sub, sub_to_main)
    }

    /// `sub_to_main` maps each global sub doc id to its global main doc id
    /// and must cover every sub doc the patches may touch.
    pub fn from_parts(
        main: MultiFieldPatchIterator,
        sub: MultiFieldPatchIterator,
        sub_to_main: Vec<DocId>,
    ) -> Result<Self> {
        if sub.doc_limit() as usize > sub_to_main.len() {
            return Err(IndexlibError::index_collapsed(format!(
                "sub patches reach doc [{}], only [{}] sub docs are joined to main docs",
                sub.doc_limit() - 1,
                sub_to_main.len()
            )));
        }
        Ok(SubDocPatchIterator {
            main,
            sub,
            sub_to_main,
        })
    }

    fn sub_key(&self) -> Option<DocId> {
        let sub_doc = self.sub.peek_doc_id()?;
        self.sub_to_main.get(sub_doc as usize).copied()
    }
}

impl Iterator for SubDocPatchIterator {
    type Item = PatchItem;

    fn next(&mut self) -> Option<PatchItem> {
        match (self.main.peek_doc_id(), self.sub_key()) {
            (Some(main), Some(sub)) if sub < main => self.sub.next(),
            (Some(_), _) => self.main.next(),
            (None, Some(_)) => self.sub.next(),
            (None, None) => None,
        }
    }
}

/// Global sub doc id to global main doc id, from the sub join attribute.
pub fn load_sub_to_main(main_dir: &SegmentDirectory, sub_dir: &SegmentDirectory) -> Result<Vec<DocId>> {
    let mut mapping = Vec::with_capacity(sub_dir.total_doc_count() as usize);
    for segment_id in sub_dir.segment_ids() {
        let sub_count = sub_dir.segment_info(segment_id)?.doc_count;
        let main_count = main_dir.segment_info(segment_id)?.doc_count;
        let main_base = main_dir.base_doc_id(segment_id).unwrap_or(0);
        let reader = AttributeSegmentReader::open(
            sub_dir.storage().as_ref(),
            &sub_dir.segment_root(segment_id),
            layout::SUB_JOIN_ATTRIBUTE,
            AttributeFormat::join(),
            sub_count,
        )?;
        for doc in 0..sub_count {
            let main_local = LittleEndian::read_u32(reader.get(doc)?);
            if main_local >= main_count {
                return Err(IndexlibError::index_collapsed(format!(
                    "sub doc [{doc}] of segment [{segment_id}] joins missing main doc [{main_local}]"
                )));
            }
            mapping.push(main_base + main_local);
        }
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::patch::AttributePatchWriter;
    use crate::storage::memory::MemoryStorage;

    fn write_patch(storage: &dyn Storage, path: &str, entries: &[(DocId, u8)]) -> PatchFileInfo {
        let mut writer = AttributePatchWriter::new();
        for &(doc, value) in entries {
            writer.set(doc, vec![value]);
        }
        writer.store(storage, path).unwrap();
        PatchFileInfo {
            src_segment: 0,
            dst_segment: 0,
            src_timestamp: 0,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_single_field_orders_by_doc_then_patch() {
        let storage = MemoryStorage::new_default();
        let older = write_patch(&storage, "a", &[(1, 10), (4, 11)]);
        let newer = write_patch(&storage, "b", &[(1, 20), (2, 21)]);
        let other = write_patch(&storage, "c", &[(0, 30)]);

        let iter = SingleFieldPatchIterator::from_infos(
            &storage,
            3,
            false,
            vec![(0, 5, vec![older, newer]), (5, 2, vec![other])],
        )
        .unwrap();
        let items: Vec<(DocId, u8)> = iter.map(|i| (i.doc_id, i.value[0])).collect();
        assert_eq!(items, vec![(1, 10), (1, 20), (2, 21), (4, 11), (5, 30)]);
    }

    #[test]
    fn test_multi_field_orders_by_doc_then_field() {
        let storage = MemoryStorage::new_default();
        let f0 = write_patch(&storage, "f0", &[(3, 1)]);
        let f2 = write_patch(&storage, "f2", &[(1, 2), (3, 3)]);
        let fields = vec![
            SingleFieldPatchIterator::from_infos(&storage, 2, false, vec![(0, 5, vec![f2])]).unwrap(),
            SingleFieldPatchIterator::from_infos(&storage, 0, false, vec![(0, 5, vec![f0])]).unwrap(),
        ];
        let items: Vec<(DocId, usize)> = MultiFieldPatchIterator::from_fields(fields)
            .map(|i| (i.doc_id, i.field_id))
            .collect();
        assert_eq!(items, vec![(1, 2), (3, 0), (3, 2)]);
    }

    #[test]
    fn test_sub_doc_interleaves_by_main_doc() {
        let storage = MemoryStorage::new_default();
        let main_patch = write_patch(&storage, "m", &[(0, 1), (2, 2)]);
        let sub_patch = write_patch(&storage, "s", &[(1, 3), (4, 4)]);
        let main = MultiFieldPatchIterator::from_fields(vec![
            SingleFieldPatchIterator::from_infos(&storage, 0, false, vec![(0, 3, vec![main_patch])])
                .unwrap(),
        ]);
        let sub = MultiFieldPatchIterator::from_fields(vec![
            SingleFieldPatchIterator::from_infos(&storage, 0, true, vec![(0, 5, vec![sub_patch])])
                .unwrap(),
        ]);
        // Sub docs 0..2 belong to main 0, 2..4 to main 1, 4 to main 2.
        let iter = SubDocPatchIterator::from_parts(main, sub, vec![0, 0, 1, 1, 2]).unwrap();
        let items: Vec<(bool, DocId)> = iter.map(|i| (i.is_sub, i.doc_id)).collect();
        assert_eq!(items, vec![(false, 0), (true, 1), (false, 2), (true, 4)]);
    }

    #[test]
    fn test_sub_doc_beyond_join_is_rejected() {
        let storage = MemoryStorage::new_default();
        let sub_patch = write_patch(&storage, "s", &[(4, 4)]);
        let main = MultiFieldPatchIterator::from_fields(Vec::new());
        let sub = MultiFieldPatchIterator::from_fields(vec![
            SingleFieldPatchIterator::from_infos(&storage, 0, true, vec![(0, 5, vec![sub_patch])])
                .unwrap(),
        ]);
        // Five sub docs may be patched but only four are joined.
        let err = SubDocPatchIterator::from_parts(main, sub, vec![0, 0, 1, 1]).unwrap_err();
        assert!(matches!(err, IndexlibError::IndexCollapsed(_)));
    }
}
