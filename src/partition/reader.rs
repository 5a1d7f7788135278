//! Point-in-time view of one version, kept current by replaying operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info};

use crate::attribute::codec::decode_value;
use crate::attribute::container::AttributeReaderContainer;
use crate::config::{IndexPartitionOptions, Schema};
use crate::document::{FieldValue, PkHash, hash_primary_key};
use crate::error::{IndexlibError, Result};
use crate::index_base::{DeletionMap, DocId, PatchFileFilter, SegmentDirectory, SegmentId, Version};
use crate::inverted::primary_key::PrimaryKeyIndex;
use crate::inverted::reader::InvertedIndexReader;
use crate::operation::{Operation, OperationQueue, OperationRedoStrategy, RedoHint};
use crate::storage::Storage;

/// Reads the main table of a version. Global doc ids concatenate segments
/// in ascending id order.
#[derive(Debug)]
pub struct PartitionReader {
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    options: IndexPartitionOptions,
    dir: SegmentDirectory,
    attributes: AttributeReaderContainer,
    deletion_maps: BTreeMap<SegmentId, DeletionMap>,
    primary_keys: BTreeMap<SegmentId, PrimaryKeyIndex>,
    indexes: BTreeMap<(String, SegmentId), InvertedIndexReader>,
    // replayed updates, by (field id, segment, local doc)
    updates: AHashMap<(usize, SegmentId, DocId), Vec<u8>>,
}

impl PartitionReader {
    pub fn open(
        storage: Arc<dyn Storage>,
        schema: Arc<Schema>,
        options: IndexPartitionOptions,
        version: Version,
    ) -> Result<Self> {
        let dir = SegmentDirectory::open(storage.clone(), version)?;
        let filter = PatchFileFilter::from_online_config(&options.online);
        let attributes = AttributeReaderContainer::new(dir.clone(), schema.clone()).with_filter(filter);
        let deletion_maps = dir.load_deletion_maps()?;

        let mut primary_keys = BTreeMap::new();
        let mut indexes = BTreeMap::new();
        for segment_id in dir.segment_ids() {
            let doc_count = dir.segment_info(segment_id)?.doc_count;
            if doc_count == 0 {
                continue;
            }
            let root = dir.segment_root(segment_id);
            if let Some(pk) = &schema.primary_key {
                primary_keys.insert(
                    segment_id,
                    PrimaryKeyIndex::load(storage.as_ref(), &root, &pk.index_name, doc_count)?,
                );
            }
            for index in &schema.indexes {
                indexes.insert(
                    (index.name.clone(), segment_id),
                    InvertedIndexReader::open(storage.as_ref(), &root, &index.name, doc_count)?,
                );
            }
        }
        debug!(
            "reader opened version [{}]: [{}] docs in segments {:?}",
            dir.version().version_id,
            dir.total_doc_count(),
            dir.version().segments
        );
        Ok(PartitionReader {
            storage,
            schema,
            options,
            dir,
            attributes,
            deletion_maps,
            primary_keys,
            indexes,
            updates: AHashMap::new(),
        })
    }

    pub fn version(&self) -> &Version {
        self.dir.version()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Documents of the view, deleted ones included.
    pub fn doc_count(&self) -> u32 {
        self.dir.total_doc_count()
    }

    pub fn live_doc_count(&self) -> u32 {
        self.doc_count()
            - self
                .deletion_maps
                .values()
                .map(DeletionMap::deleted_count)
                .sum::<u32>()
    }

    fn is_deleted_local(&self, segment_id: SegmentId, local: DocId) -> bool {
        self.deletion_maps
            .get(&segment_id)
            .is_some_and(|map| map.is_deleted(local))
    }

    pub fn is_deleted(&self, global: DocId) -> bool {
        match self.dir.locate(global) {
            Some((segment_id, local)) => self.is_deleted_local(segment_id, local),
            None => true,
        }
    }

    fn lookup_hash_in(&self, hash: PkHash, segments: &[SegmentId]) -> Option<(SegmentId, DocId)> {
        segments.iter().find_map(|&segment_id| {
            let local = self.primary_keys.get(&segment_id)?.lookup(hash)?;
            (!self.is_deleted_local(segment_id, local)).then_some((segment_id, local))
        })
    }

    fn newest_first(&self) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self.dir.segment_ids().collect();
        ids.reverse();
        ids
    }

    /// Global id of the live document with primary key `key`.
    pub fn lookup(&self, key: &str) -> Option<DocId> {
        let hash = hash_primary_key(key, self.schema.pk_hash_type());
        let (segment_id, local) = self.lookup_hash_in(hash, &self.newest_first())?;
        Some(self.dir.base_doc_id(segment_id)? + local)
    }

    /// Value of attribute `name` for a live document.
    pub fn attribute(&self, name: &str, global: DocId) -> Result<Option<FieldValue>> {
        let field_id = self
            .schema
            .attribute_id(name)
            .ok_or_else(|| IndexlibError::not_found(format!("attribute [{name}]")))?;
        let Some((segment_id, local)) = self.dir.locate(global) else {
            return Ok(None);
        };
        if self.is_deleted_local(segment_id, local) {
            return Ok(None);
        }
        let config = &self.schema.attributes[field_id];
        if let Some(value) = self.updates.get(&(field_id, segment_id, local)) {
            return decode_value(config, value).map(Some);
        }
        let segment = self.attributes.segment(name, segment_id)?;
        decode_value(config, segment.get(local)?).map(Some)
    }

    /// Global ids of the live documents holding `term` in index `index_name`.
    pub fn search(&self, index_name: &str, term: &str) -> Result<Vec<DocId>> {
        if !self.schema.indexes.iter().any(|i| i.name == index_name) {
            return Err(IndexlibError::not_found(format!("index [{index_name}]")));
        }
        let mut hits = Vec::new();
        for (&(_, segment_id), reader) in self
            .indexes
            .iter()
            .filter(|((name, _), _)| name == index_name)
        {
            let Some(base) = self.dir.base_doc_id(segment_id) else {
                continue;
            };
            hits.extend(
                reader
                    .lookup(term)
                    .into_iter()
                    .filter(|&local| !self.is_deleted_local(segment_id, local))
                    .map(|local| base + local),
            );
        }
        hits.sort_unstable();
        Ok(hits)
    }

    /// A reader of `new_version` that also reflects the operations of
    /// `operations` the new version does not contain yet.
    pub fn reopen(&self, new_version: Version, operations: &OperationQueue) -> Result<PartitionReader> {
        let mut reader = PartitionReader::open(
            self.storage.clone(),
            self.schema.clone(),
            self.options.clone(),
            new_version.clone(),
        )?;
        // documents of segments merged away now live in new merged segments
        let mut moved_to = Vec::new();
        for segment_id in reader.newest_first() {
            if !self.version().has_segment(segment_id) && reader.dir.segment_info(segment_id)?.merged {
                moved_to.push(segment_id);
            }
        }

        let mut strategy = OperationRedoStrategy::init(self.version(), &new_version);
        let mut redone = 0;
        for op in operations.iter() {
            let mut hint = RedoHint::Unknown;
            if strategy.need_redo(op, &mut hint) && reader.redo(op, hint, &moved_to)? {
                redone += 1;
            }
        }
        info!(
            "reopened on version [{}]: redid [{redone}] operations, skipped [{}] updates and [{}] deletes",
            new_version.version_id,
            strategy.skip_redo_update_op_count(),
            strategy.skip_redo_delete_op_count()
        );
        Ok(reader)
    }

    fn redo(&mut self, op: &Operation, hint: RedoHint, moved_to: &[SegmentId]) -> Result<bool> {
        // an add that replaced nothing has nothing to remove
        if op.meta().segment_id_before_modified.is_none() {
            return Ok(false);
        }
        let candidates = match hint {
            RedoHint::InSegment(segment_id) => vec![segment_id],
            RedoHint::Unknown => moved_to.to_vec(),
        };
        let Some((segment_id, local)) = self.lookup_hash_in(op.pk_hash(), &candidates) else {
            return Ok(false);
        };
        match op {
            Operation::Remove { .. } => {
                let Some(map) = self.deletion_maps.get_mut(&segment_id) else {
                    return Ok(false);
                };
                map.delete(local)
            }
            Operation::UpdateField { fields, .. } => {
                for (field_id, value) in fields {
                    self.updates.insert((*field_id, segment_id, local), value.clone());
                }
                Ok(!fields.is_empty())
            }
            Operation::SubDocRemove { .. } => {
                debug!("sub document removal is not replayed on the main table reader");
                Ok(false)
            }
        }
    }
}
