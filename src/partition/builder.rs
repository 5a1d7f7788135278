//! Building segments from documents.
//!
//! [`IndexBuilder`] keeps one in-memory segment per table. Adds go into it;
//! deletes and updates of documents that already live on disk are collected
//! as deletion-map and attribute patches addressed to their segment. Dumping
//! writes all of it as one new segment and commits a version that contains
//! it.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};

use crate::attribute::codec::{default_value, encode_value};
use crate::attribute::format::{AttributeFiles, AttributeFormat};
use crate::attribute::pack::encode_pack;
use crate::attribute::patch::AttributePatchWriter;
use crate::config::{IndexPartitionOptions, Schema};
use crate::document::{DocOperateType, Document, PkHash};
use crate::error::{IndexlibError, Result};
use crate::index_base::{
    DeletionMap, DocId, Locator, SegmentDirectory, SegmentId, SegmentInfo, Version,
    VersionCommitter, layout,
};
use crate::inverted::primary_key::PrimaryKeyIndex;
use crate::inverted::writer::InvertedIndexWriter;
use crate::merger::{IndexPartitionMerger, MergeMeta};
use crate::operation::{FieldUpdates, Operation, OperationFactory, OperationQueue};
use crate::storage::Storage;

/// Where the live document with some primary key is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocLocation {
    Building(DocId),
    OnDisk(SegmentId, DocId),
}

/// Documents of one table in the segment being built.
#[derive(Debug)]
struct TableBuffer {
    schema: Arc<Schema>,
    doc_count: u32,
    attributes: Vec<Vec<Vec<u8>>>,
    packs: Vec<Vec<Vec<u8>>>,
    indexes: Vec<InvertedIndexWriter>,
    pk: AHashMap<PkHash, DocId>,
    deleted: DeletionMap,
    join: Vec<DocId>,
}

impl TableBuffer {
    fn new(schema: Arc<Schema>) -> Self {
        TableBuffer {
            attributes: schema.attributes.iter().map(|_| Vec::new()).collect(),
            packs: schema.pack_attributes.iter().map(|_| Vec::new()).collect(),
            indexes: schema
                .indexes
                .iter()
                .map(|config| InvertedIndexWriter::new(config.clone()))
                .collect(),
            schema,
            doc_count: 0,
            pk: AHashMap::new(),
            deleted: DeletionMap::new(0),
            join: Vec::new(),
        }
    }

    fn add(&mut self, doc: &Document, join_value: Option<DocId>) -> Result<DocId> {
        let local = self.doc_count;
        for (config, values) in self.schema.attributes.iter().zip(&mut self.attributes) {
            let value = match doc.field(&config.name) {
                Some(v) => encode_value(config, v)?,
                None => default_value(config),
            };
            values.push(value);
        }
        for (pack, values) in self.schema.pack_attributes.iter().zip(&mut self.packs) {
            values.push(encode_pack(pack, doc)?);
        }
        for writer in &mut self.indexes {
            writer.add_document(local, doc);
        }
        if let Some(hash) = doc.pk_hash(&self.schema) {
            self.pk.insert(hash, local);
        }
        if let Some(value) = join_value {
            self.join.push(value);
        }
        self.doc_count += 1;
        self.deleted.grow(self.doc_count);
        Ok(local)
    }

    fn lookup(&self, hash: PkHash) -> Option<DocId> {
        self.pk
            .get(&hash)
            .copied()
            .filter(|&local| !self.deleted.is_deleted(local))
    }

    fn update(&mut self, local: DocId, fields: &FieldUpdates) -> Result<()> {
        for (field_id, value) in fields {
            let slot = self
                .attributes
                .get_mut(*field_id)
                .and_then(|values| values.get_mut(local as usize))
                .ok_or_else(|| {
                    IndexlibError::out_of_range(format!(
                        "update of field [{field_id}] for building doc [{local}]"
                    ))
                })?;
            *slot = value.clone();
        }
        Ok(())
    }

    fn dump(&self, storage: &dyn Storage, root: &str, segment_id: SegmentId, sub: bool) -> Result<()> {
        for (config, values) in self.schema.attributes.iter().zip(&self.attributes) {
            AttributeFiles::build(AttributeFormat::of(config), values.iter().map(Vec::as_slice))?
                .store(storage, root, &config.name)?;
        }
        for (pack, values) in self.schema.pack_attributes.iter().zip(&self.packs) {
            AttributeFiles::build(AttributeFormat::of_pack(pack), values.iter().map(Vec::as_slice))?
                .store(storage, root, &pack.name)?;
        }
        for writer in &self.indexes {
            writer.dump(storage, root, self.doc_count)?;
        }
        if let Some(pk) = &self.schema.primary_key {
            let entries = self
                .pk
                .iter()
                .filter(|&(_, &local)| !self.deleted.is_deleted(local))
                .map(|(&hash, &local)| (hash, local))
                .collect();
            PrimaryKeyIndex::from_entries(pk.hash_type, entries).store(storage, root, &pk.index_name)?;
        }
        let has_join = sub || self.schema.has_sub_schema();
        if has_join {
            let name = if sub {
                layout::SUB_JOIN_ATTRIBUTE
            } else {
                layout::MAIN_JOIN_ATTRIBUTE
            };
            let encoded: Vec<[u8; 4]> = self.join.iter().map(|v| v.to_le_bytes()).collect();
            AttributeFiles::build(AttributeFormat::join(), encoded.iter().map(|v| v.as_slice()))?
                .store(storage, root, name)?;
        }
        self.deleted
            .store(storage, &layout::deletion_map_path(root, segment_id))
    }
}

#[derive(Debug)]
struct OnDiskSegment {
    segment_id: SegmentId,
    doc_count: u32,
    pk: Option<PrimaryKeyIndex>,
    deleted: DeletionMap,
}

/// Build state of the main or the sub table.
#[derive(Debug)]
struct TableState {
    schema: Arc<Schema>,
    sub: bool,
    // newest segment first
    on_disk: Vec<OnDiskSegment>,
    building: TableBuffer,
    deletion_patches: BTreeMap<SegmentId, DeletionMap>,
    attribute_patches: BTreeMap<(usize, SegmentId), AttributePatchWriter>,
}

impl TableState {
    fn open(storage: &Arc<dyn Storage>, version: &Version, schema: Arc<Schema>, sub: bool) -> Result<Self> {
        let mut on_disk = Vec::new();
        if !version.segments.is_empty() {
            let mut dir = SegmentDirectory::open(storage.clone(), version.clone())?;
            if sub {
                dir = dir.sub_directory()?;
            }
            let ids: Vec<SegmentId> = dir.segment_ids().collect();
            for segment_id in ids.into_iter().rev() {
                let doc_count = dir.segment_info(segment_id)?.doc_count;
                let pk = match &schema.primary_key {
                    Some(config) => Some(PrimaryKeyIndex::load(
                        storage.as_ref(),
                        &dir.segment_root(segment_id),
                        &config.index_name,
                        doc_count,
                    )?),
                    None => None,
                };
                on_disk.push(OnDiskSegment {
                    segment_id,
                    doc_count,
                    pk,
                    deleted: dir.load_deletion_map(segment_id)?,
                });
            }
        }
        Ok(TableState {
            building: TableBuffer::new(schema.clone()),
            schema,
            sub,
            on_disk,
            deletion_patches: BTreeMap::new(),
            attribute_patches: BTreeMap::new(),
        })
    }

    fn lookup(&self, hash: PkHash) -> Option<DocLocation> {
        if let Some(local) = self.building.lookup(hash) {
            return Some(DocLocation::Building(local));
        }
        self.on_disk.iter().find_map(|segment| {
            let local = segment.pk.as_ref()?.lookup(hash)?;
            (!segment.deleted.is_deleted(local)).then_some(DocLocation::OnDisk(segment.segment_id, local))
        })
    }

    fn delete(&mut self, location: DocLocation) -> Result<()> {
        match location {
            DocLocation::Building(local) => {
                self.building.deleted.delete(local)?;
            }
            DocLocation::OnDisk(segment_id, local) => {
                let segment = self
                    .on_disk
                    .iter_mut()
                    .find(|s| s.segment_id == segment_id)
                    .ok_or_else(|| IndexlibError::not_found(format!("segment [{segment_id}]")))?;
                segment.deleted.delete(local)?;
                let doc_count = segment.doc_count;
                self.deletion_patches
                    .entry(segment_id)
                    .or_insert_with(|| DeletionMap::new(doc_count))
                    .delete(local)?;
            }
        }
        Ok(())
    }

    fn update(&mut self, location: DocLocation, fields: &FieldUpdates) -> Result<()> {
        match location {
            DocLocation::Building(local) => self.building.update(local, fields),
            DocLocation::OnDisk(segment_id, local) => {
                for (field_id, value) in fields {
                    self.attribute_patches
                        .entry((*field_id, segment_id))
                        .or_insert_with(AttributePatchWriter::new)
                        .set(local, value.clone());
                }
                Ok(())
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.building.doc_count > 0
            || !self.deletion_patches.is_empty()
            || !self.attribute_patches.is_empty()
    }

    /// Write the building segment and the collected patches as `segment_id`.
    fn dump(&self, storage: &dyn Storage, segment_id: SegmentId, timestamp: i64, locator: Locator) -> Result<()> {
        let root = layout::segment_root(segment_id, self.sub);
        self.building.dump(storage, &root, segment_id, self.sub)?;
        for (dst, map) in &self.deletion_patches {
            map.store(storage, &layout::deletion_map_path(&root, *dst))?;
        }
        for ((field_id, dst), writer) in &self.attribute_patches {
            let name = &self.schema.attributes[*field_id].name;
            writer.store(
                storage,
                &layout::attribute_patch_path(&root, name, segment_id, *dst),
            )?;
        }
        let mut info = SegmentInfo::new(self.building.doc_count, timestamp);
        info.locator = locator;
        info.store(storage, &root)?;
        debug!(
            "dumped {} table of segment [{segment_id}]: [{}] docs, [{}] deletion patches, [{}] attribute patches",
            if self.sub { "sub" } else { "main" },
            self.building.doc_count,
            self.deletion_patches.len(),
            self.attribute_patches.len()
        );
        Ok(())
    }
}

/// Turns documents into segments and versions of one index partition.
#[derive(Debug)]
pub struct IndexBuilder {
    storage: Arc<dyn Storage>,
    schema: Arc<Schema>,
    options: IndexPartitionOptions,
    version: Version,
    main: TableState,
    sub: Option<TableState>,
    building_segment_id: SegmentId,
    factory: OperationFactory,
    segment_operations: OperationQueue,
    operations: OperationQueue,
    timestamp: i64,
    locator: Locator,
}

impl IndexBuilder {
    /// Continue building on the latest version of `storage`, or start an
    /// empty index.
    pub fn open(storage: Arc<dyn Storage>, schema: Arc<Schema>, options: IndexPartitionOptions) -> Result<Self> {
        options.validate()?;
        let version = Version::load_latest(storage.as_ref())?.unwrap_or_else(|| Version::new(-1));
        let block_size = options.build.operation_block_size;
        let mut builder = IndexBuilder {
            main: TableState::open(&storage, &Version::new(-1), schema.clone(), false)?,
            sub: None,
            factory: OperationFactory::new(schema.clone()),
            segment_operations: OperationQueue::new(block_size),
            operations: OperationQueue::new(block_size),
            building_segment_id: 0,
            timestamp: version.timestamp,
            locator: version.locator,
            storage,
            schema,
            options,
            version,
        };
        builder.reload()?;
        info!(
            "builder opened on version [{}] with segments {:?}",
            builder.version.version_id, builder.version.segments
        );
        Ok(builder)
    }

    fn reload(&mut self) -> Result<()> {
        self.main = TableState::open(&self.storage, &self.version, self.schema.clone(), false)?;
        self.sub = match &self.schema.sub_schema {
            Some(sub_schema) => Some(TableState::open(
                &self.storage,
                &self.version,
                Arc::new(sub_schema.as_ref().clone()),
                true,
            )?),
            None => None,
        };
        self.building_segment_id = self.next_segment_id()?;
        Ok(())
    }

    /// One past the largest segment id on storage, in the version or
    /// reserved as a target of a pending merge.
    fn next_segment_id(&self) -> Result<SegmentId> {
        let on_storage = self
            .storage
            .list_files_with_prefix(layout::SEGMENT_DIR_PREFIX)?
            .iter()
            .filter_map(|name| layout::parse_segment_dir(name))
            .max();
        let meta_root = self.options.merge.merge_meta_prefix.trim_matches('/');
        let reserved = match MergeMeta::load(self.storage.as_ref(), meta_root)? {
            Some(meta) => meta.target_segment_ids().into_iter().max(),
            None => None,
        };
        Ok(on_storage
            .into_iter()
            .chain(reserved)
            .chain(self.version.last_segment())
            .max()
            .map_or(0, |id| id + 1))
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Every operation applied since the builder was opened.
    pub fn operation_queue(&self) -> &OperationQueue {
        &self.operations
    }

    /// Documents in the segment being built.
    pub fn building_doc_count(&self) -> u32 {
        self.main.building.doc_count
    }

    fn sub_table(&mut self) -> Result<&mut TableState> {
        let name = &self.schema.name;
        self.sub.as_mut().ok_or_else(|| {
            IndexlibError::schema(format!("schema [{name}] has no sub schema"))
        })
    }

    fn segment_of(&self, location: DocLocation) -> SegmentId {
        match location {
            DocLocation::Building(_) => self.building_segment_id,
            DocLocation::OnDisk(segment_id, _) => segment_id,
        }
    }

    fn record(&mut self, operation: Option<Operation>) {
        if let Some(op) = operation {
            self.segment_operations.append(op.clone());
            self.operations.append(op);
        }
    }

    /// Apply one document. `false` when it changed nothing, such as a
    /// delete of an unknown key.
    pub fn build(&mut self, doc: &Document) -> Result<bool> {
        let applied = match doc.op_type {
            DocOperateType::SkipDoc => false,
            DocOperateType::AddDoc => self.add_document(doc)?,
            DocOperateType::DeleteDoc => self.delete_document(doc)?,
            DocOperateType::UpdateField => self.update_document(doc)?,
            DocOperateType::DeleteSubDoc => self.delete_sub_documents(doc)?,
        };
        if applied {
            self.timestamp = self.timestamp.max(doc.timestamp);
            if let Some(locator) = doc.locator {
                self.locator = self.locator.max(locator);
            }
        }
        if self.main.building.doc_count >= self.options.build.max_docs_per_segment {
            self.dump_segment()?;
        }
        Ok(applied)
    }

    fn primary_key_of(&self, doc: &Document) -> Result<Option<PkHash>> {
        if self.schema.primary_key.is_none() {
            return Ok(None);
        }
        doc.pk_hash(&self.schema).map(Some).ok_or_else(|| {
            IndexlibError::bad_parameter(format!(
                "document of schema [{}] lacks its primary key",
                self.schema.name
            ))
        })
    }

    fn add_document(&mut self, doc: &Document) -> Result<bool> {
        let old = match self.primary_key_of(doc)? {
            Some(hash) => self.main.lookup(hash),
            None => None,
        };
        if let Some(location) = old {
            self.main.delete(location)?;
        }
        let operation = self
            .factory
            .create_operation(doc, old.map(|l| self.segment_of(l)))?;

        let main_local = self.main.building.doc_count;
        let join_end = match self.sub.as_mut() {
            Some(sub) => {
                for sub_doc in &doc.sub_docs {
                    if let Some(hash) = sub_doc.pk_hash(&sub.schema) {
                        if let Some(location) = sub.lookup(hash) {
                            sub.delete(location)?;
                        }
                    }
                    sub.building.add(sub_doc, Some(main_local))?;
                }
                Some(sub.building.doc_count)
            }
            None => {
                if !doc.sub_docs.is_empty() {
                    warn!("sub documents ignored by schema [{}]", self.schema.name);
                }
                None
            }
        };
        self.main.building.add(doc, join_end)?;
        self.record(operation);
        Ok(true)
    }

    fn locate(&self, doc: &Document) -> Result<Option<DocLocation>> {
        let Some(hash) = self.primary_key_of(doc)? else {
            warn!("[{:?}] without primary key dropped", doc.op_type);
            return Ok(None);
        };
        let found = self.main.lookup(hash);
        if found.is_none() {
            debug!("[{:?}] for unknown key at [{}] dropped", doc.op_type, doc.timestamp);
        }
        Ok(found)
    }

    fn delete_document(&mut self, doc: &Document) -> Result<bool> {
        let Some(location) = self.locate(doc)? else {
            return Ok(false);
        };
        self.main.delete(location)?;
        let operation = self.factory.create_operation(doc, Some(self.segment_of(location)))?;
        self.record(operation);
        Ok(true)
    }

    fn update_document(&mut self, doc: &Document) -> Result<bool> {
        let Some(location) = self.locate(doc)? else {
            return Ok(false);
        };
        let operation = self.factory.create_operation(doc, Some(self.segment_of(location)))?;
        let Some(Operation::UpdateField {
            fields,
            sub_updates,
            ..
        }) = &operation
        else {
            return Ok(false);
        };
        self.main.update(location, fields)?;
        if !sub_updates.is_empty() {
            let sub = self.sub_table()?;
            for sub_update in sub_updates {
                match sub.lookup(sub_update.pk_hash) {
                    Some(sub_location) => sub.update(sub_location, &sub_update.fields)?,
                    None => debug!("update of unknown sub document dropped"),
                }
            }
        }
        self.record(operation);
        Ok(true)
    }

    fn delete_sub_documents(&mut self, doc: &Document) -> Result<bool> {
        let Some(location) = self.locate(doc)? else {
            return Ok(false);
        };
        let operation = self.factory.create_operation(doc, Some(self.segment_of(location)))?;
        let Some(Operation::SubDocRemove { sub_pk_hashes, .. }) = &operation else {
            return Ok(false);
        };
        let sub = self.sub_table()?;
        let mut deleted = 0;
        for &hash in sub_pk_hashes {
            if let Some(sub_location) = sub.lookup(hash) {
                sub.delete(sub_location)?;
                deleted += 1;
            }
        }
        self.record(operation);
        Ok(deleted > 0)
    }

    /// Whether a dump would write anything.
    pub fn has_pending(&self) -> bool {
        self.main.has_pending() || self.sub.as_ref().is_some_and(TableState::has_pending)
    }

    /// Write the segment being built and commit a version holding it.
    /// `None` when there was nothing to write.
    pub fn dump_segment(&mut self) -> Result<Option<Version>> {
        if !self.has_pending() {
            return Ok(None);
        }
        let segment_id = self.building_segment_id.max(self.next_segment_id()?);
        if segment_id != self.building_segment_id {
            warn!(
                "segment id [{}] was taken meanwhile, dumping as [{segment_id}]",
                self.building_segment_id
            );
        }
        let storage = self.storage.as_ref();
        self.main.dump(storage, segment_id, self.timestamp, self.locator)?;
        if let Some(sub) = &self.sub {
            sub.dump(storage, segment_id, self.timestamp, self.locator)?;
        }
        self.segment_operations
            .dump(storage, &layout::operation_log_path(&layout::segment_root(segment_id, false)))?;

        let mut version = self.version.clone();
        version.version_id += 1;
        version.add_segment(segment_id);
        version.timestamp = version.timestamp.max(self.timestamp);
        version.locator = version.locator.max(self.locator);
        VersionCommitter::new(storage, self.options.build.keep_version_count).commit(&mut version)?;
        info!(
            "segment [{segment_id}] with [{}] docs committed in version [{}]",
            self.main.building.doc_count, version.version_id
        );

        self.version = version.clone();
        self.segment_operations = OperationQueue::new(self.options.build.operation_block_size);
        self.reload()?;
        Ok(Some(version))
    }

    /// Dump what is pending, then merge the index. `None` when the merge
    /// found nothing to do.
    pub fn merge(&mut self, optimize: bool) -> Result<Option<Version>> {
        self.dump_segment()?;
        let merged = IndexPartitionMerger::new(self.storage.clone(), self.schema.clone(), self.options.clone())
            .merge(optimize)?;
        if let Some(version) = &merged {
            self.version = version.clone();
            self.reload()?;
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::container::AttributeReaderContainer;
    use crate::config::{AttributeConfig, FieldType, PrimaryKeyConfig};
    use crate::storage::memory::MemoryStorage;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new("items")
                .with_attribute(AttributeConfig::new("id", FieldType::String))
                .with_attribute(AttributeConfig::new("price", FieldType::Int32).updatable())
                .with_primary_key(PrimaryKeyConfig::new("id")),
        )
    }

    fn doc(id: &str, price: i64, ts: i64) -> Document {
        Document::add(ts).with_field("id", id).with_field("price", price)
    }

    fn price(storage: &Arc<dyn Storage>, version: &Version, segment_id: SegmentId, local: DocId) -> i32 {
        let dir = SegmentDirectory::open(storage.clone(), version.clone()).unwrap();
        let container = AttributeReaderContainer::new(dir, schema());
        let bytes = container.segment("price", segment_id).unwrap().get(local).unwrap().to_vec();
        i32::from_le_bytes(bytes.try_into().unwrap())
    }

    #[test]
    fn test_dump_commits_version() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage.clone(), schema(), IndexPartitionOptions::default()).unwrap();
        assert!(builder.dump_segment().unwrap().is_none());
        builder.build(&doc("a", 1, 10)).unwrap();
        builder.build(&doc("b", 2, 11)).unwrap();
        let version = builder.dump_segment().unwrap().unwrap();
        assert_eq!(version.version_id, 0);
        assert_eq!(version.segments, vec![0]);
        assert_eq!(version.timestamp, 11);

        let latest = Version::load_latest(storage.as_ref()).unwrap().unwrap();
        assert_eq!(latest.segments, vec![0]);
        let info = SegmentInfo::load(storage.as_ref(), &layout::segment_root(0, false)).unwrap();
        assert_eq!(info.doc_count, 2);
    }

    #[test]
    fn test_re_add_deletes_on_disk_doc() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage.clone(), schema(), IndexPartitionOptions::default()).unwrap();
        builder.build(&doc("a", 1, 10)).unwrap();
        builder.build(&doc("b", 2, 10)).unwrap();
        builder.dump_segment().unwrap();
        builder.build(&doc("a", 3, 20)).unwrap();
        let version = builder.dump_segment().unwrap().unwrap();
        assert_eq!(version.segments, vec![0, 1]);

        let dir = SegmentDirectory::open(storage.clone(), version).unwrap();
        let deleted = dir.load_deletion_map(0).unwrap();
        assert!(deleted.is_deleted(0));
        assert!(!deleted.is_deleted(1));
        assert_eq!(builder.operation_queue().len(), 3);
    }

    #[test]
    fn test_update_on_disk_doc_writes_patch() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage.clone(), schema(), IndexPartitionOptions::default()).unwrap();
        builder.build(&doc("a", 1, 10)).unwrap();
        builder.dump_segment().unwrap();
        let update = Document::update(20).with_field("id", "a").with_field("price", 42i64);
        assert!(builder.build(&update).unwrap());
        let version = builder.dump_segment().unwrap().unwrap();
        assert!(storage.file_exists(&layout::attribute_patch_path(
            &layout::segment_root(1, false),
            "price",
            1,
            0
        )));
        assert_eq!(price(&storage, &version, 0, 0), 42);
    }

    #[test]
    fn test_update_building_doc_in_place() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage.clone(), schema(), IndexPartitionOptions::default()).unwrap();
        builder.build(&doc("a", 1, 10)).unwrap();
        builder
            .build(&Document::update(11).with_field("id", "a").with_field("price", 7i64))
            .unwrap();
        let version = builder.dump_segment().unwrap().unwrap();
        assert_eq!(price(&storage, &version, 0, 0), 7);
    }

    #[test]
    fn test_unknown_delete_is_dropped() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage, schema(), IndexPartitionOptions::default()).unwrap();
        assert!(!builder.build(&Document::delete(5).with_field("id", "zz")).unwrap());
        assert!(!builder.has_pending());
        assert!(builder.operation_queue().is_empty());
    }

    #[test]
    fn test_segment_full_dumps_automatically() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut options = IndexPartitionOptions::default();
        options.build.max_docs_per_segment = 2;
        let mut builder = IndexBuilder::open(storage, schema(), options).unwrap();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            builder.build(&doc(id, i as i64, i as i64)).unwrap();
        }
        assert_eq!(builder.version().segments, vec![0]);
        assert_eq!(builder.building_doc_count(), 1);
    }

    #[test]
    fn test_reopen_continues_segment_ids() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut builder = IndexBuilder::open(storage.clone(), schema(), IndexPartitionOptions::default()).unwrap();
        builder.build(&doc("a", 1, 10)).unwrap();
        builder.dump_segment().unwrap();
        drop(builder);

        let mut builder = IndexBuilder::open(storage, schema(), IndexPartitionOptions::default()).unwrap();
        builder.build(&Document::delete(20).with_field("id", "a")).unwrap();
        let version = builder.dump_segment().unwrap().unwrap();
        assert_eq!(version.segments, vec![0, 1]);
        assert_eq!(version.version_id, 1);
    }
}
