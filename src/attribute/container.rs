//! Per-segment attribute values with their patches applied.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::attribute::format::{AttributeFormat, AttributeSegmentReader};
use crate::attribute::patch_iterator::SingleFieldPatchIterator;
use crate::config::Schema;
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, PatchFileFilter, SegmentDirectory, SegmentId, layout};

/// Base values of one attribute in one segment plus the latest patch value
/// of every updated document.
#[derive(Debug)]
pub struct PatchedAttributeSegment {
    base: AttributeSegmentReader,
    patches: AHashMap<DocId, Vec<u8>>,
}

impl PatchedAttributeSegment {
    pub fn new(base: AttributeSegmentReader, patches: AHashMap<DocId, Vec<u8>>) -> Self {
        PatchedAttributeSegment { base, patches }
    }

    pub fn doc_count(&self) -> u32 {
        self.base.doc_count()
    }

    pub fn get(&self, doc_id: DocId) -> Result<&[u8]> {
        match self.patches.get(&doc_id) {
            Some(value) => Ok(value),
            None => self.base.get(doc_id),
        }
    }

    pub fn patched_doc_count(&self) -> usize {
        self.patches.len()
    }

    pub fn memory_use(&self) -> usize {
        self.base.memory_use() + self.patches.values().map(|v| v.len() + 8).sum::<usize>()
    }
}

/// Lazily loaded, shared attribute segments of one segment directory.
#[derive(Debug)]
pub struct AttributeReaderContainer {
    dir: SegmentDirectory,
    schema: Arc<Schema>,
    filter: PatchFileFilter,
    cache: Mutex<AHashMap<(String, SegmentId), Arc<PatchedAttributeSegment>>>,
}

impl AttributeReaderContainer {
    /// `schema` is the schema of the table `dir` views (main or sub).
    pub fn new(dir: SegmentDirectory, schema: Arc<Schema>) -> Self {
        AttributeReaderContainer {
            dir,
            schema,
            filter: PatchFileFilter::default(),
            cache: Mutex::new(AHashMap::new()),
        }
    }

    pub fn with_filter(mut self, filter: PatchFileFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn segment_directory(&self) -> &SegmentDirectory {
        &self.dir
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Values of attribute, pack attribute or join attribute `name` in
    /// `segment_id`.
    pub fn segment(&self, name: &str, segment_id: SegmentId) -> Result<Arc<PatchedAttributeSegment>> {
        let key = (name.to_string(), segment_id);
        if let Some(found) = self.cache.lock().get(&key) {
            return Ok(found.clone());
        }
        let loaded = Arc::new(self.load(name, segment_id)?);
        self.cache.lock().insert(key, loaded.clone());
        Ok(loaded)
    }

    fn load(&self, name: &str, segment_id: SegmentId) -> Result<PatchedAttributeSegment> {
        let doc_count = self.dir.segment_info(segment_id)?.doc_count;
        let root = self.dir.segment_root(segment_id);
        let storage = self.dir.storage().as_ref();

        if name == layout::MAIN_JOIN_ATTRIBUTE || name == layout::SUB_JOIN_ATTRIBUTE {
            let base = AttributeSegmentReader::open(
                storage,
                &root,
                name,
                AttributeFormat::join(),
                doc_count,
            )?;
            return Ok(PatchedAttributeSegment::new(base, AHashMap::new()));
        }

        if let Some(field_id) = self.schema.attribute_id(name) {
            let config = &self.schema.attributes[field_id];
            let base = AttributeSegmentReader::open(
                storage,
                &root,
                name,
                AttributeFormat::of(config),
                doc_count,
            )?;
            let mut patches = AHashMap::new();
            if config.updatable {
                let iter = SingleFieldPatchIterator::for_segment(
                    &self.dir,
                    field_id,
                    name,
                    segment_id,
                    &self.filter,
                )?;
                for item in iter {
                    patches.insert(item.doc_id, item.value);
                }
            }
            return Ok(PatchedAttributeSegment::new(base, patches));
        }

        if let Some(pack) = self.schema.pack_attribute(name) {
            let base = AttributeSegmentReader::open(
                storage,
                &root,
                name,
                AttributeFormat::of_pack(pack),
                doc_count,
            )?;
            return Ok(PatchedAttributeSegment::new(base, AHashMap::new()));
        }

        Err(IndexlibError::schema(format!(
            "no attribute [{name}] in schema [{}]",
            self.schema.name
        )))
    }
}
