//! Deletion maps: one bit per local document.
//!
//! A segment's own deletions and the deletions later segments applied to it
//! share one file format; the effective map of a segment is the union of all
//! `deletionmap/data_<id>` files in the version.

use bit_vec::BitVec;

use crate::error::{IndexlibError, Result};
use crate::index_base::DocId;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionMap {
    bits: BitVec,
    deleted_count: u32,
}

impl DeletionMap {
    pub fn new(doc_count: u32) -> Self {
        DeletionMap {
            bits: BitVec::from_elem(doc_count as usize, false),
            deleted_count: 0,
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_count == 0
    }

    /// Mark a document deleted. Returns whether it was live before.
    pub fn delete(&mut self, doc_id: DocId) -> Result<bool> {
        match self.bits.get(doc_id as usize) {
            Some(true) => Ok(false),
            Some(false) => {
                self.bits.set(doc_id as usize, true);
                self.deleted_count += 1;
                Ok(true)
            }
            None => Err(IndexlibError::index_collapsed(format!(
                "doc [{doc_id}] out of range of deletion map with [{}] docs",
                self.bits.len()
            ))),
        }
    }

    /// Whether `doc_id` is deleted. Ids past the end are not.
    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.bits.get(doc_id as usize).unwrap_or(false)
    }

    /// Grow to `doc_count` documents; new documents are live.
    pub fn grow(&mut self, doc_count: u32) {
        let len = self.bits.len();
        if (doc_count as usize) > len {
            self.bits.grow(doc_count as usize - len, false);
        }
    }

    /// Union with another map of the same segment.
    pub fn merge(&mut self, other: &DeletionMap) -> Result<()> {
        if other.doc_count() > self.doc_count() {
            return Err(IndexlibError::index_collapsed(format!(
                "deletion patch covers [{}] docs, segment has [{}]",
                other.doc_count(),
                self.doc_count()
            )));
        }
        for doc_id in other.deleted_docs() {
            self.delete(doc_id)?;
        }
        Ok(())
    }

    pub fn deleted_docs(&self) -> impl Iterator<Item = DocId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, deleted)| *deleted)
            .map(|(doc_id, _)| doc_id as DocId)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u32(self.doc_count())?;
        writer.write_u32(self.deleted_count)?;
        writer.write_bytes(&self.bits.to_bytes())?;
        writer.finish()
    }

    pub fn from_bytes(data: &[u8], path: &str) -> Result<Self> {
        let mut reader = StructReader::from_slice(data);
        let doc_count = reader.read_u32()?;
        let deleted_count = reader.read_u32()?;
        let bytes = reader.read_bytes()?;
        reader.expect_checksum(path)?;

        let mut bits = BitVec::from_bytes(&bytes);
        if bits.len() < doc_count as usize {
            return Err(IndexlibError::index_collapsed(format!(
                "deletion map [{path}] truncated"
            )));
        }
        bits.truncate(doc_count as usize);
        let map = DeletionMap {
            deleted_count: bits.iter().filter(|b| *b).count() as u32,
            bits,
        };
        if map.deleted_count != deleted_count {
            return Err(IndexlibError::index_collapsed(format!(
                "deletion map [{path}] count mismatch"
            )));
        }
        Ok(map)
    }

    pub fn load(storage: &dyn Storage, path: &str) -> Result<Self> {
        let data = storage.read_all(path)?;
        Self::from_bytes(&data, path)
    }

    pub fn store(&self, storage: &dyn Storage, path: &str) -> Result<()> {
        storage.write_all(path, &self.to_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete_and_count() {
        let mut map = DeletionMap::new(10);
        assert!(map.delete(5).unwrap());
        assert!(!map.delete(5).unwrap());
        assert!(map.is_deleted(5));
        assert!(!map.is_deleted(4));
        assert!(!map.is_deleted(100));
        assert_eq!(map.deleted_count(), 1);
        assert!(map.delete(10).unwrap_err().is_index_collapsed());
    }

    #[test]
    fn test_store_load_and_merge() {
        let storage = MemoryStorage::new_default();
        let mut own = DeletionMap::new(13);
        own.delete(0).unwrap();
        own.delete(12).unwrap();
        own.store(&storage, "segment_1/deletionmap/data_1").unwrap();

        let mut patch = DeletionMap::new(13);
        patch.delete(12).unwrap();
        patch.delete(7).unwrap();

        let mut loaded = DeletionMap::load(&storage, "segment_1/deletionmap/data_1").unwrap();
        assert_eq!(loaded, own);
        loaded.merge(&patch).unwrap();
        assert_eq!(loaded.deleted_docs().collect::<Vec<_>>(), vec![0, 7, 12]);
        assert_eq!(loaded.deleted_count(), 3);
    }

    #[test]
    fn test_grow() {
        let mut map = DeletionMap::new(2);
        map.grow(5);
        assert_eq!(map.doc_count(), 5);
        map.delete(4).unwrap();
        assert_eq!(map.deleted_count(), 1);
    }
}
