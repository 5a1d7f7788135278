//! Primary-key index: a sorted `(key hash, local doc id)` table per segment.

use crate::config::PkHashType;
use crate::document::PkHash;
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, layout};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryKeyIndex {
    hash_type: PkHashType,
    entries: Vec<(PkHash, DocId)>,
}

impl PrimaryKeyIndex {
    /// Build from unsorted entries. For a repeated key the largest doc id is kept.
    pub fn from_entries(hash_type: PkHashType, mut entries: Vec<(PkHash, DocId)>) -> Self {
        entries.sort_unstable();
        let mut deduped: Vec<(PkHash, DocId)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match deduped.last_mut() {
                Some(last) if last.0 == entry.0 => *last = entry,
                _ => deduped.push(entry),
            }
        }
        PrimaryKeyIndex {
            hash_type,
            entries: deduped,
        }
    }

    pub fn hash_type(&self) -> PkHashType {
        self.hash_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(PkHash, DocId)] {
        &self.entries
    }

    pub fn lookup(&self, hash: PkHash) -> Option<DocId> {
        self.entries
            .binary_search_by_key(&hash, |&(h, _)| h)
            .ok()
            .map(|idx| self.entries[idx].1)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u8(self.hash_type.byte_width() as u8)?;
        writer.write_u32(self.entries.len() as u32)?;
        for &(hash, doc_id) in &self.entries {
            match self.hash_type {
                PkHashType::Hash64 => writer.write_u64(hash as u64)?,
                PkHashType::Hash128 => writer.write_u128(hash)?,
            }
            writer.write_u32(doc_id)?;
        }
        writer.finish()
    }

    pub fn from_bytes(data: &[u8], path: &str, doc_count: u32) -> Result<Self> {
        let mut reader = StructReader::from_slice(data);
        let hash_type = match reader.read_u8()? {
            8 => PkHashType::Hash64,
            16 => PkHashType::Hash128,
            other => {
                return Err(IndexlibError::index_collapsed(format!(
                    "primary key [{path}] has hash width [{other}]"
                )));
            }
        };
        let count = reader.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(data.len()));
        for _ in 0..count {
            let hash = match hash_type {
                PkHashType::Hash64 => reader.read_u64()? as u128,
                PkHashType::Hash128 => reader.read_u128()?,
            };
            let doc_id = reader.read_u32()?;
            if doc_id >= doc_count {
                return Err(IndexlibError::index_collapsed(format!(
                    "primary key [{path}] points at doc [{doc_id}] of [{doc_count}]"
                )));
            }
            if entries.last().is_some_and(|&(prev, _)| prev >= hash) {
                return Err(IndexlibError::index_collapsed(format!(
                    "primary key [{path}] not sorted"
                )));
            }
            entries.push((hash, doc_id));
        }
        reader.expect_checksum(path)?;
        Ok(PrimaryKeyIndex { hash_type, entries })
    }

    /// Path of the table below a segment root.
    pub fn path(root: &str, index_name: &str) -> String {
        format!("{}/{}", layout::index_dir(root, index_name), layout::DATA_FILE)
    }

    pub fn store(&self, storage: &dyn Storage, root: &str, index_name: &str) -> Result<()> {
        storage.write_all(&Self::path(root, index_name), &self.to_bytes()?)
    }

    pub fn load(storage: &dyn Storage, root: &str, index_name: &str, doc_count: u32) -> Result<Self> {
        let path = Self::path(root, index_name);
        let data = storage.read_all(&path)?;
        Self::from_bytes(&data, &path, doc_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_lookup_and_dedup() {
        let index = PrimaryKeyIndex::from_entries(
            PkHashType::Hash64,
            vec![(30, 0), (10, 1), (30, 4), (20, 2)],
        );
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(30), Some(4));
        assert_eq!(index.lookup(11), None);
    }

    #[test]
    fn test_store_load_128() {
        let storage = MemoryStorage::new_default();
        let index =
            PrimaryKeyIndex::from_entries(PkHashType::Hash128, vec![(u128::MAX - 1, 2), (7, 0)]);
        index.store(&storage, "segment_3", "pk").unwrap();
        assert!(storage.file_exists("segment_3/index/pk/data"));

        let loaded = PrimaryKeyIndex::load(&storage, "segment_3", "pk", 3).unwrap();
        assert_eq!(loaded, index);
        let err = PrimaryKeyIndex::load(&storage, "segment_3", "pk", 2).unwrap_err();
        assert!(err.is_index_collapsed());
    }
}
