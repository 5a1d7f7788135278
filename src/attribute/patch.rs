//! Attribute patch files.
//!
//! A patch file holds the updates one segment recorded for documents of
//! another: an entry count, then `(doc id, value)` pairs in ascending doc-id
//! order, with the usual checksum trailer.

use std::collections::BTreeMap;

use crate::error::{IndexlibError, Result};
use crate::index_base::DocId;
use crate::index_base::patch_file_finder::PatchFileInfo;
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

/// Collects updates for one destination segment; the last update of a
/// document wins.
#[derive(Debug, Clone, Default)]
pub struct AttributePatchWriter {
    entries: BTreeMap<DocId, Vec<u8>>,
}

impl AttributePatchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, doc_id: DocId, value: Vec<u8>) {
        self.entries.insert(doc_id, value);
    }

    pub fn get(&self, doc_id: DocId) -> Option<&[u8]> {
        self.entries.get(&doc_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = StructWriter::in_memory();
        writer.write_u32(self.entries.len() as u32)?;
        for (&doc_id, value) in &self.entries {
            writer.write_u32(doc_id)?;
            writer.write_bytes(value)?;
        }
        writer.finish()
    }

    pub fn store(&self, storage: &dyn Storage, path: &str) -> Result<()> {
        storage.write_all(path, &self.to_bytes()?)
    }
}

/// The entries of one patch file, consumed in doc-id order.
#[derive(Debug, Clone)]
pub struct AttributePatchReader {
    entries: std::vec::IntoIter<(DocId, Vec<u8>)>,
    peeked: Option<(DocId, Vec<u8>)>,
}

impl AttributePatchReader {
    /// Load and validate a patch for a destination of `dst_doc_count` docs.
    pub fn open(storage: &dyn Storage, info: &PatchFileInfo, dst_doc_count: u32) -> Result<Self> {
        let data = storage.read_all(&info.path)?;
        Self::from_bytes(&data, &info.path, dst_doc_count)
    }

    pub fn from_bytes(data: &[u8], path: &str, dst_doc_count: u32) -> Result<Self> {
        let mut reader = StructReader::from_slice(data);
        let count = reader.read_u32()?;
        let mut entries = Vec::with_capacity((count as usize).min(data.len()));
        let mut last: Option<DocId> = None;
        for _ in 0..count {
            let doc_id = reader.read_u32()?;
            let value = reader.read_bytes()?;
            if doc_id >= dst_doc_count {
                return Err(IndexlibError::index_collapsed(format!(
                    "patch [{path}] updates doc [{doc_id}] of a segment with [{dst_doc_count}] docs"
                )));
            }
            if last.is_some_and(|prev| prev >= doc_id) {
                return Err(IndexlibError::index_collapsed(format!(
                    "patch [{path}] doc ids not ascending at [{doc_id}]"
                )));
            }
            last = Some(doc_id);
            entries.push((doc_id, value));
        }
        reader.expect_checksum(path)?;

        let mut entries = entries.into_iter();
        let peeked = entries.next();
        Ok(AttributePatchReader { entries, peeked })
    }

    pub fn peek_doc_id(&self) -> Option<DocId> {
        self.peeked.as_ref().map(|(doc_id, _)| *doc_id)
    }

    pub fn next_entry(&mut self) -> Option<(DocId, Vec<u8>)> {
        let current = self.peeked.take();
        self.peeked = self.entries.next();
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_update_wins_and_order() {
        let mut writer = AttributePatchWriter::new();
        writer.set(7, b"x".to_vec());
        writer.set(2, b"y".to_vec());
        writer.set(7, b"z".to_vec());
        assert_eq!(writer.len(), 2);

        let bytes = writer.to_bytes().unwrap();
        let mut reader = AttributePatchReader::from_bytes(&bytes, "p", 10).unwrap();
        assert_eq!(reader.peek_doc_id(), Some(2));
        assert_eq!(reader.next_entry(), Some((2, b"y".to_vec())));
        assert_eq!(reader.next_entry(), Some((7, b"z".to_vec())));
        assert_eq!(reader.next_entry(), None);
    }

    #[test]
    fn test_out_of_range_doc_is_collapsed() {
        let mut writer = AttributePatchWriter::new();
        writer.set(5, vec![1]);
        let bytes = writer.to_bytes().unwrap();
        let err = AttributePatchReader::from_bytes(&bytes, "p", 5).unwrap_err();
        assert!(err.is_index_collapsed());
    }

    #[test]
    fn test_checksum_verified() {
        let mut writer = AttributePatchWriter::new();
        writer.set(1, vec![9, 9]);
        let mut bytes = writer.to_bytes().unwrap();
        bytes[9] ^= 1;
        assert!(AttributePatchReader::from_bytes(&bytes, "p", 5).is_err());
    }
}
