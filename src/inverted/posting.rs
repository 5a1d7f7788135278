//! Posting lists and their on-disk encoding.

use ahash::AHashMap;

use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, layout};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const DICTIONARY_MAGIC: u32 = 0x4944_5844; // "IDXD"
const POSTING_MAGIC: u32 = 0x4944_5850; // "IDXP"
const FORMAT_VERSION: u32 = 1;

/// A single posting in a posting list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    /// Occurrences of the term in the document.
    pub frequency: u32,
}

impl Posting {
    pub fn new(doc_id: DocId) -> Self {
        Posting {
            doc_id,
            frequency: 1,
        }
    }

    pub fn with_frequency(doc_id: DocId, frequency: u32) -> Self {
        Posting { doc_id, frequency }
    }
}

/// A posting list for a specific term, ordered by doc id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingList {
    pub term: String,
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn new(term: String) -> Self {
        PostingList {
            term,
            postings: Vec::new(),
        }
    }

    /// Add a posting, merging frequencies when the document is already present.
    pub fn add_posting(&mut self, posting: Posting) {
        match self
            .postings
            .binary_search_by_key(&posting.doc_id, |p| p.doc_id)
        {
            Ok(pos) => self.postings[pos].frequency += posting.frequency,
            Err(pos) => self.postings.insert(pos, posting),
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.postings.iter().map(|p| p.doc_id)
    }

    pub fn total_frequency(&self) -> u64 {
        self.postings.iter().map(|p| p.frequency as u64).sum()
    }

    fn encode(&self, writer: &mut StructWriter<Vec<u8>>) -> Result<()> {
        writer.write_varint(self.postings.len() as u64)?;
        let mut prev_doc_id = 0u32;
        for posting in &self.postings {
            writer.write_varint((posting.doc_id - prev_doc_id) as u64)?;
            writer.write_varint(posting.frequency as u64)?;
            prev_doc_id = posting.doc_id;
        }
        Ok(())
    }

    fn decode(term: String, reader: &mut StructReader<std::io::Cursor<&[u8]>>) -> Result<Self> {
        let count = reader.read_varint()? as usize;
        let mut postings = Vec::with_capacity(count.min(1 << 20));
        let mut prev_doc_id = 0u32;
        for idx in 0..count {
            let delta = reader.read_varint()?;
            let doc_id = (prev_doc_id as u64 + delta)
                .try_into()
                .ok()
                .filter(|&d| idx == 0 || d > prev_doc_id)
                .ok_or_else(|| {
                    IndexlibError::index_collapsed(format!("posting of term [{term}] not ascending"))
                })?;
            let frequency = reader.read_varint()? as u32;
            postings.push(Posting { doc_id, frequency });
            prev_doc_id = doc_id;
        }
        Ok(PostingList { term, postings })
    }
}

/// An in-memory index mapping terms to posting lists.
#[derive(Debug, Clone, Default)]
pub struct TermPostingIndex {
    terms: AHashMap<String, PostingList>,
    doc_count: u32,
}

impl TermPostingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_posting(&mut self, term: String, posting: Posting) {
        self.doc_count = self.doc_count.max(posting.doc_id + 1);
        self.terms
            .entry(term.clone())
            .or_insert_with(|| PostingList::new(term))
            .add_posting(posting);
    }

    pub fn insert_list(&mut self, list: PostingList) {
        if let Some(last) = list.postings.last() {
            self.doc_count = self.doc_count.max(last.doc_id + 1);
        }
        self.terms.insert(list.term.clone(), list);
    }

    pub fn get_posting_list(&self, term: &str) -> Option<&PostingList> {
        self.terms.get(term)
    }

    /// Doc id space covered: one past the largest doc id seen.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn set_doc_count(&mut self, doc_count: u32) {
        self.doc_count = self.doc_count.max(doc_count);
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Posting lists in term order.
    pub fn sorted_lists(&self) -> Vec<&PostingList> {
        let mut lists: Vec<_> = self.terms.values().collect();
        lists.sort_by(|a, b| a.term.cmp(&b.term));
        lists
    }

    pub fn into_lists(self) -> impl Iterator<Item = PostingList> {
        self.terms.into_values()
    }

    /// Encode as `(dictionary, posting)` file contents.
    pub fn to_files(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let lists = self.sorted_lists();

        let mut dictionary = StructWriter::in_memory();
        dictionary.write_u32(DICTIONARY_MAGIC)?;
        dictionary.write_u32(FORMAT_VERSION)?;
        dictionary.write_u32(self.doc_count)?;
        dictionary.write_varint(lists.len() as u64)?;

        let mut posting = StructWriter::in_memory();
        posting.write_u32(POSTING_MAGIC)?;
        for list in lists {
            dictionary.write_string(&list.term)?;
            dictionary.write_varint(list.len() as u64)?;
            list.encode(&mut posting)?;
        }
        Ok((dictionary.finish()?, posting.finish()?))
    }

    pub fn from_files(dictionary: &[u8], posting: &[u8], dir: &str) -> Result<Self> {
        let mut dict = StructReader::from_slice(dictionary);
        if dict.read_u32()? != DICTIONARY_MAGIC {
            return Err(IndexlibError::index_collapsed(format!("bad dictionary magic in [{dir}]")));
        }
        let version = dict.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(IndexlibError::unsupported(format!(
                "index format version [{version}] in [{dir}]"
            )));
        }
        let doc_count = dict.read_u32()?;
        let term_count = dict.read_varint()? as usize;

        let mut post = StructReader::from_slice(posting);
        if post.read_u32()? != POSTING_MAGIC {
            return Err(IndexlibError::index_collapsed(format!("bad posting magic in [{dir}]")));
        }

        let mut terms = AHashMap::with_capacity(term_count.min(1 << 20));
        for _ in 0..term_count {
            let term = dict.read_string()?;
            let doc_freq = dict.read_varint()? as usize;
            let list = PostingList::decode(term, &mut post)?;
            if list.len() != doc_freq || list.postings.last().is_some_and(|p| p.doc_id >= doc_count) {
                return Err(IndexlibError::index_collapsed(format!(
                    "posting of term [{}] in [{dir}] disagrees with dictionary",
                    list.term
                )));
            }
            terms.insert(list.term.clone(), list);
        }
        dict.expect_checksum(&format!("{dir}/{}", layout::DICTIONARY_FILE))?;
        post.expect_checksum(&format!("{dir}/{}", layout::POSTING_FILE))?;
        Ok(TermPostingIndex { terms, doc_count })
    }

    /// Write both files below the index directory `dir`.
    pub fn store(&self, storage: &dyn Storage, dir: &str) -> Result<()> {
        let (dictionary, posting) = self.to_files()?;
        storage.write_all(&format!("{dir}/{}", layout::DICTIONARY_FILE), &dictionary)?;
        storage.write_all(&format!("{dir}/{}", layout::POSTING_FILE), &posting)
    }

    pub fn load(storage: &dyn Storage, dir: &str) -> Result<Self> {
        let dictionary = storage.read_all(&format!("{dir}/{}", layout::DICTIONARY_FILE))?;
        let posting = storage.read_all(&format!("{dir}/{}", layout::POSTING_FILE))?;
        Self::from_files(&dictionary, &posting, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_posting_list_merges_frequencies() {
        let mut list = PostingList::new("rust".to_string());
        list.add_posting(Posting::new(5));
        list.add_posting(Posting::new(2));
        list.add_posting(Posting::with_frequency(5, 2));
        assert_eq!(list.doc_ids().collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(list.total_frequency(), 4);
    }

    #[test]
    fn test_store_and_load() {
        let storage = MemoryStorage::new_default();
        let mut index = TermPostingIndex::new();
        index.add_posting("b".to_string(), Posting::new(3));
        index.add_posting("a".to_string(), Posting::new(0));
        index.add_posting("a".to_string(), Posting::new(7));
        index.store(&storage, "segment_0/index/title").unwrap();

        let loaded = TermPostingIndex::load(&storage, "segment_0/index/title").unwrap();
        assert_eq!(loaded.doc_count(), 8);
        assert_eq!(loaded.term_count(), 2);
        let a = loaded.get_posting_list("a").unwrap();
        assert_eq!(a.doc_ids().collect::<Vec<_>>(), vec![0, 7]);
    }

    #[test]
    fn test_corrupt_posting_rejected() {
        let mut index = TermPostingIndex::new();
        index.add_posting("x".to_string(), Posting::new(1));
        let (dictionary, mut posting) = index.to_files().unwrap();
        let last = posting.len() - 5;
        posting[last] ^= 0x01;
        assert!(TermPostingIndex::from_files(&dictionary, &posting, "d").is_err());
    }
}
