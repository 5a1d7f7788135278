//! Reading the inverted index of one segment.

use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, layout};
use crate::inverted::posting::{PostingList, TermPostingIndex};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct InvertedIndexReader {
    name: String,
    index: TermPostingIndex,
}

impl InvertedIndexReader {
    /// Load `index/<name>/` of the segment at `root`, which holds `doc_count` docs.
    pub fn open(storage: &dyn Storage, root: &str, name: &str, doc_count: u32) -> Result<Self> {
        let index = TermPostingIndex::load(storage, &layout::index_dir(root, name))?;
        if index.doc_count() > doc_count {
            return Err(IndexlibError::index_collapsed(format!(
                "index [{name}] of [{root}] covers [{}] docs, segment has [{doc_count}]",
                index.doc_count()
            )));
        }
        Ok(InvertedIndexReader {
            name: name.to_string(),
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn posting_list(&self, term: &str) -> Option<&PostingList> {
        self.index.get_posting_list(term)
    }

    /// Local doc ids containing `term`, ascending.
    pub fn lookup(&self, term: &str) -> Vec<DocId> {
        self.posting_list(term)
            .map(|list| list.doc_ids().collect())
            .unwrap_or_default()
    }

    pub fn term_count(&self) -> usize {
        self.index.term_count()
    }

    /// All posting lists, in term order.
    pub fn posting_lists(&self) -> Vec<&PostingList> {
        self.index.sorted_lists()
    }
}
