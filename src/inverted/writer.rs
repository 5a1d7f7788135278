//! Building an inverted index from documents.

use crate::config::{IndexConfig, IndexType};
use crate::document::{Document, FieldValue};
use crate::error::Result;
use crate::index_base::{DocId, layout};
use crate::inverted::posting::{Posting, TermPostingIndex};
use crate::storage::Storage;

/// Terms of a field value under an index type.
pub fn tokenize(index_type: IndexType, value: &FieldValue) -> Vec<String> {
    let mut terms = Vec::new();
    for element in value.elements() {
        let Some(text) = element.as_term() else {
            continue;
        };
        match index_type {
            IndexType::Text => terms.extend(text.split_whitespace().map(str::to_lowercase)),
            IndexType::String | IndexType::Number => {
                if !text.is_empty() {
                    terms.push(text);
                }
            }
        }
    }
    terms
}

/// In-memory index of one segment being built.
#[derive(Debug, Clone)]
pub struct InvertedIndexWriter {
    config: IndexConfig,
    index: TermPostingIndex,
}

impl InvertedIndexWriter {
    pub fn new(config: IndexConfig) -> Self {
        InvertedIndexWriter {
            config,
            index: TermPostingIndex::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Index the configured fields of `doc` under local id `doc_id`.
    pub fn add_document(&mut self, doc_id: DocId, doc: &Document) {
        for field in &self.config.fields {
            if let Some(value) = doc.field(field) {
                for term in tokenize(self.config.index_type, value) {
                    self.index.add_posting(term, Posting::new(doc_id));
                }
            }
        }
        self.index.set_doc_count(doc_id + 1);
    }

    pub fn term_count(&self) -> usize {
        self.index.term_count()
    }

    /// Write `index/<name>/` below the segment root.
    pub fn dump(&self, storage: &dyn Storage, root: &str, doc_count: u32) -> Result<()> {
        let mut index = self.index.clone();
        index.set_doc_count(doc_count);
        index.store(storage, &layout::index_dir(root, &self.config.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inverted::reader::InvertedIndexReader;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_tokenize() {
        let text = FieldValue::from("Hello  Rust world");
        assert_eq!(tokenize(IndexType::Text, &text), vec!["hello", "rust", "world"]);
        assert_eq!(tokenize(IndexType::String, &text), vec!["Hello  Rust world"]);
        let numbers = FieldValue::from(vec![3i64, 14]);
        assert_eq!(tokenize(IndexType::Number, &numbers), vec!["3", "14"]);
    }

    #[test]
    fn test_dump_and_read() {
        let config = IndexConfig {
            name: "title".to_string(),
            fields: vec!["title".to_string()],
            index_type: IndexType::Text,
        };
        let mut writer = InvertedIndexWriter::new(config);
        writer.add_document(0, &Document::add(1).with_field("title", "red apple"));
        writer.add_document(1, &Document::add(1));
        writer.add_document(2, &Document::add(1).with_field("title", "Apple pie"));

        let storage = MemoryStorage::new_default();
        writer.dump(&storage, "segment_0", 3).unwrap();
        let reader = InvertedIndexReader::open(&storage, "segment_0", "title", 3).unwrap();
        assert_eq!(reader.lookup("apple"), vec![0, 2]);
        assert!(reader.lookup("banana").is_empty());
    }
}
