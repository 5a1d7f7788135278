//! Inverted index merger: posting lists remapped to new doc ids.

use crate::config::IndexConfig;
use crate::error::{IndexlibError, Result};
use crate::index_base::{DocId, SegmentDirectory, layout};
use crate::inverted::posting::{Posting, TermPostingIndex};
use crate::inverted::reader::InvertedIndexReader;
use crate::merger::column_merger::{ColumnMerger, ParallelMergeItem, locate_part};
use crate::merger::merger_resource::MergerResource;
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct InvertedIndexMerger {
    config: IndexConfig,
}

impl InvertedIndexMerger {
    pub fn new(config: IndexConfig) -> Self {
        InvertedIndexMerger { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Postings of every source, remapped to new doc ids and restricted to
    /// `[begin, end)`.
    fn collect(&self, resource: &MergerResource, begin: DocId, end: DocId) -> Result<TermPostingIndex> {
        let dir = &resource.segment_directory;
        let map = &resource.reclaim_map;
        let mut merged = TermPostingIndex::new();
        for segment_id in map.segment_ids() {
            let doc_count = dir.segment_info(segment_id)?.doc_count;
            if doc_count == 0 {
                continue;
            }
            let reader = InvertedIndexReader::open(
                dir.storage().as_ref(),
                &dir.segment_root(segment_id),
                self.name(),
                doc_count,
            )?;
            for list in reader.posting_lists() {
                for posting in &list.postings {
                    let Some(new_id) = map.get_new_doc_id(segment_id, posting.doc_id) else {
                        continue;
                    };
                    if new_id >= begin && new_id < end {
                        merged.add_posting(
                            list.term.clone(),
                            Posting::with_frequency(new_id, posting.frequency),
                        );
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Split postings keyed by new doc id into one index per target.
    fn write_targets(
        &self,
        resource: &MergerResource,
        merged: TermPostingIndex,
        storage: &dyn Storage,
    ) -> Result<()> {
        let mut targets: Vec<TermPostingIndex> =
            resource.outputs.iter().map(|_| TermPostingIndex::new()).collect();
        for list in merged.into_lists() {
            for posting in list.postings {
                let (output, local) = resource.target_of(posting.doc_id)?;
                targets[output.target_index]
                    .add_posting(list.term.clone(), Posting::with_frequency(local, posting.frequency));
            }
        }
        for (output, mut index) in resource.outputs.iter().zip(targets) {
            index.set_doc_count(output.doc_count);
            index.store(storage, &layout::index_dir(&output.root, self.name()))?;
        }
        Ok(())
    }

    fn part_dir(&self, resource: &MergerResource, part_id: u32) -> String {
        format!("{}/part_{part_id}", resource.parallel_dir(&self.identifier()))
    }
}

impl ColumnMerger for InvertedIndexMerger {
    fn identifier(&self) -> String {
        format!("index/{}", self.name())
    }

    fn begin_merge(&self, segment_directory: &SegmentDirectory) -> Result<()> {
        let storage = segment_directory.storage();
        for segment_id in segment_directory.segment_ids() {
            if segment_directory.segment_info(segment_id)?.doc_count == 0 {
                continue;
            }
            let dir = layout::index_dir(&segment_directory.segment_root(segment_id), self.name());
            let dictionary = format!("{dir}/{}", layout::DICTIONARY_FILE);
            if !storage.file_exists(&dictionary) {
                return Err(IndexlibError::index_collapsed(format!(
                    "index dictionary [{dictionary}] missing"
                )));
            }
        }
        Ok(())
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64 {
        let storage = resource.segment_directory.storage();
        resource
            .segment_merge_infos
            .iter()
            .map(|info| {
                let dir = layout::index_dir(
                    &resource.segment_directory.segment_root(info.segment_id),
                    self.name(),
                );
                [layout::DICTIONARY_FILE, layout::POSTING_FILE]
                    .iter()
                    .map(|file| storage.file_size(&format!("{dir}/{file}")).unwrap_or(0) as i64)
                    .sum::<i64>()
            })
            .sum::<i64>()
            * 4
    }

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        let merged = self.collect(resource, 0, resource.reclaim_map.new_doc_count())?;
        self.write_targets(resource, merged, storage)
    }

    fn supports_parallel(&self) -> bool {
        true
    }

    fn merge_part(
        &self,
        resource: &MergerResource,
        item: &ParallelMergeItem,
        storage: &dyn Storage,
    ) -> Result<()> {
        let mut part = self.collect(resource, item.begin, item.end)?;
        part.set_doc_count(item.end);
        part.store(storage, &self.part_dir(resource, item.part_id))
    }

    fn end_parallel_merge(
        &self,
        resource: &MergerResource,
        total_parallel_count: u32,
        instance_roots: &[String],
        source: &dyn Storage,
        dest: &dyn Storage,
    ) -> Result<()> {
        let mut merged = TermPostingIndex::new();
        for part_id in 0..total_parallel_count {
            let rel = format!("{}/{}", self.part_dir(resource, part_id), layout::DICTIONARY_FILE);
            let dictionary = locate_part(source, instance_roots, &rel)?;
            let dir = dictionary
                .strip_suffix(&format!("/{}", layout::DICTIONARY_FILE))
                .unwrap_or(&dictionary)
                .to_string();
            let part = TermPostingIndex::load(source, &dir)?;
            for list in part.into_lists() {
                for posting in list.postings {
                    merged.add_posting(list.term.clone(), posting);
                }
            }
        }
        self.write_targets(resource, merged, dest)
    }
}
