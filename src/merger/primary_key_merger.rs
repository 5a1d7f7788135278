use crate::config::PrimaryKeyConfig;
use crate::error::Result;
use crate::inverted::primary_key::PrimaryKeyIndex;
use crate::merger::column_merger::ColumnMerger;
use crate::merger::merger_resource::MergerResource;
use crate::storage::Storage;

/// Rebuilds the primary-key table of every target from the surviving
/// documents of the plan.
#[derive(Debug, Clone)]
pub struct PrimaryKeyMerger {
    config: PrimaryKeyConfig,
}

impl PrimaryKeyMerger {
    pub fn new(config: PrimaryKeyConfig) -> Self {
        PrimaryKeyMerger { config }
    }
}

impl ColumnMerger for PrimaryKeyMerger {
    fn identifier(&self) -> String {
        format!("primary_key/{}", self.config.index_name)
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64 {
        // one (u128, u32) entry per document, read and written
        resource
            .segment_merge_infos
            .iter()
            .map(|info| info.doc_count as i64)
            .sum::<i64>()
            * 2
            * 20
    }

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        let dir = &resource.segment_directory;
        let map = &resource.reclaim_map;
        let mut entries: Vec<Vec<_>> = resource.outputs.iter().map(|_| Vec::new()).collect();
        for segment_id in map.segment_ids() {
            let doc_count = dir.segment_info(segment_id)?.doc_count;
            if doc_count == 0 {
                continue;
            }
            let index = PrimaryKeyIndex::load(
                dir.storage().as_ref(),
                &dir.segment_root(segment_id),
                &self.config.index_name,
                doc_count,
            )?;
            for &(hash, local) in index.entries() {
                if let Some(new_id) = map.get_new_doc_id(segment_id, local) {
                    let (output, target_local) = resource.target_of(new_id)?;
                    entries[output.target_index].push((hash, target_local));
                }
            }
        }
        for (output, target_entries) in resource.outputs.iter().zip(entries) {
            PrimaryKeyIndex::from_entries(self.config.hash_type, target_entries).store(
                storage,
                &output.root,
                &self.config.index_name,
            )?;
        }
        Ok(())
    }
}
