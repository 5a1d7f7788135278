use log::debug;

use crate::error::Result;
use crate::index_base::{DeletionMap, PatchFileFinder, layout};
use crate::merger::column_merger::ColumnMerger;
use crate::merger::merger_resource::MergerResource;
use crate::storage::Storage;

/// Writes an empty deletion map for every target, and moves deletions that
/// the plan's segments recorded against surviving segments into the plan's
/// first target.
#[derive(Debug, Clone, Default)]
pub struct DeletionMapMerger;

impl DeletionMapMerger {
    pub fn new() -> Self {
        DeletionMapMerger
    }
}

impl ColumnMerger for DeletionMapMerger {
    fn identifier(&self) -> String {
        "deletion_map".to_string()
    }

    fn estimate_memory_use(&self, resource: &MergerResource) -> i64 {
        resource.segment_directory.total_doc_count() as i64 / 8 + 1
    }

    fn merge(&self, resource: &MergerResource, storage: &dyn Storage) -> Result<()> {
        for output in &resource.outputs {
            DeletionMap::new(output.doc_count).store(
                storage,
                &layout::deletion_map_path(&output.root, output.segment_id),
            )?;
        }

        let dir = &resource.segment_directory;
        let patches = PatchFileFinder::new(dir).find_deletion_map_patches()?;
        for (dst, infos) in patches {
            if !resource.survives(dst) {
                continue;
            }
            let mut carried = DeletionMap::new(dir.segment_info(dst)?.doc_count);
            let mut found = false;
            for info in infos
                .iter()
                .filter(|p| resource.merges(p.src_segment))
            {
                carried.merge(&DeletionMap::load(dir.storage().as_ref(), &info.path)?)?;
                found = true;
            }
            if !found {
                continue;
            }
            let output = resource.first_output()?;
            debug!(
                "carrying [{}] deletions for segment [{dst}] into segment [{}]",
                carried.deleted_count(),
                output.segment_id
            );
            carried.store(storage, &layout::deletion_map_path(&output.root, dst))?;
        }
        Ok(())
    }
}
