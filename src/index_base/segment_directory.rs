//! Read-only view of the segments of one version.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::error::{IndexlibError, Result};
use crate::index_base::deletion_map::DeletionMap;
use crate::index_base::segment_info::SegmentInfo;
use crate::index_base::version::Version;
use crate::index_base::{DocId, SegmentId, layout};
use crate::storage::Storage;

/// Segment metadata of a version, for either the main or the sub table.
///
/// Global doc ids of the view are assigned by concatenating segments in
/// ascending id order.
#[derive(Debug, Clone)]
pub struct SegmentDirectory {
    storage: Arc<dyn Storage>,
    version: Version,
    infos: BTreeMap<SegmentId, SegmentInfo>,
    base_doc_ids: Vec<(SegmentId, DocId)>,
    sub: bool,
}

impl SegmentDirectory {
    /// Open the main-table view of `version`.
    pub fn open(storage: Arc<dyn Storage>, version: Version) -> Result<Self> {
        Self::open_table(storage, version, false)
    }

    fn open_table(storage: Arc<dyn Storage>, version: Version, sub: bool) -> Result<Self> {
        let mut infos = BTreeMap::new();
        for &segment_id in &version.segments {
            let root = layout::segment_root(segment_id, sub);
            let info = SegmentInfo::load(storage.as_ref(), &root).map_err(|e| {
                IndexlibError::index_collapsed(format!(
                    "segment [{segment_id}] of version [{}] unreadable: {e}",
                    version.version_id
                ))
            })?;
            infos.insert(segment_id, info);
        }

        let mut base_doc_ids = Vec::with_capacity(infos.len());
        let mut base = 0u32;
        for (&segment_id, info) in &infos {
            base_doc_ids.push((segment_id, base));
            base = base.checked_add(info.doc_count).ok_or_else(|| {
                IndexlibError::out_of_range("total doc count exceeds doc id space")
            })?;
        }
        debug!(
            "opened {} segment directory of version [{}]: {} docs",
            if sub { "sub" } else { "main" },
            version.version_id,
            base
        );

        Ok(SegmentDirectory {
            storage,
            version,
            infos,
            base_doc_ids,
            sub,
        })
    }

    /// The sub-table view of the same version.
    pub fn sub_directory(&self) -> Result<SegmentDirectory> {
        Self::open_table(self.storage.clone(), self.version.clone(), true)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_sub(&self) -> bool {
        self.sub
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.infos.keys().copied()
    }

    pub fn contains(&self, segment_id: SegmentId) -> bool {
        self.infos.contains_key(&segment_id)
    }

    pub fn segment_info(&self, segment_id: SegmentId) -> Result<&SegmentInfo> {
        self.infos.get(&segment_id).ok_or_else(|| {
            IndexlibError::not_found(format!(
                "segment [{segment_id}] not in version [{}]",
                self.version.version_id
            ))
        })
    }

    /// Directory holding this table's files of `segment_id`.
    pub fn segment_root(&self, segment_id: SegmentId) -> String {
        layout::segment_root(segment_id, self.sub)
    }

    pub fn base_doc_ids(&self) -> &[(SegmentId, DocId)] {
        &self.base_doc_ids
    }

    pub fn base_doc_id(&self, segment_id: SegmentId) -> Option<DocId> {
        self.base_doc_ids
            .binary_search_by_key(&segment_id, |&(s, _)| s)
            .ok()
            .map(|idx| self.base_doc_ids[idx].1)
    }

    pub fn total_doc_count(&self) -> u32 {
        self.infos.values().map(|i| i.doc_count).sum()
    }

    /// Segment and local id of a global doc id.
    pub fn locate(&self, global: DocId) -> Option<(SegmentId, DocId)> {
        let idx = self
            .base_doc_ids
            .partition_point(|&(_, base)| base <= global)
            .checked_sub(1)?;
        let (segment_id, base) = self.base_doc_ids[idx];
        let local = global - base;
        let doc_count = self.infos.get(&segment_id)?.doc_count;
        (local < doc_count).then_some((segment_id, local))
    }

    /// Effective deletion map of a segment: its own deletions plus every
    /// deletion patch other segments of the version hold for it.
    pub fn load_deletion_map(&self, segment_id: SegmentId) -> Result<DeletionMap> {
        let doc_count = self.segment_info(segment_id)?.doc_count;
        let mut map = DeletionMap::new(doc_count);
        for src in self.segment_ids() {
            let path = layout::deletion_map_path(&self.segment_root(src), segment_id);
            if self.storage.file_exists(&path) {
                let patch = DeletionMap::load(self.storage.as_ref(), &path)?;
                map.merge(&patch)?;
            }
        }
        Ok(map)
    }

    pub fn load_deletion_maps(&self) -> Result<BTreeMap<SegmentId, DeletionMap>> {
        self.segment_ids()
            .map(|segment_id| Ok((segment_id, self.load_deletion_map(segment_id)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn setup() -> SegmentDirectory {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut version = Version::new(0);
        for (segment_id, doc_count) in [(1u32, 10u32), (2, 5), (4, 7)] {
            SegmentInfo::new(doc_count, segment_id as i64)
                .store(storage.as_ref(), &layout::segment_root(segment_id, false))
                .unwrap();
            version.add_segment(segment_id);
        }

        let mut own = DeletionMap::new(5);
        own.delete(1).unwrap();
        own.store(storage.as_ref(), "segment_2/deletionmap/data_2").unwrap();
        let mut patch = DeletionMap::new(5);
        patch.delete(3).unwrap();
        patch.store(storage.as_ref(), "segment_4/deletionmap/data_2").unwrap();
        // A patch from a segment outside the version is ignored.
        let mut stray = DeletionMap::new(5);
        stray.delete(4).unwrap();
        stray.store(storage.as_ref(), "segment_9/deletionmap/data_2").unwrap();

        SegmentDirectory::open(storage, version).unwrap()
    }

    #[test]
    fn test_base_doc_ids_and_locate() {
        let dir = setup();
        assert_eq!(dir.base_doc_ids(), &[(1, 0), (2, 10), (4, 15)]);
        assert_eq!(dir.total_doc_count(), 22);
        assert_eq!(dir.locate(0), Some((1, 0)));
        assert_eq!(dir.locate(12), Some((2, 2)));
        assert_eq!(dir.locate(21), Some((4, 6)));
        assert_eq!(dir.locate(22), None);
    }

    #[test]
    fn test_effective_deletion_map() {
        let dir = setup();
        let map = dir.load_deletion_map(2).unwrap();
        assert_eq!(map.deleted_docs().collect::<Vec<_>>(), vec![1, 3]);
        assert!(dir.load_deletion_map(1).unwrap().is_empty());
    }

    #[test]
    fn test_missing_segment_is_collapsed() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut version = Version::new(0);
        version.add_segment(3);
        let err = SegmentDirectory::open(storage, version).unwrap_err();
        assert!(err.is_index_collapsed());
    }
}
