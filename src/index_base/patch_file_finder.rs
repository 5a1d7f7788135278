//! Discovery of patch files within a version.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::index_base::segment_directory::SegmentDirectory;
use crate::index_base::{SegmentId, layout};

/// One patch file: updates that segment `src_segment` recorded for `dst_segment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFileInfo {
    pub src_segment: SegmentId,
    pub dst_segment: SegmentId,

    /// Timestamp of the source segment; patches apply in this order.
    pub src_timestamp: i64,

    pub path: String,
}

/// Patch files grouped by destination segment, each list in apply order.
pub type PatchInfos = BTreeMap<SegmentId, Vec<PatchFileInfo>>;

/// Locates attribute and deletion-map patch files of the segments in a version.
///
/// Files whose source or destination is not part of the version are
/// ignored; every list is ordered by (source timestamp, source id) so that a
/// newer patch is applied after an older one.
#[derive(Debug)]
pub struct PatchFileFinder<'a> {
    segment_directory: &'a SegmentDirectory,
}

impl<'a> PatchFileFinder<'a> {
    pub fn new(segment_directory: &'a SegmentDirectory) -> Self {
        PatchFileFinder { segment_directory }
    }

    /// Patch files of attribute `name` (in this directory's table).
    pub fn find_attribute_patches(&self, name: &str) -> Result<PatchInfos> {
        let dir = self.segment_directory;
        let mut infos = PatchInfos::new();
        for src in dir.segment_ids() {
            let attr_dir = format!("{}/", layout::attribute_dir(&dir.segment_root(src), name));
            for path in dir.storage().list_files_with_prefix(&attr_dir)? {
                let Some(file_name) = path.strip_prefix(&attr_dir) else {
                    continue;
                };
                let Some((file_src, dst)) = layout::parse_patch_file_name(file_name) else {
                    continue;
                };
                if file_src != src || dst == src || !dir.contains(dst) {
                    continue;
                }
                infos.entry(dst).or_default().push(PatchFileInfo {
                    src_segment: src,
                    dst_segment: dst,
                    src_timestamp: dir.segment_info(src)?.timestamp,
                    path,
                });
            }
        }
        Self::sort(&mut infos);
        Ok(infos)
    }

    /// Deletion-map patch files, excluding each segment's own map.
    pub fn find_deletion_map_patches(&self) -> Result<PatchInfos> {
        let dir = self.segment_directory;
        let mut infos = PatchInfos::new();
        for src in dir.segment_ids() {
            let del_dir = format!("{}/{}/", dir.segment_root(src), layout::DELETION_MAP_DIR);
            for path in dir.storage().list_files_with_prefix(&del_dir)? {
                let Some(dst) = path
                    .strip_prefix(&del_dir)
                    .and_then(layout::parse_deletion_map_file)
                else {
                    continue;
                };
                if dst == src || !dir.contains(dst) {
                    continue;
                }
                infos.entry(dst).or_default().push(PatchFileInfo {
                    src_segment: src,
                    dst_segment: dst,
                    src_timestamp: dir.segment_info(src)?.timestamp,
                    path,
                });
            }
        }
        Self::sort(&mut infos);
        Ok(infos)
    }

    fn sort(infos: &mut PatchInfos) {
        for list in infos.values_mut() {
            list.sort_by_key(|p| (p.src_timestamp, p.src_segment));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_base::segment_info::SegmentInfo;
    use crate::index_base::version::Version;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;
    use std::sync::Arc;

    #[test]
    fn test_find_orders_by_source_timestamp() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut version = Version::new(0);
        // Segment 5 was built before segment 4 in wall-clock terms.
        for (segment_id, ts) in [(1u32, 10i64), (4, 40), (5, 30)] {
            SegmentInfo::new(3, ts)
                .store(storage.as_ref(), &layout::segment_root(segment_id, false))
                .unwrap();
            version.add_segment(segment_id);
        }
        for (src, dst) in [(4u32, 1u32), (5, 1), (5, 4), (4, 9)] {
            let path = layout::attribute_patch_path(
                &layout::segment_root(src, false),
                "price",
                src,
                dst,
            );
            storage.write_all(&path, b"p").unwrap();
        }
        storage
            .write_all("segment_4/attribute/price/data", b"not a patch")
            .unwrap();

        let dir = SegmentDirectory::open(storage, version).unwrap();
        let infos = PatchFileFinder::new(&dir).find_attribute_patches("price").unwrap();

        assert_eq!(infos.len(), 2);
        let to_one: Vec<_> = infos[&1].iter().map(|p| p.src_segment).collect();
        assert_eq!(to_one, vec![5, 4]);
        assert_eq!(infos[&4][0].path, "segment_5/attribute/price/5_4.patch");
        assert!(!infos.contains_key(&9));
    }
}
