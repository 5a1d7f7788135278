//! File naming of the on-disk layout.
//!
//! ```text
//! version.<id>
//! segment_<id>/segment_info
//! segment_<id>/deletionmap/data_<dst>
//! segment_<id>/attribute/<name>/{data,offset}
//! segment_<id>/attribute/<name>/<src>_<dst>.patch
//! segment_<id>/index/<name>/{dictionary,posting}
//! segment_<id>/index/<pk>/data
//! segment_<id>/operation_log/data
//! segment_<id>/sub_segment/...
//! ```

use crate::index_base::{SegmentId, VersionId};

pub const VERSION_FILE_PREFIX: &str = "version.";
pub const SEGMENT_DIR_PREFIX: &str = "segment_";
pub const SEGMENT_INFO_FILE: &str = "segment_info";
pub const DELETION_MAP_DIR: &str = "deletionmap";
pub const ATTRIBUTE_DIR: &str = "attribute";
pub const INDEX_DIR: &str = "index";
pub const OPERATION_LOG_DIR: &str = "operation_log";
pub const SUB_SEGMENT_DIR: &str = "sub_segment";
pub const DATA_FILE: &str = "data";
pub const OFFSET_FILE: &str = "offset";
pub const DICTIONARY_FILE: &str = "dictionary";
pub const POSTING_FILE: &str = "posting";
pub const PATCH_FILE_SUFFIX: &str = ".patch";

/// Join-attribute names used by tables with sub documents.
pub const MAIN_JOIN_ATTRIBUTE: &str = "main_docid_to_sub_docid";
pub const SUB_JOIN_ATTRIBUTE: &str = "sub_docid_to_main_docid";

pub fn version_file_name(version_id: VersionId) -> String {
    format!("{VERSION_FILE_PREFIX}{version_id}")
}

pub fn parse_version_file_name(name: &str) -> Option<VersionId> {
    name.strip_prefix(VERSION_FILE_PREFIX)?.parse().ok()
}

pub fn segment_dir_name(segment_id: SegmentId) -> String {
    format!("{SEGMENT_DIR_PREFIX}{segment_id}")
}

/// Segment id from the first path component, e.g. `segment_3/segment_info`.
pub fn parse_segment_dir(path: &str) -> Option<SegmentId> {
    let first = path.split('/').next()?;
    first.strip_prefix(SEGMENT_DIR_PREFIX)?.parse().ok()
}

/// Root of a segment's main or sub table.
pub fn segment_root(segment_id: SegmentId, sub: bool) -> String {
    if sub {
        format!("{}/{SUB_SEGMENT_DIR}", segment_dir_name(segment_id))
    } else {
        segment_dir_name(segment_id)
    }
}

pub fn segment_info_path(root: &str) -> String {
    format!("{root}/{SEGMENT_INFO_FILE}")
}

/// Deletion map that the segment at `root` holds for `dst`.
pub fn deletion_map_path(root: &str, dst: SegmentId) -> String {
    format!("{root}/{DELETION_MAP_DIR}/data_{dst}")
}

pub fn parse_deletion_map_file(file_name: &str) -> Option<SegmentId> {
    file_name.strip_prefix("data_")?.parse().ok()
}

pub fn attribute_dir(root: &str, name: &str) -> String {
    format!("{root}/{ATTRIBUTE_DIR}/{name}")
}

pub fn attribute_data_path(root: &str, name: &str) -> String {
    format!("{}/{DATA_FILE}", attribute_dir(root, name))
}

pub fn attribute_offset_path(root: &str, name: &str) -> String {
    format!("{}/{OFFSET_FILE}", attribute_dir(root, name))
}

pub fn patch_file_name(src: SegmentId, dst: SegmentId) -> String {
    format!("{src}_{dst}{PATCH_FILE_SUFFIX}")
}

/// `(src, dst)` of a patch file name.
pub fn parse_patch_file_name(file_name: &str) -> Option<(SegmentId, SegmentId)> {
    let stem = file_name.strip_suffix(PATCH_FILE_SUFFIX)?;
    let (src, dst) = stem.split_once('_')?;
    Some((src.parse().ok()?, dst.parse().ok()?))
}

pub fn attribute_patch_path(root: &str, name: &str, src: SegmentId, dst: SegmentId) -> String {
    format!("{}/{}", attribute_dir(root, name), patch_file_name(src, dst))
}

pub fn index_dir(root: &str, name: &str) -> String {
    format!("{root}/{INDEX_DIR}/{name}")
}

pub fn operation_log_path(root: &str) -> String {
    format!("{root}/{OPERATION_LOG_DIR}/{DATA_FILE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        assert_eq!(parse_version_file_name(&version_file_name(12)), Some(12));
        assert_eq!(parse_version_file_name("version.x"), None);
        assert_eq!(parse_segment_dir("segment_7/attribute/price/data"), Some(7));
        assert_eq!(parse_segment_dir("merge_meta/plan"), None);
        assert_eq!(parse_patch_file_name(&patch_file_name(5, 2)), Some((5, 2)));
        assert_eq!(parse_patch_file_name("data"), None);
        assert_eq!(parse_deletion_map_file("data_3"), Some(3));
    }

    #[test]
    fn test_paths() {
        assert_eq!(segment_root(4, true), "segment_4/sub_segment");
        assert_eq!(
            attribute_patch_path("segment_9", "price", 9, 2),
            "segment_9/attribute/price/9_2.patch"
        );
        assert_eq!(deletion_map_path("segment_9", 2), "segment_9/deletionmap/data_2");
        assert_eq!(index_dir("segment_1", "title"), "segment_1/index/title");
    }
}
