//! Versions: committed, immutable sets of segments.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index_base::{SegmentId, VersionId, layout};
use crate::storage::Storage;
use crate::util::retry::{RetryPolicy, do_with_retry};

/// Opaque upstream read position (source id and offset within it).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Locator {
    pub src: u64,
    pub offset: i64,
}

impl Locator {
    pub fn new(src: u64, offset: i64) -> Self {
        Locator { src, offset }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.src, self.offset)
    }
}

/// How segments are distributed over levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelTopology {
    /// Levels are ordered by age, newest segments on level 0.
    #[default]
    Sequence,
    /// Each level is sharded by key hash modulo the shard count.
    HashMod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelMeta {
    pub level_idx: u32,

    /// Round-robin position used to pick the next target on this level.
    pub cursor: u32,

    pub segments: Vec<SegmentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub topology: LevelTopology,
    pub levels: Vec<LevelMeta>,
}

impl Default for LevelInfo {
    fn default() -> Self {
        LevelInfo::new(LevelTopology::Sequence, 1)
    }
}

impl LevelInfo {
    pub fn new(topology: LevelTopology, level_num: u32) -> Self {
        LevelInfo {
            topology,
            levels: (0..level_num.max(1))
                .map(|level_idx| LevelMeta {
                    level_idx,
                    ..Default::default()
                })
                .collect(),
        }
    }

    pub fn bottom_level_idx(&self) -> u32 {
        self.levels.len().saturating_sub(1) as u32
    }

    pub fn level_of(&self, segment_id: SegmentId) -> Option<u32> {
        self.levels
            .iter()
            .find(|l| l.segments.contains(&segment_id))
            .map(|l| l.level_idx)
    }

    pub fn add_segment(&mut self, level_idx: u32, segment_id: SegmentId) {
        while self.levels.len() <= level_idx as usize {
            let next = self.levels.len() as u32;
            self.levels.push(LevelMeta {
                level_idx: next,
                ..Default::default()
            });
        }
        let level = &mut self.levels[level_idx as usize];
        if !level.segments.contains(&segment_id) {
            level.segments.push(segment_id);
            level.segments.sort_unstable();
        }
    }

    pub fn remove_segment(&mut self, segment_id: SegmentId) {
        for level in &mut self.levels {
            level.segments.retain(|&s| s != segment_id);
        }
    }

    /// Advance the round-robin cursor of a level, returning the old value.
    pub fn advance_cursor(&mut self, level_idx: u32) -> u32 {
        match self.levels.get_mut(level_idx as usize) {
            Some(level) => {
                let cursor = level.cursor;
                level.cursor = level.cursor.wrapping_add(1);
                cursor
            }
            None => 0,
        }
    }
}

/// A committed set of segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,

    /// Segment ids, ascending.
    pub segments: Vec<SegmentId>,

    /// Largest document timestamp reflected by the segments.
    pub timestamp: i64,

    #[serde(default)]
    pub locator: Locator,

    #[serde(default)]
    pub level_info: LevelInfo,

    #[serde(default)]
    pub commit_time: Option<DateTime<Utc>>,
}

impl Default for Version {
    fn default() -> Self {
        Version::new(-1)
    }
}

impl Version {
    pub fn new(version_id: VersionId) -> Self {
        Version {
            version_id,
            segments: Vec::new(),
            timestamp: 0,
            locator: Locator::default(),
            level_info: LevelInfo::default(),
            commit_time: None,
        }
    }

    /// Whether this is the placeholder of an index with no commit yet.
    pub fn is_empty_index(&self) -> bool {
        self.version_id < 0
    }

    pub fn has_segment(&self, segment_id: SegmentId) -> bool {
        self.segments.binary_search(&segment_id).is_ok()
    }

    pub fn last_segment(&self) -> Option<SegmentId> {
        self.segments.last().copied()
    }

    /// Add a segment on level 0.
    pub fn add_segment(&mut self, segment_id: SegmentId) {
        self.add_segment_on_level(segment_id, 0);
    }

    pub fn add_segment_on_level(&mut self, segment_id: SegmentId, level_idx: u32) {
        if let Err(pos) = self.segments.binary_search(&segment_id) {
            self.segments.insert(pos, segment_id);
        }
        self.level_info.add_segment(level_idx, segment_id);
    }

    pub fn remove_segment(&mut self, segment_id: SegmentId) {
        self.segments.retain(|&s| s != segment_id);
        self.level_info.remove_segment(segment_id);
    }

    pub fn file_name(&self) -> String {
        layout::version_file_name(self.version_id)
    }

    pub fn load(storage: &dyn Storage, version_id: VersionId) -> Result<Self> {
        let name = layout::version_file_name(version_id);
        let bytes = storage.read_all(&name)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IndexlibError::index_collapsed(format!("bad [{name}]: {e}")))
    }

    /// Load a version that may not be visible yet.
    pub fn load_with_retry(
        storage: &dyn Storage,
        version_id: VersionId,
        policy: RetryPolicy,
    ) -> Result<Self> {
        do_with_retry(
            policy,
            || Self::load(storage, version_id),
            IndexlibError::is_not_found,
        )
    }

    /// All committed version ids, ascending.
    pub fn list_version_ids(storage: &dyn Storage) -> Result<Vec<VersionId>> {
        let mut ids: Vec<VersionId> = storage
            .list_files_with_prefix(layout::VERSION_FILE_PREFIX)?
            .iter()
            .filter_map(|name| layout::parse_version_file_name(name))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// The newest committed version, if any.
    pub fn load_latest(storage: &dyn Storage) -> Result<Option<Self>> {
        match Self::list_version_ids(storage)?.last() {
            Some(&id) => Ok(Some(Self::load(storage, id)?)),
            None => Ok(None),
        }
    }

    fn store(&self, storage: &dyn Storage) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let name = self.file_name();
        let temp = format!("{name}.tmp");
        storage.write_all(&temp, &json)?;
        storage.rename_file(&temp, &name)
    }
}

/// Writes versions and removes what no retained version references.
#[derive(Debug)]
pub struct VersionCommitter<'a> {
    storage: &'a dyn Storage,
    keep_version_count: usize,
}

impl<'a> VersionCommitter<'a> {
    pub fn new(storage: &'a dyn Storage, keep_version_count: usize) -> Self {
        VersionCommitter {
            storage,
            keep_version_count: keep_version_count.max(1),
        }
    }

    /// Stamp and store `version`, then clean up.
    ///
    /// The version file is written last, so a reader either sees the complete
    /// new version or the previous one.
    pub fn commit(&self, version: &mut Version) -> Result<()> {
        version.commit_time = Some(Utc::now());
        version.store(self.storage)?;
        info!(
            "committed version [{}] with segments {:?}",
            version.version_id, version.segments
        );
        self.cleanup()
    }

    /// Delete old versions and segments no retained version references.
    pub fn cleanup(&self) -> Result<()> {
        let ids = Version::list_version_ids(self.storage)?;
        if ids.is_empty() {
            return Ok(());
        }
        let split = ids.len().saturating_sub(self.keep_version_count);
        let (expired, kept) = ids.split_at(split);

        let mut referenced = BTreeSet::new();
        for &id in kept {
            referenced.extend(Version::load(self.storage, id)?.segments);
        }
        let Some(max_referenced) = referenced.last().copied() else {
            for &id in expired {
                self.storage.delete_file(&layout::version_file_name(id))?;
            }
            return Ok(());
        };

        for &id in expired {
            debug!("removing expired version [{id}]");
            self.storage.delete_file(&layout::version_file_name(id))?;
        }

        // Segments above the newest referenced id may still be under construction.
        let mut removed = BTreeSet::new();
        for name in self.storage.list_files_with_prefix(layout::SEGMENT_DIR_PREFIX)? {
            if let Some(segment_id) = layout::parse_segment_dir(&name) {
                if segment_id < max_referenced && !referenced.contains(&segment_id) {
                    self.storage.delete_file(&name)?;
                    removed.insert(segment_id);
                }
            }
        }
        if !removed.is_empty() {
            info!("removed unreferenced segments {removed:?}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_version_segments_sorted() {
        let mut version = Version::new(0);
        version.add_segment(3);
        version.add_segment(1);
        version.add_segment(3);
        assert_eq!(version.segments, vec![1, 3]);
        assert!(version.has_segment(1));
        assert_eq!(version.level_info.level_of(3), Some(0));

        version.remove_segment(1);
        assert_eq!(version.segments, vec![3]);
        assert_eq!(version.level_info.level_of(1), None);
    }

    #[test]
    fn test_level_info_grows() {
        let mut level_info = LevelInfo::new(LevelTopology::HashMod, 2);
        level_info.add_segment(3, 9);
        assert_eq!(level_info.levels.len(), 4);
        assert_eq!(level_info.bottom_level_idx(), 3);
        assert_eq!(level_info.advance_cursor(3), 0);
        assert_eq!(level_info.advance_cursor(3), 1);
    }

    #[test]
    fn test_commit_and_cleanup() {
        let storage = MemoryStorage::new_default();
        let committer = VersionCommitter::new(&storage, 1);

        for seg in 0..3 {
            storage
                .write_all(&format!("segment_{seg}/segment_info"), b"{}")
                .unwrap();
        }

        let mut v0 = Version::new(0);
        v0.add_segment(0);
        v0.add_segment(1);
        committer.commit(&mut v0).unwrap();

        let mut v1 = Version::new(1);
        v1.add_segment(2);
        v1.timestamp = 7;
        committer.commit(&mut v1).unwrap();

        assert!(!storage.file_exists("version.0"));
        assert!(!storage.file_exists("segment_0/segment_info"));
        assert!(!storage.file_exists("segment_1/segment_info"));
        assert!(storage.file_exists("segment_2/segment_info"));

        let latest = Version::load_latest(&storage).unwrap().unwrap();
        assert_eq!(latest.version_id, 1);
        assert_eq!(latest.timestamp, 7);
        assert!(latest.commit_time.is_some());
    }

    #[test]
    fn test_cleanup_keeps_unfinished_segments() {
        let storage = MemoryStorage::new_default();
        storage.write_all("segment_5/segment_info", b"{}").unwrap();
        let mut v0 = Version::new(0);
        v0.add_segment(1);
        VersionCommitter::new(&storage, 2).commit(&mut v0).unwrap();
        assert!(storage.file_exists("segment_5/segment_info"));
    }

    #[test]
    fn test_missing_version_not_found() {
        let storage = MemoryStorage::new_default();
        let err = Version::load(&storage, 3).unwrap_err();
        assert!(err.is_not_found());
        assert!(Version::load_latest(&storage).unwrap().is_none());
    }
}
