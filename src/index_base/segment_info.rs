//! Per-segment metadata stored as `segment_info`.

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};
use crate::index_base::layout;
use crate::index_base::version::Locator;
use crate::storage::Storage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Number of documents, deleted ones included.
    pub doc_count: u32,

    /// Largest document timestamp the segment reflects.
    pub timestamp: i64,

    #[serde(default)]
    pub locator: Locator,

    /// Whether the segment was produced by a merge.
    #[serde(default)]
    pub merged: bool,
}

impl SegmentInfo {
    pub fn new(doc_count: u32, timestamp: i64) -> Self {
        SegmentInfo {
            doc_count,
            timestamp,
            ..Default::default()
        }
    }

    /// Load `segment_info` below `root` (a segment or sub-segment directory).
    pub fn load(storage: &dyn Storage, root: &str) -> Result<Self> {
        let path = layout::segment_info_path(root);
        let bytes = storage.read_all(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| IndexlibError::index_collapsed(format!("bad [{path}]: {e}")))
    }

    pub fn store(&self, storage: &dyn Storage, root: &str) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        storage.write_all(&layout::segment_info_path(root), &json)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
