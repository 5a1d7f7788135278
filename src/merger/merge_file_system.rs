//! Where merge work items write their output.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::Storage;
use crate::storage::memory::MemoryStorage;

pub trait MergeFileSystem: Send + std::fmt::Debug {
    /// Storage receiving the files of the running work item, addressed
    /// relative to the merge instance root.
    fn storage(&self) -> &dyn Storage;

    /// Publish everything written since the last commit. Returns the number
    /// of files published.
    fn commit(&mut self) -> Result<usize>;

    /// Drop everything written since the last commit.
    fn discard(&mut self) -> Result<()>;
}

/// Buffers files in memory and publishes them below a merge instance root of
/// the index storage on commit.
///
/// A work item that fails leaves nothing behind once its buffer is
/// discarded.
#[derive(Debug)]
pub struct BufferedMergeFileSystem {
    buffer: MemoryStorage,
    target: Arc<dyn Storage>,
    root: String,

    /// Serializes commits of file systems sharing a target.
    commit_lock: Arc<Mutex<()>>,
}

impl BufferedMergeFileSystem {
    pub fn new(target: Arc<dyn Storage>, root: &str, commit_lock: Arc<Mutex<()>>) -> Self {
        BufferedMergeFileSystem {
            buffer: MemoryStorage::new_default(),
            target,
            root: root.trim_end_matches('/').to_string(),
            commit_lock,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

impl MergeFileSystem for BufferedMergeFileSystem {
    fn storage(&self) -> &dyn Storage {
        &self.buffer
    }

    fn commit(&mut self) -> Result<usize> {
        let names = self.buffer.list_files()?;
        let _guard = self.commit_lock.lock();
        for name in &names {
            let data = self.buffer.read_all(name)?;
            self.target.write_all(&format!("{}/{name}", self.root), &data)?;
            self.buffer.delete_file(name)?;
        }
        if !names.is_empty() {
            self.target.sync()?;
            debug!("committed [{}] files below [{}]", names.len(), self.root);
        }
        Ok(names.len())
    }

    fn discard(&mut self) -> Result<()> {
        for name in self.buffer.list_files()? {
            self.buffer.delete_file(&name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_publishes_below_root() {
        let target: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut fs = BufferedMergeFileSystem::new(target.clone(), "merge_meta/instance_0/", Arc::default());
        fs.storage().write_all("segment_3/deletionmap/data_3", b"x").unwrap();
        assert!(!target.file_exists("merge_meta/instance_0/segment_3/deletionmap/data_3"));

        assert_eq!(fs.commit().unwrap(), 1);
        assert_eq!(
            target
                .read_all("merge_meta/instance_0/segment_3/deletionmap/data_3")
                .unwrap(),
            b"x"
        );
        assert_eq!(fs.commit().unwrap(), 0);
    }

    #[test]
    fn test_discard_drops_buffer() {
        let target: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut fs = BufferedMergeFileSystem::new(target.clone(), "m", Arc::default());
        fs.storage().write_all("a", b"1").unwrap();
        fs.discard().unwrap();
        assert_eq!(fs.commit().unwrap(), 0);
        assert!(target.list_files().unwrap().is_empty());
    }
}
