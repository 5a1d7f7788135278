//! A storage view scoped to a sub directory of another storage.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{FileMetadata, Storage, StorageInput, StorageOutput};

/// Storage facade that transparently prefixes all file names.
///
/// Merge instances use it to write below `<merge meta>/instance_<k>` while the
/// column mergers address files relative to a segment root.
#[derive(Debug, Clone)]
pub struct PrefixedStorage {
    prefix: String,
    inner: Arc<dyn Storage>,
}

impl PrefixedStorage {
    /// Create a new prefixed storage namespace.
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Storage>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        PrefixedStorage { prefix, inner }
    }

    /// The directory this view is rooted at.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The storage this view forwards to.
    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    fn map_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else if name.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    fn strip_prefix<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.prefix.is_empty() {
            return Some(name);
        }
        name.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

impl Storage for PrefixedStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(&self.map_name(name))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.inner.create_output(&self.map_name(name))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(&self.map_name(name))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(&self.map_name(name))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        if self.prefix.is_empty() {
            return self.inner.list_files();
        }
        let prefix = format!("{}/", self.prefix);
        Ok(self
            .inner
            .list_files_with_prefix(&prefix)?
            .iter()
            .filter_map(|entry| self.strip_prefix(entry).map(str::to_string))
            .collect())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.inner.file_size(&self.map_name(name))
    }

    fn metadata(&self, name: &str) -> Result<FileMetadata> {
        self.inner.metadata(&self.map_name(name))
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner
            .rename_file(&self.map_name(old_name), &self.map_name(new_name))
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn list_files_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mapped = self.map_name(prefix);
        Ok(self
            .inner
            .list_files_with_prefix(&mapped)?
            .iter()
            .filter_map(|entry| self.strip_prefix(entry).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn isolates_file_names() {
        let base: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let prefixed = PrefixedStorage::new("merge_meta/instance_0/", base.clone());

        prefixed.write_all("segment_5/attribute/price/data", b"data").unwrap();

        assert!(base.file_exists("merge_meta/instance_0/segment_5/attribute/price/data"));
        assert!(!base.file_exists("segment_5/attribute/price/data"));

        base.write_all("merge_meta/instance_01/other", b"x").unwrap();
        let files = prefixed.list_files().unwrap();
        assert_eq!(files, vec!["segment_5/attribute/price/data".to_string()]);

        let files = prefixed.list_files_with_prefix("segment_5/").unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_prefix_is_transparent() {
        let base: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let prefixed = PrefixedStorage::new("", base.clone());
        prefixed.write_all("version.0", b"{}").unwrap();
        assert!(base.file_exists("version.0"));
        assert_eq!(prefixed.list_files().unwrap(), vec!["version.0".to_string()]);
    }
}
