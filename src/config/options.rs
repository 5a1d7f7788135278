//! Partition options for the build, merge and online paths.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::merge_strategy_parameter::MergeStrategyParameter;
use crate::error::{IndexlibError, Result};
use crate::index_base::SegmentId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// A segment is dumped once it holds this many documents.
    pub max_docs_per_segment: u32,

    /// Number of newest versions kept on disk.
    pub keep_version_count: usize,

    /// Operations per block of the operation queue.
    pub operation_block_size: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_docs_per_segment: 100_000,
            keep_version_count: 2,
            operation_block_size: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Registered identifier of the merge strategy.
    pub merge_strategy: String,

    pub merge_strategy_parameter: MergeStrategyParameter,

    /// Worker threads per merge instance.
    pub thread_num: usize,

    /// Memory budget of one merge instance.
    pub max_mem_use_mb: u64,

    /// Number of independent merge instances the work is spread over.
    pub instance_count: usize,

    /// Number of doc-id ranges each parallel-capable column is split into.
    pub parallel_count: usize,

    /// Directory holding merge plans, reclaim maps and checkpoints.
    pub merge_meta_prefix: String,

    /// Skip work items that already left a checkpoint.
    pub enable_checkpoint: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            merge_strategy: "balance_tree".to_string(),
            merge_strategy_parameter: MergeStrategyParameter::default(),
            thread_num: num_cpus::get().clamp(1, 8),
            max_mem_use_mb: 1024,
            instance_count: 1,
            parallel_count: 1,
            merge_meta_prefix: "merge_meta".to_string(),
            enable_checkpoint: true,
        }
    }
}

impl MergeConfig {
    pub fn max_mem_use_bytes(&self) -> i64 {
        (self.max_mem_use_mb as i64).saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineConfig {
    /// Skip patches whose source segment is older than `start_load_segment`.
    pub ignore_patch_to_old_inc_segment: bool,

    pub start_load_segment: Option<SegmentId>,
}

/// All options of one index partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexPartitionOptions {
    pub build: BuildConfig,
    pub merge: MergeConfig,
    pub online: OnlineConfig,
}

impl IndexPartitionOptions {
    /// Parse and validate options from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: IndexPartitionOptions = serde_json::from_str(json)
            .map_err(|e| IndexlibError::bad_parameter(format!("invalid options json: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| IndexlibError::file_io(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.build.max_docs_per_segment == 0 {
            return Err(IndexlibError::bad_parameter(
                "max_docs_per_segment must be positive",
            ));
        }
        if self.build.keep_version_count == 0 {
            return Err(IndexlibError::bad_parameter(
                "keep_version_count must be positive",
            ));
        }
        if self.build.operation_block_size == 0 {
            return Err(IndexlibError::bad_parameter(
                "operation_block_size must be positive",
            ));
        }
        let merge = &self.merge;
        if merge.thread_num == 0 || merge.instance_count == 0 || merge.parallel_count == 0 {
            return Err(IndexlibError::bad_parameter(
                "thread_num, instance_count and parallel_count must be positive",
            ));
        }
        if merge.merge_meta_prefix.trim_matches('/').is_empty() {
            return Err(IndexlibError::bad_parameter("merge_meta_prefix cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = IndexPartitionOptions::default();
        options.validate().unwrap();
        assert_eq!(options.merge.merge_strategy, "balance_tree");
        assert!(options.merge.thread_num >= 1);
    }

    #[test]
    fn test_partial_json() {
        let options = IndexPartitionOptions::from_json_str(
            r#"{"merge": {"merge_strategy": "optimize", "thread_num": 2,
                "merge_strategy_parameter": {"output_limit_param": "after-merge-max-segment-count=2"}},
               "online": {"ignore_patch_to_old_inc_segment": true, "start_load_segment": 4}}"#,
        )
        .unwrap();
        assert_eq!(options.merge.merge_strategy, "optimize");
        assert_eq!(options.merge.thread_num, 2);
        assert_eq!(options.merge.instance_count, 1);
        assert_eq!(options.online.start_load_segment, Some(4));
        assert_eq!(options.build.keep_version_count, 2);
    }

    #[test]
    fn test_invalid_thread_num() {
        let err = IndexPartitionOptions::from_json_str(r#"{"merge": {"thread_num": 0}}"#).unwrap_err();
        assert!(matches!(err, IndexlibError::BadParameter(_)));
    }
}
