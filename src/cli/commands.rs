//! The merge command behind `local_merger`.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use log::info;

use crate::cli::args::LocalMergerArgs;
use crate::config::{IndexPartitionOptions, Schema};
use crate::error::Result;
use crate::index_base::Version;
use crate::merger::IndexPartitionMerger;
use crate::storage::file::FileStorageConfig;
use crate::storage::{StorageConfig, StorageFactory};

/// Load the schema and options named by `args` and merge the index
/// directory. `None` when there was nothing to merge.
pub fn run_local_merge(args: &LocalMergerArgs) -> Result<Option<Version>> {
    let schema = Schema::load(&args.schema_path)
        .with_context(|| format!("loading schema {}", args.schema_path.display()))?;
    let mut options = match &args.options_json {
        Some(path) => IndexPartitionOptions::load(path)
            .with_context(|| format!("loading options {}", path.display()))?,
        None => IndexPartitionOptions::default(),
    };
    if let Some(thread_num) = args.thread_num {
        options.merge.thread_num = thread_num.max(1);
    }
    if !args.index_dir.is_dir() {
        return Err(anyhow!("index directory {} does not exist", args.index_dir.display()).into());
    }

    let storage = StorageFactory::create(StorageConfig::File(FileStorageConfig::new(&args.index_dir)))?;
    info!(
        "merging [{}] with schema [{}], [{}] threads, [{}] instances",
        args.index_dir.display(),
        schema.name,
        options.merge.thread_num,
        options.merge.instance_count
    );
    let version = IndexPartitionMerger::new(storage, Arc::new(schema), options)
        .merge(args.optimize)
        .context("merge failed")?;
    Ok(version)
}

/// Execute the command and print a one-line summary.
pub fn execute_command(args: LocalMergerArgs) -> Result<()> {
    match run_local_merge(&args)? {
        Some(version) => {
            if args.verbosity() > 0 {
                println!(
                    "merged into version {} with segments {:?}",
                    version.version_id, version.segments
                );
            }
        }
        None => {
            if args.verbosity() > 0 {
                println!("nothing to merge");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::{AttributeConfig, FieldType, PrimaryKeyConfig};
    use crate::document::Document;
    use crate::partition::IndexBuilder;

    fn args(index_dir: PathBuf, schema_path: PathBuf) -> LocalMergerArgs {
        LocalMergerArgs {
            index_dir,
            schema_path,
            options_json: None,
            optimize: true,
            thread_num: Some(2),
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_merges_file_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        let schema = Schema::new("items")
            .with_attribute(AttributeConfig::new("id", FieldType::String))
            .with_attribute(AttributeConfig::new("price", FieldType::Int64))
            .with_primary_key(PrimaryKeyConfig::new("id"));
        let schema_path = dir.path().join("schema.json");
        std::fs::write(&schema_path, serde_json::to_vec(&schema).unwrap()).unwrap();

        let storage =
            StorageFactory::create(StorageConfig::File(FileStorageConfig::new(&index_dir))).unwrap();
        let mut builder =
            IndexBuilder::open(storage, Arc::new(schema), IndexPartitionOptions::default()).unwrap();
        for segment in 0..3i64 {
            for i in 0..4i64 {
                let id = format!("doc-{}", segment * 4 + i);
                builder
                    .build(&Document::add(segment).with_field("id", id.as_str()).with_field("price", i))
                    .unwrap();
            }
            builder.dump_segment().unwrap();
        }

        let version = run_local_merge(&args(index_dir, schema_path)).unwrap().unwrap();
        assert_eq!(version.segments.len(), 1);
    }

    #[test]
    fn test_missing_schema_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(run_local_merge(&args(dir.path().to_path_buf(), missing)).is_err());
    }

    #[test]
    fn test_missing_index_dir_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let schema = Schema::new("items")
            .with_attribute(AttributeConfig::new("id", FieldType::String))
            .with_primary_key(PrimaryKeyConfig::new("id"));
        let schema_path = dir.path().join("schema.json");
        std::fs::write(&schema_path, serde_json::to_vec(&schema).unwrap()).unwrap();

        let err = run_local_merge(&args(dir.path().join("absent"), schema_path)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
