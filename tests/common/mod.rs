#![allow(dead_code)]

use std::sync::Arc;

use indexlib::config::{
    AttributeConfig, FieldType, IndexPartitionOptions, IndexType, MergeStrategyParameter,
    PrimaryKeyConfig, Schema,
};
use indexlib::document::Document;
use indexlib::index_base::Version;
use indexlib::partition::{IndexBuilder, PartitionReader};
use indexlib::storage::memory::MemoryStorageConfig;
use indexlib::storage::{Storage, StorageConfig, StorageFactory};

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new("items")
            .with_attribute(AttributeConfig::new("id", FieldType::String))
            .with_attribute(AttributeConfig::new("price", FieldType::Int64).updatable())
            .with_attribute(AttributeConfig::new("title", FieldType::String))
            .with_index("title", &["title"], IndexType::Text)
            .with_primary_key(PrimaryKeyConfig::new("id")),
    )
}

pub fn memory_storage() -> Arc<dyn Storage> {
    StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default())).unwrap()
}

pub fn options(strategy: &str, conditions: &str) -> IndexPartitionOptions {
    let mut options = IndexPartitionOptions::default();
    options.merge.merge_strategy = strategy.to_string();
    options.merge.merge_strategy_parameter = MergeStrategyParameter::with_conditions(conditions);
    options.merge.thread_num = 2;
    options
}

pub fn key(segment: usize, local: usize) -> String {
    format!("s{segment}-{local}")
}

pub fn doc(segment: usize, local: usize) -> Document {
    let parity = if local % 2 == 0 { "even" } else { "odd" };
    Document::add(segment as i64)
        .with_field("id", key(segment, local).as_str())
        .with_field("price", (segment * 100 + local) as i64)
        .with_field("title", format!("item {parity}").as_str())
}

/// One dumped segment per entry of `doc_counts`.
pub fn build_segments(
    storage: &Arc<dyn Storage>,
    options: &IndexPartitionOptions,
    doc_counts: &[usize],
) -> IndexBuilder {
    let mut builder = IndexBuilder::open(storage.clone(), schema(), options.clone()).unwrap();
    for (segment, &count) in doc_counts.iter().enumerate() {
        for local in 0..count {
            builder.build(&doc(segment, local)).unwrap();
        }
        builder.dump_segment().unwrap();
    }
    builder
}

pub fn reader(storage: &Arc<dyn Storage>, options: &IndexPartitionOptions, version: Version) -> PartitionReader {
    PartitionReader::open(storage.clone(), schema(), options.clone(), version).unwrap()
}

/// `(key, price, title)` of every live document, by key.
pub fn snapshot(reader: &PartitionReader) -> Vec<(String, i64, String)> {
    use indexlib::document::FieldValue;

    let mut rows = Vec::new();
    for global in 0..reader.doc_count() {
        if reader.is_deleted(global) {
            continue;
        }
        let Some(FieldValue::Text(id)) = reader.attribute("id", global).unwrap() else {
            panic!("doc [{global}] has no id");
        };
        let Some(FieldValue::Int(price)) = reader.attribute("price", global).unwrap() else {
            panic!("doc [{global}] has no price");
        };
        let Some(FieldValue::Text(title)) = reader.attribute("title", global).unwrap() else {
            panic!("doc [{global}] has no title");
        };
        rows.push((id, price, title));
    }
    rows.sort();
    rows
}
