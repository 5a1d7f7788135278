use std::sync::Arc;

use indexlib::attribute::AttributeReaderContainer;
use indexlib::config::{AttributeConfig, FieldType, IndexPartitionOptions, PrimaryKeyConfig, Schema};
use indexlib::document::Document;
use indexlib::index_base::{SegmentDirectory, layout};
use indexlib::partition::IndexBuilder;
use indexlib::storage::memory::MemoryStorageConfig;
use indexlib::storage::{StorageConfig, StorageFactory};

fn sub_schema() -> Schema {
    Schema::new("offers")
        .with_attribute(AttributeConfig::new("sub_id", FieldType::String))
        .with_attribute(AttributeConfig::new("sub_price", FieldType::Int32).updatable())
        .with_primary_key(PrimaryKeyConfig::new("sub_id"))
}

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new("products")
            .with_attribute(AttributeConfig::new("id", FieldType::String))
            .with_primary_key(PrimaryKeyConfig::new("id"))
            .with_sub_schema(sub_schema()),
    )
}

fn product(id: &str, ts: i64, offers: &[(&str, i64)]) -> Document {
    let mut doc = Document::add(ts).with_field("id", id);
    for (sub_id, price) in offers {
        doc = doc.with_sub_doc(
            Document::add(ts)
                .with_field("sub_id", *sub_id)
                .with_field("sub_price", *price),
        );
    }
    doc
}

fn join_values(container: &AttributeReaderContainer, name: &str, segment_id: u32, count: u32) -> Vec<u32> {
    let segment = container.segment(name, segment_id).unwrap();
    (0..count)
        .map(|doc| u32::from_le_bytes(segment.get(doc).unwrap().try_into().unwrap()))
        .collect()
}

#[test]
fn test_sub_documents_follow_their_main_document_through_merge() {
    let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default())).unwrap();
    let mut options = IndexPartitionOptions::default();
    options.merge.merge_strategy = "optimize".to_string();
    let mut builder = IndexBuilder::open(storage.clone(), schema(), options).unwrap();

    // 1. Two segments of products with offers
    builder.build(&product("m0", 1, &[("a", 10), ("b", 11)])).unwrap();
    builder.build(&product("m1", 2, &[("c", 12)])).unwrap();
    let first = builder.dump_segment().unwrap().unwrap();
    builder.build(&product("m2", 3, &[("d", 13), ("e", 14)])).unwrap();
    builder.dump_segment().unwrap();

    let dir = SegmentDirectory::open(storage.clone(), first).unwrap();
    let main = AttributeReaderContainer::new(dir.clone(), schema());
    assert_eq!(join_values(&main, layout::MAIN_JOIN_ATTRIBUTE, 0, 2), vec![2, 3]);
    let sub_dir = dir.sub_directory().unwrap();
    let sub = AttributeReaderContainer::new(sub_dir, Arc::new(sub_schema()));
    assert_eq!(join_values(&sub, layout::SUB_JOIN_ATTRIBUTE, 0, 3), vec![0, 0, 1]);

    // 2. Drop a whole product and a single offer, update another offer
    assert!(builder.build(&Document::delete(4).with_field("id", "m1")).unwrap());
    let remove_offer = Document::delete_sub(5)
        .with_field("id", "m0")
        .with_sub_doc(Document::delete(5).with_field("sub_id", "b"));
    assert!(builder.build(&remove_offer).unwrap());
    let update_offer = Document::update(6)
        .with_field("id", "m2")
        .with_sub_doc(Document::update(6).with_field("sub_id", "e").with_field("sub_price", 99i64));
    assert!(builder.build(&update_offer).unwrap());

    // 3. Merge everything
    let merged = builder.merge(true).unwrap().unwrap();
    assert_eq!(merged.segments.len(), 1);
    let target = merged.segments[0];
    let dir = SegmentDirectory::open(storage.clone(), merged).unwrap();
    assert_eq!(dir.segment_info(target).unwrap().doc_count, 2);
    let sub_dir = dir.sub_directory().unwrap();
    assert_eq!(sub_dir.segment_info(target).unwrap().doc_count, 3);

    let main = AttributeReaderContainer::new(dir, schema());
    assert_eq!(join_values(&main, layout::MAIN_JOIN_ATTRIBUTE, target, 2), vec![1, 3]);
    let sub = AttributeReaderContainer::new(sub_dir, Arc::new(sub_schema()));
    assert_eq!(join_values(&sub, layout::SUB_JOIN_ATTRIBUTE, target, 3), vec![0, 1, 1]);

    let ids: Vec<String> = (0..3)
        .map(|doc| String::from_utf8(sub.segment("sub_id", target).unwrap().get(doc).unwrap().to_vec()).unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "d", "e"]);
    let price = sub.segment("sub_price", target).unwrap().get(2).unwrap().to_vec();
    assert_eq!(i32::from_le_bytes(price.try_into().unwrap()), 99);
}
