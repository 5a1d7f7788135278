mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use indexlib::attribute::{
    AttributeReaderContainer, EqualValueCompressReader, MultiFieldPatchIterator,
    UINT32_OFFSET_TAIL_MAGIC, UINT64_OFFSET_TAIL_MAGIC, compress_u32, compress_u64,
};
use indexlib::config::{AttributeConfig, FieldType, IndexPartitionOptions, PrimaryKeyConfig, Schema};
use indexlib::document::Document;
use indexlib::index_base::{PatchFileFilter, SegmentDirectory, Version, layout};
use indexlib::partition::IndexBuilder;

use common::{build_segments, key, memory_storage, options, schema};

#[test]
fn test_patches_come_out_in_doc_order_with_last_write_last() {
    let storage = memory_storage();
    let options = options("optimize", "");
    let mut builder = build_segments(&storage, &options, &[20, 15]);
    let mut rng = StdRng::seed_from_u64(17);

    // 1. Several patch-only segments updating random documents
    let mut expected: BTreeMap<(usize, usize), i64> = BTreeMap::new();
    let mut ts = 100;
    for _ in 0..4 {
        for _ in 0..12 {
            let segment = rng.random_range(0..2usize);
            let local = rng.random_range(0..15usize);
            let price = rng.random_range(0..1_000_000i64);
            ts += 1;
            builder
                .build(
                    &Document::update(ts)
                        .with_field("id", key(segment, local).as_str())
                        .with_field("price", price),
                )
                .unwrap();
            expected.insert((segment, local), price);
        }
        builder.dump_segment().unwrap();
    }

    // 2. The merged stream never goes back in doc order
    let version = Version::load_latest(storage.as_ref()).unwrap().unwrap();
    let dir = SegmentDirectory::open(storage.clone(), version).unwrap();
    let items: Vec<_> = MultiFieldPatchIterator::new(&dir, &schema(), &PatchFileFilter::default())
        .unwrap()
        .collect();
    assert!(!items.is_empty());
    assert!(items.windows(2).all(|w| w[0].doc_id <= w[1].doc_id));

    // 3. For every doc the last patch carries the last written value
    let mut last: BTreeMap<u32, i64> = BTreeMap::new();
    for item in &items {
        last.insert(item.doc_id, i64::from_le_bytes(item.value.clone().try_into().unwrap()));
    }
    for ((segment, local), price) in &expected {
        let global = dir.base_doc_id(*segment as u32).unwrap() + *local as u32;
        assert_eq!(last.get(&global), Some(price), "doc {segment}/{local}");
    }

    // 4. Readers apply the same values
    let container = AttributeReaderContainer::new(dir.clone(), schema());
    for ((segment, local), price) in &expected {
        let value = container
            .segment("price", *segment as u32)
            .unwrap()
            .get(*local as u32)
            .unwrap()
            .to_vec();
        assert_eq!(i64::from_le_bytes(value.try_into().unwrap()), *price);
    }
}

#[test]
fn test_offset_tail_magic() {
    let u32_block = compress_u32(&[0, 4, 4, 9, 13]);
    assert_eq!(u32_block[u32_block.len() - 4..], UINT32_OFFSET_TAIL_MAGIC.to_le_bytes());
    assert_eq!(&u32_block[u32_block.len() - 4..], &[0xF5, 0xF4, 0xF3, 0xF2]);
    let u64_block = compress_u64(&[0, 1 << 40, 1 << 41]);
    assert_eq!(&u64_block[u64_block.len() - 4..], &[0xF6, 0xF5, 0xF4, 0xF3]);
    assert_eq!(u64_block[u64_block.len() - 4..], UINT64_OFFSET_TAIL_MAGIC.to_le_bytes());

    for mut block in [u32_block, u64_block] {
        assert!(EqualValueCompressReader::open(&block).is_ok());
        let last = block.len() - 1;
        block[last] ^= 0xFF;
        assert!(EqualValueCompressReader::open(&block).is_err());
    }
}

#[test]
fn test_corrupted_offset_file_is_rejected() {
    let storage = memory_storage();
    let mut title = AttributeConfig::new("title", FieldType::String);
    title.compress_offset = true;
    let schema = Arc::new(
        Schema::new("notes")
            .with_attribute(AttributeConfig::new("id", FieldType::String))
            .with_attribute(title)
            .with_primary_key(PrimaryKeyConfig::new("id")),
    );
    let mut builder =
        IndexBuilder::open(storage.clone(), schema.clone(), IndexPartitionOptions::default()).unwrap();
    for i in 0..70 {
        builder
            .build(&Document::add(i).with_field("id", format!("n{i}").as_str()).with_field("title", "same"))
            .unwrap();
    }
    let version = builder.dump_segment().unwrap().unwrap();

    let path = layout::attribute_offset_path(&layout::segment_root(0, false), "title");
    let mut offset = storage.read_all(&path).unwrap();
    assert_eq!(offset[offset.len() - 4..], UINT32_OFFSET_TAIL_MAGIC.to_le_bytes());

    let dir = SegmentDirectory::open(storage.clone(), version.clone()).unwrap();
    assert!(AttributeReaderContainer::new(dir, schema.clone()).segment("title", 0).is_ok());

    let last = offset.len() - 1;
    offset[last] = 0;
    storage.write_all(&path, &offset).unwrap();
    let dir = SegmentDirectory::open(storage.clone(), version).unwrap();
    assert!(AttributeReaderContainer::new(dir, schema).segment("title", 0).is_err());
}
