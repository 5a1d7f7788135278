mod common;

use indexlib::attribute::AttributePatchReader;
use indexlib::document::{Document, FieldValue};
use indexlib::index_base::{DeletionMap, SegmentDirectory, Version, layout};
use indexlib::merger::IndexPartitionMerger;
use indexlib::partition::IndexBuilder;

use common::{build_segments, doc, key, memory_storage, options, reader, schema, snapshot};

#[test]
fn test_three_equal_segments_merge_in_order() {
    let storage = memory_storage();
    let options = options("balance_tree", "conflict-segment-number=3");
    build_segments(&storage, &options, &[10, 10, 10]);

    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(false).unwrap().unwrap();
    assert_eq!(meta.plan_count(), 1);
    let plan = &meta.plans()[0];
    assert_eq!(plan.plan.segment_ids(), vec![0, 1, 2]);

    // segment-then-local order over [0, 30)
    let map = &plan.reclaim_map;
    assert_eq!(map.new_doc_count(), 30);
    for segment in 0..3u32 {
        for local in 0..10u32 {
            let new_id = segment * 10 + local;
            assert_eq!(map.get_new_doc_id(segment, local), Some(new_id));
            assert_eq!(map.get_old_doc_id_and_seg_id(new_id), Some((segment, local)));
        }
    }

    for instance in 0..options.merge.instance_count {
        merger.do_merge(&meta, instance).unwrap();
    }
    let version = merger.end_merge(&meta).unwrap();
    assert_eq!(version.segments, vec![3]);

    let reader = reader(&storage, &options, version);
    assert_eq!(reader.doc_count(), 30);
    for segment in 0..3 {
        for local in 0..10 {
            let global = reader.lookup(&key(segment, local)).unwrap();
            assert_eq!(global as usize, segment * 10 + local);
            assert_eq!(
                reader.attribute("price", global).unwrap(),
                Some(FieldValue::Int((segment * 100 + local) as i64))
            );
        }
    }
    assert_eq!(reader.search("title", "odd").unwrap().len(), 15);
}

#[test]
fn test_deleted_doc_is_reclaimed() {
    let storage = memory_storage();
    let options = options("balance_tree", "conflict-segment-number=3");
    let mut builder = IndexBuilder::open(storage.clone(), schema(), options.clone()).unwrap();
    for segment in 0..3 {
        for local in 0..10 {
            builder.build(&doc(segment, local)).unwrap();
        }
        if segment == 1 {
            builder
                .build(&Document::delete(1).with_field("id", key(1, 5).as_str()))
                .unwrap();
        }
        builder.dump_segment().unwrap();
    }

    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(false).unwrap().unwrap();
    let map = &meta.plans()[0].reclaim_map;
    assert_eq!(map.new_doc_count(), 29);
    assert_eq!(map.deleted_doc_count(), 1);
    assert_eq!(map.get_new_doc_id(1, 5), None);
    // locals 0..=4 of the second segment survive ahead of local 6
    let surviving_before = (0..6).filter(|&l| l != 5).count() as u32;
    assert_eq!(map.get_new_doc_id(1, 6), Some(10 + surviving_before));
    assert_eq!(map.get_new_doc_id(1, 6), Some(15));
    assert_eq!(map.get_new_doc_id(2, 0), Some(19));

    merger.do_merge(&meta, 0).unwrap();
    let version = merger.end_merge(&meta).unwrap();
    let reader = reader(&storage, &options, version);
    assert_eq!(reader.doc_count(), 29);
    assert_eq!(reader.lookup(&key(1, 5)), None);
    assert_eq!(reader.lookup(&key(1, 6)), Some(15));
}

#[test]
fn test_later_update_wins_after_merge() {
    let storage = memory_storage();
    let options = options("optimize", "");
    let mut builder = build_segments(&storage, &options, &[4]);
    let target = key(0, 2);

    builder
        .build(&Document::update(10).with_field("id", target.as_str()).with_field("price", 1000i64))
        .unwrap();
    builder.dump_segment().unwrap();
    builder
        .build(&Document::update(20).with_field("id", target.as_str()).with_field("price", 2000i64))
        .unwrap();
    builder.dump_segment().unwrap();

    let before = Version::load_latest(storage.as_ref()).unwrap().unwrap();
    let reader_before = reader(&storage, &options, before.clone());
    let global = reader_before.lookup(&target).unwrap();
    assert_eq!(reader_before.attribute("price", global).unwrap(), Some(FieldValue::Int(2000)));

    let merged = builder.merge(true).unwrap().unwrap();
    assert_eq!(merged.segments.len(), 1);
    let reader_after = reader(&storage, &options, merged.clone());
    let global = reader_after.lookup(&target).unwrap();
    assert_eq!(reader_after.attribute("price", global).unwrap(), Some(FieldValue::Int(2000)));

    // a realtime update newer than the merged version is replayed on reopen
    builder
        .build(&Document::update(30).with_field("id", target.as_str()).with_field("price", 3000i64))
        .unwrap();
    let reopened = reader_before.reopen(merged, builder.operation_queue()).unwrap();
    let global = reopened.lookup(&target).unwrap();
    assert_eq!(reopened.attribute("price", global).unwrap(), Some(FieldValue::Int(3000)));
}

#[test]
fn test_merge_keeps_segments_built_meanwhile() {
    let storage = memory_storage();
    let options = options("balance_tree", "conflict-segment-number=2");
    let mut builder = build_segments(&storage, &options, &[5, 5]);

    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(false).unwrap().unwrap();
    merger.do_merge(&meta, 0).unwrap();

    // a segment committed between planning and ending the merge, which
    // also deletes and updates documents of the merged segments
    for local in 0..3 {
        builder.build(&doc(7, local)).unwrap();
    }
    builder
        .build(&Document::delete(8).with_field("id", key(0, 2).as_str()))
        .unwrap();
    builder
        .build(
            &Document::update(8)
                .with_field("id", key(1, 3).as_str())
                .with_field("price", 4242i64),
        )
        .unwrap();
    let built = builder.dump_segment().unwrap().unwrap();
    let new_segment = built.last_segment().unwrap();
    assert!(reader(&storage, &options, built).lookup(&key(0, 2)).is_none());

    let version = merger.end_merge(&meta).unwrap();
    assert!(version.has_segment(new_segment));
    assert!(!version.has_segment(0));
    assert!(!version.has_segment(1));

    let reader = reader(&storage, &options, version);
    let docs = snapshot(&reader);
    assert_eq!(docs.len(), 12);
    assert!(reader.lookup(&key(0, 2)).is_none());
    assert!(docs.contains(&(key(1, 3), 4242, "item odd".to_string())));
    assert!(docs.contains(&(key(1, 4), 104, "item even".to_string())));
}

#[test]
fn test_optimize_twice_is_a_no_op() {
    let storage = memory_storage();
    let options = options("optimize", "");
    let mut builder = build_segments(&storage, &options, &[3, 3, 3]);

    let first = builder.merge(true).unwrap().unwrap();
    assert_eq!(first.segments.len(), 1);
    let dir = SegmentDirectory::open(storage.clone(), first.clone()).unwrap();
    assert!(dir.segment_info(first.segments[0]).unwrap().merged);

    assert!(builder.merge(true).unwrap().is_none());
    let latest = Version::load_latest(storage.as_ref()).unwrap().unwrap();
    assert_eq!(latest.version_id, first.version_id);
}

#[test]
fn test_each_plan_carries_only_its_own_patches() {
    let storage = memory_storage();
    let options = options("balance_tree", "base-doc-count=4;conflict-segment-number=2");
    let mut builder = IndexBuilder::open(storage.clone(), schema(), options.clone()).unwrap();

    // Segment 0 survives; 1 + 2 and 3 + 4 merge in separate plans. Each of
    // segments 1..=4 deletes or updates one document of segment 0.
    let sizes = [40, 2, 2, 6, 6];
    for (segment, &count) in sizes.iter().enumerate() {
        for local in 0..count {
            builder.build(&doc(segment, local)).unwrap();
        }
        let ts = segment as i64;
        if segment % 2 == 1 {
            let update = Document::update(ts)
                .with_field("id", key(0, segment).as_str())
                .with_field("price", -(segment as i64));
            builder.build(&update).unwrap();
        } else if segment > 0 {
            builder
                .build(&Document::delete(ts).with_field("id", key(0, segment).as_str()))
                .unwrap();
        }
        builder.dump_segment().unwrap();
    }

    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(false).unwrap().unwrap();
    let mut plans: Vec<_> = meta.plans().iter().map(|p| p.plan.segment_ids()).collect();
    plans.sort();
    assert_eq!(plans, vec![vec![1, 2], vec![3, 4]]);
    for instance in 0..options.merge.instance_count {
        merger.do_merge(&meta, instance).unwrap();
    }
    let version = merger.end_merge(&meta).unwrap();
    assert!(version.has_segment(0));

    for plan in meta.plans() {
        let target = plan.meta.target_segment_ids[0];
        let (updated, deleted) = if plan.plan.contains(1) { (1, 2) } else { (3, 4) };

        let path = layout::deletion_map_path(&layout::segment_root(target, false), 0);
        let deletions = DeletionMap::load(storage.as_ref(), &path).unwrap();
        assert_eq!(deletions.deleted_docs().collect::<Vec<_>>(), vec![deleted]);

        let path = layout::attribute_patch_path(&layout::segment_root(target, false), "price", target, 0);
        let mut patch = AttributePatchReader::from_bytes(&storage.read_all(&path).unwrap(), &path, 40).unwrap();
        assert_eq!(patch.next_entry().map(|(doc_id, _)| doc_id), Some(updated));
        assert!(patch.next_entry().is_none());
    }

    let reader = reader(&storage, &options, version);
    let docs = snapshot(&reader);
    assert_eq!(docs.len(), 40 + 2 + 2 + 6 + 6 - 2);
    assert!(reader.lookup(&key(0, 2)).is_none());
    assert!(reader.lookup(&key(0, 4)).is_none());
    assert!(docs.contains(&(key(0, 1), -1, "item odd".to_string())));
    assert!(docs.contains(&(key(0, 3), -3, "item odd".to_string())));
}
