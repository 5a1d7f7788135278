mod common;

use std::sync::Arc;

use indexlib::document::Document;
use indexlib::merger::partition_merger::METRIC_RECLAIM_MAP_MEMORY;
use indexlib::merger::{IndexPartitionMerger, MergeMeta, ReclaimMap};
use indexlib::metrics::{InMemoryMetricProvider, MetricReporter};

use common::{build_segments, key, memory_storage, options, reader, schema, snapshot};

#[test]
fn test_resume_skips_checkpointed_items() {
    let storage = memory_storage();
    let options = options("optimize", "");
    build_segments(&storage, &options, &[6, 6, 6]);

    // 1. Plan, then plan again as a restarted merger would
    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(true).unwrap().unwrap();
    let targets = meta.target_segment_ids();
    let resumed = IndexPartitionMerger::new(storage.clone(), schema(), options.clone())
        .prepare_merge(true)
        .unwrap()
        .unwrap();
    assert_eq!(resumed.target_segment_ids(), targets);
    assert_eq!(resumed.merged_segment_ids(), vec![0, 1, 2]);

    // 2. Run the instance, then run it again after a simulated crash
    let first = merger.do_merge(&resumed, 0).unwrap();
    assert!(!first.completed.is_empty());
    let second = merger.do_merge(&resumed, 0).unwrap();
    assert!(second.completed.is_empty());

    // 3. End and check nothing of the merge is left behind
    let version = merger.end_merge(&resumed).unwrap();
    assert_eq!(version.segments, targets);
    assert!(!MergeMeta::exists(storage.as_ref(), &options.merge.merge_meta_prefix));
    assert_eq!(snapshot(&reader(&storage, &options, version)).len(), 18);
}

#[test]
fn test_instances_split_the_work() {
    let single_storage = memory_storage();
    let single_options = options("optimize", "");
    build_segments(&single_storage, &single_options, &[5, 7, 3]);
    let single = IndexPartitionMerger::new(single_storage.clone(), schema(), single_options.clone())
        .merge(true)
        .unwrap()
        .unwrap();

    let multi_storage = memory_storage();
    let mut multi_options = options("optimize", "");
    multi_options.merge.instance_count = 3;
    build_segments(&multi_storage, &multi_options, &[5, 7, 3]);
    let merger = IndexPartitionMerger::new(multi_storage.clone(), schema(), multi_options.clone());
    let meta = merger.prepare_merge(true).unwrap().unwrap();
    let mut completed = 0;
    for instance in 0..3 {
        completed += merger.do_merge(&meta, instance).unwrap().completed.len();
    }
    assert!(completed > 0);
    let multi = merger.end_merge(&meta).unwrap();

    assert_eq!(
        snapshot(&reader(&single_storage, &single_options, single)),
        snapshot(&reader(&multi_storage, &multi_options, multi))
    );
}

#[test]
fn test_parallel_merge_matches_serial_merge() {
    let build = |parallel_count: usize| {
        let storage = memory_storage();
        let mut options = options("optimize", "");
        options.merge.parallel_count = parallel_count;
        options.merge.instance_count = 2;
        let mut builder = build_segments(&storage, &options, &[9, 4, 11]);
        builder
            .build(&Document::delete(50).with_field("id", key(0, 3).as_str()))
            .unwrap();
        builder
            .build(
                &Document::update(51)
                    .with_field("id", key(2, 7).as_str())
                    .with_field("price", -1i64),
            )
            .unwrap();
        let version = builder.merge(true).unwrap().unwrap();
        let reader = reader(&storage, &options, version);
        let even = reader.search("title", "even").unwrap();
        (snapshot(&reader), even)
    };

    let (serial, serial_even) = build(1);
    let (parallel, parallel_even) = build(3);
    assert_eq!(serial.len(), 23);
    assert_eq!(serial, parallel);
    assert_eq!(serial_even, parallel_even);
    assert!(serial.contains(&(key(2, 7), -1, "item odd".to_string())));
}

#[test]
fn test_zero_memory_budget_still_merges() {
    let storage = memory_storage();
    let mut options = options("optimize", "");
    options.merge.max_mem_use_mb = 0;
    options.merge.thread_num = 4;
    build_segments(&storage, &options, &[4, 4]);

    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone());
    let meta = merger.prepare_merge(true).unwrap().unwrap();
    let stats = merger.do_merge(&meta, 0).unwrap();
    assert!(stats.final_ceiling > 0);
    let version = merger.end_merge(&meta).unwrap();
    assert_eq!(snapshot(&reader(&storage, &options, version)).len(), 8);
}

#[test]
fn test_reclaim_maps_are_estimated_at_planning() {
    let storage = memory_storage();
    let options = options("optimize", "");
    build_segments(&storage, &options, &[9, 4, 11]);

    let provider = Arc::new(InMemoryMetricProvider::new());
    let merger = IndexPartitionMerger::new(storage.clone(), schema(), options.clone())
        .with_metrics(MetricReporter::new(Some(provider.clone())));
    let meta = merger.prepare_merge(true).unwrap().unwrap();

    let expected: i64 = meta
        .plans()
        .iter()
        .map(|p| ReclaimMap::estimate_memory_use(&p.plan.segments, false, true))
        .sum();
    assert!(expected > 0);
    assert_eq!(provider.value(METRIC_RECLAIM_MAP_MEMORY), Some(expected as f64));
    // the estimate bounds what the built maps hold
    assert!(meta.reclaim_map_memory_use() > 0);
    assert!(meta.reclaim_map_memory_use() <= expected);
}
