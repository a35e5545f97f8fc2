//! Sync manager and pack writer tests: per-segment serialization, artifact
//! layout, flush edge cases, and cancellation.

mod common;

use common::*;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vectorhouse_core::{CollectionSchema, DataType, FieldSchema, LogPosition};
use vectorhouse_storage::{
    ChannelFailure, Error, LocalAllocator, MetaCache, SegmentInfo, SegmentLevel, SegmentState,
    SyncManager, SyncPack, SyncTask, WriteBuffer,
};

struct SyncHarness {
    store: Arc<InMemory>,
    sync_mgr: Arc<SyncManager>,
    meta_cache: Arc<MetaCache>,
    meta_writer: Arc<RecordingMetaWriter>,
    failure: Arc<ChannelFailure>,
}

fn sync_harness(meta_writer: Arc<RecordingMetaWriter>) -> SyncHarness {
    init_tracing();
    let store = Arc::new(InMemory::new());
    let allocator = Arc::new(LocalAllocator::new());
    let meta_cache = meta_cache();
    let sync_mgr = sync_manager(store.clone(), allocator);
    SyncHarness {
        store,
        sync_mgr,
        meta_cache,
        meta_writer,
        failure: Arc::new(ChannelFailure::new()),
    }
}

fn empty_pack(segment_id: i64, is_flush: bool, start_ts: Option<u64>) -> SyncPack {
    SyncPack {
        collection_id: COLLECTION_ID,
        partition_id: PARTITION_ID,
        segment_id,
        channel: CHANNEL.to_string(),
        level: SegmentLevel::L1,
        insert: None,
        delta: None,
        bm25: HashMap::new(),
        start_position: start_ts.map(|ts| LogPosition::new(CHANNEL, ts, ts)),
        checkpoint: None,
        batch_rows: 0,
        is_flush,
        is_drop: false,
    }
}

fn task_for(h: &SyncHarness, pack: SyncPack) -> SyncTask {
    SyncTask {
        pack,
        schema: Arc::new(schema()),
        meta_cache: h.meta_cache.clone(),
        meta_writer: h.meta_writer.clone(),
        failure: h.failure.clone(),
        cancel: CancellationToken::new(),
    }
}

fn register_segment(h: &SyncHarness, segment_id: i64, state: SegmentState) {
    let mut info = SegmentInfo::new(
        segment_id,
        PARTITION_ID,
        COLLECTION_ID,
        SegmentState::Growing,
        SegmentLevel::L1,
    );
    info.state = state;
    h.meta_cache.add_segment(info).unwrap();
}

#[tokio::test]
async fn test_empty_flush_writes_only_merged_stats() {
    let h = sync_harness(RecordingMetaWriter::new());
    register_segment(&h, 300, SegmentState::Flushing);

    let handle = h.sync_mgr.sync_data(task_for(&h, empty_pack(300, true, None)));
    handle.wait().await.unwrap();

    let update = &h.meta_writer.updates_for(300)[0];
    assert!(update.manifest.inserts.is_empty());
    assert!(update.manifest.delta.is_none());
    assert!(update.manifest.bm25.is_empty());

    // Exactly one artifact: merged stats at the sentinel id
    let stats = &update.manifest.stats[&100];
    assert_eq!(stats.binlogs.len(), 1);
    let path = &stats.binlogs[0].log_path;
    assert!(path.contains("stats_log"));
    assert!(path.ends_with("/0"), "merged stats at sentinel id: {path}");
    h.store.head(&Path::from(path.as_str())).await.unwrap();

    // Flush transitioned the segment
    assert_eq!(h.meta_cache.get(300).unwrap().state, SegmentState::Flushed);
}

#[tokio::test]
async fn test_empty_flush_l0_writes_nothing() {
    let h = sync_harness(RecordingMetaWriter::new());
    let mut info = SegmentInfo::new(
        301,
        PARTITION_ID,
        COLLECTION_ID,
        SegmentState::Flushing,
        SegmentLevel::L0,
    );
    info.state = SegmentState::Flushing;
    h.meta_cache.add_segment(info).unwrap();

    let mut pack = empty_pack(301, true, None);
    pack.level = SegmentLevel::L0;
    let handle = h.sync_mgr.sync_data(task_for(&h, pack));
    handle.wait().await.unwrap();

    let update = &h.meta_writer.updates_for(301)[0];
    assert!(update.manifest.stats.is_empty());
    assert_eq!(update.manifest.size_written, 0);
}

#[tokio::test]
async fn test_per_segment_fifo_and_at_most_one_writer() {
    let meta_writer = RecordingMetaWriter::slow(Duration::from_millis(50));
    let h = sync_harness(meta_writer);
    register_segment(&h, 400, SegmentState::Growing);

    // Three tasks for the same segment, distinguishable by start position
    let handles: Vec<_> = (0..3)
        .map(|i| {
            h.sync_mgr
                .sync_data(task_for(&h, empty_pack(400, false, Some(10 + i))))
        })
        .collect();

    // While earlier tasks run, later start positions stay registered
    let min = h.sync_mgr.min_checkpoint(CHANNEL).unwrap();
    assert_eq!(min.timestamp, 10);

    for handle in handles {
        handle.wait().await.unwrap();
    }

    // Serialized execution, in submission order
    use std::sync::atomic::Ordering;
    assert_eq!(h.meta_writer.max_active_commits.load(Ordering::SeqCst), 1);
    assert_eq!(h.meta_writer.update_count(), 3);

    // Everything resolved: nothing in flight any more
    assert!(h.sync_mgr.min_checkpoint(CHANNEL).is_none());
}

#[tokio::test]
async fn test_distinct_segments_sync_concurrently() {
    let meta_writer = RecordingMetaWriter::slow(Duration::from_millis(30));
    let h = sync_harness(meta_writer);
    register_segment(&h, 500, SegmentState::Growing);
    register_segment(&h, 501, SegmentState::Growing);

    let a = h.sync_mgr.sync_data(task_for(&h, empty_pack(500, false, Some(5))));
    let b = h.sync_mgr.sync_data(task_for(&h, empty_pack(501, false, Some(6))));
    a.wait().await.unwrap();
    b.wait().await.unwrap();

    use std::sync::atomic::Ordering;
    // No per-segment conflict, so the two commits may overlap
    assert!(h.meta_writer.max_active_commits.load(Ordering::SeqCst) >= 1);
    assert_eq!(h.meta_writer.update_count(), 2);
}

#[tokio::test]
async fn test_cancelled_task_resolves_without_failing_channel() {
    let h = sync_harness(RecordingMetaWriter::new());
    register_segment(&h, 600, SegmentState::Growing);

    let mut task = task_for(&h, empty_pack(600, false, Some(10)));
    task.cancel = CancellationToken::new();
    task.cancel.cancel();

    let handle = h.sync_mgr.sync_data(task);
    let result = handle.wait().await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // Cancellation is not terminal, and the in-flight entry resolved
    assert!(!h.failure.is_failed());
    assert!(h.sync_mgr.min_checkpoint(CHANNEL).is_none());
    assert_eq!(h.meta_writer.update_count(), 0);
}

#[tokio::test]
async fn test_artifact_path_layout() {
    // Drive a real insert through the write buffer to observe full paths
    let store = Arc::new(InMemory::new());
    let allocator = Arc::new(LocalAllocator::new());
    let meta_cache = meta_cache();
    let sync_mgr = sync_manager(store.clone(), allocator.clone());
    let meta_writer = RecordingMetaWriter::new();
    let wb = WriteBuffer::new(
        meta_cache,
        sync_mgr,
        meta_writer.clone(),
        allocator,
        test_config(),
    )
    .unwrap();

    wb.buffer_data(
        &[insert_batch(100, vec![1, 2], vec![10, 11])],
        &[delete_batch(vec![1], vec![12])],
        &pos(0, 10),
        &pos(1, 12),
    )
    .await
    .unwrap();
    wb.flush_segments(&[100]).unwrap();
    wb.trigger_sync().unwrap();
    wait_for(|| meta_writer.update_count() == 1).await;

    let manifest = &meta_writer.updates_for(100)[0].manifest;
    let insert_path = &manifest.inserts[&100].binlogs[0].log_path;
    assert!(
        insert_path.starts_with("files/insert_log/1/2/100/100/"),
        "unexpected insert path: {insert_path}"
    );
    let delta_path = &manifest.delta.as_ref().unwrap().binlogs[0].log_path;
    assert!(
        delta_path.starts_with("files/delta_log/1/2/100/100/"),
        "unexpected delta path: {delta_path}"
    );

    // Every manifest entry exists in the object store with its exact size
    for binlog in manifest
        .inserts
        .values()
        .chain(manifest.stats.values())
        .flat_map(|fb| fb.binlogs.iter())
        .chain(manifest.delta.iter().flat_map(|fb| fb.binlogs.iter()))
    {
        let meta = store
            .head(&Path::from(binlog.log_path.as_str()))
            .await
            .unwrap();
        assert_eq!(meta.size as i64, binlog.log_size);
    }
}

#[tokio::test]
async fn test_bm25_artifacts_batch_and_merged() {
    let bm25_schema = CollectionSchema::new(
        "docs",
        vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(102, "body", DataType::VarChar).with_bm25(),
        ],
    );
    let store = Arc::new(InMemory::new());
    let allocator = Arc::new(LocalAllocator::new());
    let meta_cache = Arc::new(MetaCache::new(
        COLLECTION_ID,
        CHANNEL,
        bm25_schema.clone(),
        vectorhouse_storage::BloomFilterConfig::default(),
    ));
    let sync_mgr = sync_manager(store, allocator.clone());
    let meta_writer = RecordingMetaWriter::new();
    let wb = WriteBuffer::new(
        meta_cache,
        sync_mgr,
        meta_writer.clone(),
        allocator,
        test_config(),
    )
    .unwrap();

    let batch = vectorhouse_core::InsertBatch {
        segment_id: 100,
        partition_id: PARTITION_ID,
        timestamps: vec![10, 11],
        fields: HashMap::from([
            (100, vectorhouse_core::FieldColumn::Int64(vec![1, 2])),
            (
                102,
                vectorhouse_core::FieldColumn::VarChar(vec![
                    "quick brown fox".into(),
                    "lazy dog".into(),
                ]),
            ),
        ]),
    };
    wb.buffer_data(&[batch], &[], &pos(0, 10), &pos(1, 11))
        .await
        .unwrap();
    wb.flush_segments(&[100]).unwrap();
    wb.trigger_sync().unwrap();
    wait_for(|| meta_writer.update_count() == 1).await;

    let manifest = &meta_writer.updates_for(100)[0].manifest;
    let bm25 = &manifest.bm25[&102];
    // Batch blob plus the merged blob at the sentinel id
    assert_eq!(bm25.binlogs.len(), 2);
    assert_eq!(bm25.binlogs[0].entries_num, 2);
    assert!(bm25.binlogs[1].log_path.ends_with("/0"));
}

#[tokio::test]
async fn test_drop_task_removes_segment_after_commit() {
    let h = sync_harness(RecordingMetaWriter::new());
    register_segment(&h, 700, SegmentState::Growing);

    let mut pack = empty_pack(700, false, Some(10));
    pack.is_drop = true;
    let handle = h.sync_mgr.sync_data(task_for(&h, pack));
    handle.wait().await.unwrap();

    assert!(h.meta_writer.updates_for(700)[0].is_drop);
    assert!(h.meta_cache.get(700).is_none());
}
