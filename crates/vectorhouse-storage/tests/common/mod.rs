//! Shared fixtures for write-path integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use object_store::memory::InMemory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vectorhouse_core::{
    CollectionSchema, DataType, DeleteBatch, FieldColumn, FieldSchema, InsertBatch, LogPosition,
    PrimaryKey,
};
use vectorhouse_storage::bloom::BloomFilterConfig;
use vectorhouse_storage::{
    Error, ManifestUpdate, MetaCache, MetaWriter, Result, RetryPolicy, SyncManager,
    SyncRetryConfig, WriteBufferConfig,
};

pub const COLLECTION_ID: i64 = 1;
pub const PARTITION_ID: i64 = 2;
pub const CHANNEL: &str = "ch-test-0";

pub fn schema() -> CollectionSchema {
    CollectionSchema::new(
        "docs",
        vec![
            FieldSchema::new(100, "id", DataType::Int64).primary_key(),
            FieldSchema::new(101, "embedding", DataType::FloatVector(2)),
        ],
    )
}

pub fn meta_cache() -> Arc<MetaCache> {
    Arc::new(MetaCache::new(
        COLLECTION_ID,
        CHANNEL,
        schema(),
        BloomFilterConfig::default(),
    ))
}

pub fn fast_retry() -> SyncRetryConfig {
    SyncRetryConfig {
        max_attempts: 3,
        backoff_initial_ms: 1,
        backoff_max_ms: 4,
    }
}

pub fn test_config() -> WriteBufferConfig {
    WriteBufferConfig {
        sync_retry: fast_retry(),
        ..WriteBufferConfig::default()
    }
}

pub fn sync_manager(
    store: Arc<InMemory>,
    allocator: Arc<vectorhouse_storage::LocalAllocator>,
) -> Arc<SyncManager> {
    Arc::new(SyncManager::new(
        store,
        allocator,
        "files",
        RetryPolicy::from(&fast_retry()),
        BloomFilterConfig::default(),
    ))
}

pub fn pos(offset: u64, ts: u64) -> LogPosition {
    LogPosition::new(CHANNEL, offset, ts)
}

/// An insert batch of `ids.len()` rows; timestamps must be parallel to ids
pub fn insert_batch(segment_id: i64, ids: Vec<i64>, timestamps: Vec<u64>) -> InsertBatch {
    assert_eq!(ids.len(), timestamps.len());
    let dim = 2;
    let data = vec![0.5f32; ids.len() * dim];
    InsertBatch {
        segment_id,
        partition_id: PARTITION_ID,
        timestamps,
        fields: HashMap::from([
            (100, FieldColumn::Int64(ids)),
            (
                101,
                FieldColumn::FloatVector {
                    dim: dim as u32,
                    data,
                },
            ),
        ]),
    }
}

pub fn delete_batch(keys: Vec<i64>, timestamps: Vec<u64>) -> DeleteBatch {
    DeleteBatch {
        partition_id: PARTITION_ID,
        primary_keys: keys.into_iter().map(PrimaryKey::Int).collect(),
        timestamps,
    }
}

/// Meta-writer recording every commit, with optional failure injection
#[derive(Default)]
pub struct RecordingMetaWriter {
    pub updates: Mutex<Vec<ManifestUpdate>>,
    pub dropped_channels: Mutex<Vec<String>>,
    /// Fail this many update_manifest calls with Unavailable before
    /// succeeding
    pub fail_updates: AtomicU32,
    /// Delay applied inside update_manifest, for concurrency tests
    pub commit_delay: Option<Duration>,
    /// Commits currently inside update_manifest, and the high-water mark
    pub active_commits: AtomicU32,
    pub max_active_commits: AtomicU32,
}

impl RecordingMetaWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_updates: AtomicU32::new(times),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            commit_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn updates_for(&self, segment_id: i64) -> Vec<ManifestUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.segment_id == segment_id)
            .cloned()
            .collect()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }
}

#[async_trait]
impl MetaWriter for RecordingMetaWriter {
    async fn update_manifest(&self, update: ManifestUpdate) -> Result<()> {
        let active = self.active_commits.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_commits.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        let result = {
            let remaining = self.fail_updates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_updates.store(remaining - 1, Ordering::SeqCst);
                Err(Error::Unavailable("meta service unavailable".into()))
            } else {
                self.updates.lock().unwrap().push(update);
                Ok(())
            }
        };

        self.active_commits.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn drop_channel(&self, channel: &str) -> Result<()> {
        self.dropped_channels.lock().unwrap().push(channel.to_string());
        Ok(())
    }
}

/// Install a test subscriber so RUST_LOG=debug surfaces write-path logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait until `cond` holds or the deadline passes
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within deadline");
}
