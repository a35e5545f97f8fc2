//! Pack Writer - Landing Sync Artifacts in Object Storage
//!
//! Executes the write half of one sync task: serialize the pack's payloads
//! into blobs, land every blob in object storage under a pre-allocated log
//! id, and assemble the manifest the meta-writer will commit.
//!
//! ## Artifact Layout
//!
//! Paths are rooted at the configured root:
//!
//! ```text
//! <root>/insert_log/<coll>/<part>/<seg>/<field>/<id>
//! <root>/stats_log/<coll>/<part>/<seg>/<pk-field>/<id>
//! <root>/delta_log/<coll>/<part>/<seg>/<pk-field>/<id>
//! <root>/bm25_log/<coll>/<part>/<seg>/<field>/<id>
//! ```
//!
//! Merged artifacts (flush only) land at the reserved sentinel id instead
//! of an allocated one, so readers can find a segment's compound stats
//! without listing.
//!
//! ## Id Pre-Allocation
//!
//! All log ids for a task are reserved in one allocator call, sized from
//! the pack's contents before the first write. Running out of ids
//! mid-task is therefore a sizing bug, not a runtime condition.

use crate::allocator::Allocator;
use crate::bloom::BloomFilterConfig;
use crate::error::{Error, Result};
use crate::metacache::{MetaCache, SegmentAction, SegmentFilter, SegmentLevel};
use crate::meta_writer::{Binlog, FieldBinlog, SyncManifest};
use crate::retry::{retry_write, RetryPolicy};
use crate::sync::serializer::{Blob, StorageSerializer};
use crate::sync::task::SyncPack;
use bytes::Bytes;
use object_store::{path::Path, ObjectStore};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Insert binlog path prefix
pub const SEGMENT_INSERT_LOG_PATH: &str = "insert_log";
/// PK statistics path prefix
pub const SEGMENT_STATS_LOG_PATH: &str = "stats_log";
/// Delete log path prefix
pub const SEGMENT_DELTA_LOG_PATH: &str = "delta_log";
/// BM25 statistics path prefix
pub const SEGMENT_BM25_LOG_PATH: &str = "bm25_log";

/// Reserved log id for merged (compound) stats artifacts. The allocator
/// hands out ids starting at 1, so the sentinel can never collide.
pub const COMPOUND_STATS_ID: i64 = 0;

/// Writes one sync pack's artifacts; one instance per task execution
pub struct BulkPackWriter {
    object_store: Arc<dyn ObjectStore>,
    allocator: Arc<dyn Allocator>,
    root_path: String,
    retry: RetryPolicy,
    bloom_config: BloomFilterConfig,

    // prefetched log ids, consumed in order
    ids: VecDeque<i64>,
    size_written: i64,
}

impl BulkPackWriter {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        allocator: Arc<dyn Allocator>,
        root_path: impl Into<String>,
        retry: RetryPolicy,
        bloom_config: BloomFilterConfig,
    ) -> Self {
        Self {
            object_store,
            allocator,
            root_path: root_path.into(),
            retry,
            bloom_config,
            ids: VecDeque::new(),
            size_written: 0,
        }
    }

    /// Land every artifact of the pack and return the manifest
    pub async fn write(
        &mut self,
        pack: &SyncPack,
        meta_cache: &MetaCache,
        cancel: &CancellationToken,
    ) -> Result<SyncManifest> {
        let serializer = StorageSerializer::new(meta_cache.schema())?;

        self.prefetch_ids(pack, meta_cache).await?;

        let mut manifest = SyncManifest::default();
        self.write_inserts(pack, &serializer, &mut manifest, cancel)
            .await?;
        self.write_stats(pack, &serializer, meta_cache, &mut manifest, cancel)
            .await?;
        self.write_delta(pack, &serializer, &mut manifest, cancel)
            .await?;
        self.write_bm25(pack, &serializer, meta_cache, &mut manifest, cancel)
            .await?;

        manifest.size_written = self.size_written;
        Ok(manifest)
    }

    /// Whether this flush writes a merged BM25 artifact. The same predicate
    /// sizes the id prefetch, so the write can never come up short.
    fn writes_merged_bm25(&self, pack: &SyncPack, meta_cache: &MetaCache) -> bool {
        pack.is_flush
            && pack.level != SegmentLevel::L0
            && !pack.bm25.is_empty()
            && meta_cache.schema().has_bm25()
    }

    /// Reserve every log id the task needs in one allocator call
    async fn prefetch_ids(&mut self, pack: &SyncPack, meta_cache: &MetaCache) -> Result<()> {
        let mut count = 0u32;
        if let Some(insert) = &pack.insert {
            count += insert.fields.len() as u32 * 2; // binlogs and statslogs
        }
        if pack.is_flush && pack.level != SegmentLevel::L0 {
            // flush reserves a stats id even though merged stats land at
            // the sentinel
            count += 1;
        }
        if pack.delta.is_some() {
            count += 1;
        }
        count += pack.bm25.len() as u32;
        if self.writes_merged_bm25(pack, meta_cache) {
            count += 1;
        }

        if count == 0 {
            return Ok(());
        }
        let (start, _end) = self.allocator.alloc(count).await?;
        self.ids = (start..start + count as i64).collect();
        Ok(())
    }

    fn next_id(&mut self) -> Result<i64> {
        self.ids
            .pop_front()
            .ok_or_else(|| Error::Internal("pre-fetched log ids exhausted".into()))
    }

    /// Upload one blob with retry and describe it as a binlog entry
    async fn write_log(
        &mut self,
        blob: &Blob,
        prefix: &str,
        pack: &SyncPack,
        field_id: i64,
        log_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Binlog> {
        let key = format!(
            "{}/{}/{}/{}/{}/{}/{}",
            self.root_path.trim_end_matches('/'),
            prefix,
            pack.collection_id,
            pack.partition_id,
            pack.segment_id,
            field_id,
            log_id
        );
        let path = Path::from(key.as_str());
        let data = Bytes::from(blob.data.clone());

        let store = Arc::clone(&self.object_store);
        retry_write(&self.retry, cancel, prefix, || {
            let store = Arc::clone(&store);
            let data = data.clone();
            let path = path.clone();
            async move {
                store.put(&path, data).await?;
                Ok(())
            }
        })
        .await?;

        let size = blob.data.len() as i64;
        self.size_written += size;

        let (ts_from, ts_to) = pack.ts_range();
        tracing::debug!(
            segment_id = pack.segment_id,
            field_id,
            log_id,
            size,
            path = %key,
            "Wrote sync artifact"
        );
        Ok(Binlog {
            entries_num: blob.rows,
            ts_from,
            ts_to,
            log_path: key,
            log_size: size,
            memory_size: blob.memory_size,
        })
    }

    async fn write_inserts(
        &mut self,
        pack: &SyncPack,
        serializer: &StorageSerializer,
        manifest: &mut SyncManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(insert) = &pack.insert else {
            return Ok(());
        };
        let blobs = serializer.serialize_inserts(insert)?;
        for (field_id, blob) in blobs {
            let log_id = self.next_id()?;
            let binlog = self
                .write_log(&blob, SEGMENT_INSERT_LOG_PATH, pack, field_id, log_id, cancel)
                .await?;
            manifest.inserts.insert(
                field_id,
                FieldBinlog {
                    field_id,
                    binlogs: vec![binlog],
                },
            );
        }
        Ok(())
    }

    async fn write_stats(
        &mut self,
        pack: &SyncPack,
        serializer: &StorageSerializer,
        meta_cache: &MetaCache,
        manifest: &mut SyncManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let pk_field_id = serializer.pk_field_id();
        let mut binlogs = Vec::new();

        if let Some(insert) = &pack.insert {
            let (stats, blob) = serializer.serialize_pk_stats(insert, &self.bloom_config)?;
            let log_id = self.next_id()?;
            binlogs.push(
                self.write_log(&blob, SEGMENT_STATS_LOG_PATH, pack, pk_field_id, log_id, cancel)
                    .await?,
            );
            meta_cache.update_segments(
                vec![SegmentAction::RollStats(Some(stats))],
                &SegmentFilter::default().with_segment_ids([pack.segment_id]),
            );
        }

        if pack.is_flush && pack.level != SegmentLevel::L0 {
            let blob = meta_cache
                .with_stats_history(pack.segment_id, |history| {
                    serializer.serialize_merged_pk_stats(history)
                })
                .unwrap_or_else(|_| serializer.serialize_merged_pk_stats(&[]))?;
            binlogs.push(
                self.write_log(
                    &blob,
                    SEGMENT_STATS_LOG_PATH,
                    pack,
                    pk_field_id,
                    COMPOUND_STATS_ID,
                    cancel,
                )
                .await?,
            );
        }

        if !binlogs.is_empty() {
            manifest.stats.insert(
                pk_field_id,
                FieldBinlog {
                    field_id: pk_field_id,
                    binlogs,
                },
            );
        }
        Ok(())
    }

    async fn write_delta(
        &mut self,
        pack: &SyncPack,
        serializer: &StorageSerializer,
        manifest: &mut SyncManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(delta) = &pack.delta else {
            return Ok(());
        };
        let blob = serializer.serialize_delta(delta);
        let pk_field_id = serializer.pk_field_id();
        let log_id = self.next_id()?;
        let binlog = self
            .write_log(&blob, SEGMENT_DELTA_LOG_PATH, pack, pk_field_id, log_id, cancel)
            .await?;
        manifest.delta = Some(FieldBinlog {
            field_id: pk_field_id,
            binlogs: vec![binlog],
        });
        Ok(())
    }

    async fn write_bm25(
        &mut self,
        pack: &SyncPack,
        serializer: &StorageSerializer,
        meta_cache: &MetaCache,
        manifest: &mut SyncManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if pack.bm25.is_empty() {
            return Ok(());
        }

        let blobs = serializer.serialize_bm25(&pack.bm25);
        for (field_id, blob) in blobs {
            let log_id = self.next_id()?;
            let binlog = self
                .write_log(&blob, SEGMENT_BM25_LOG_PATH, pack, field_id, log_id, cancel)
                .await?;
            manifest.bm25.insert(
                field_id,
                FieldBinlog {
                    field_id,
                    binlogs: vec![binlog],
                },
            );
        }

        meta_cache.update_segments(
            vec![SegmentAction::MergeBm25Stats(pack.bm25.clone())],
            &SegmentFilter::default().with_segment_ids([pack.segment_id]),
        );

        if self.writes_merged_bm25(pack, meta_cache) {
            let totals = meta_cache.synced_bm25(pack.segment_id)?;
            for (field_id, blob) in serializer.serialize_bm25(&totals) {
                let binlog = self
                    .write_log(
                        &blob,
                        SEGMENT_BM25_LOG_PATH,
                        pack,
                        field_id,
                        COMPOUND_STATS_ID,
                        cancel,
                    )
                    .await?;
                manifest
                    .bm25
                    .entry(field_id)
                    .or_insert_with(|| FieldBinlog {
                        field_id,
                        binlogs: Vec::new(),
                    })
                    .binlogs
                    .push(binlog);
            }
        }
        Ok(())
    }
}
