//! Channel Write Buffer
//!
//! One `WriteBuffer` per channel orchestrates the whole ingest path:
//! buffer incoming insert/delete mutations per segment, keep the segment
//! meta-cache current, evaluate sync policies, and hand ripe segments to
//! the sync manager - all while publishing a channel checkpoint that
//! never runs ahead of unsynced data.
//!
//! ## Write Flow
//!
//! ```text
//! buffer_data(inserts, deletes, start, end)
//!     ↓
//! validate everything           ← nothing is mutated on invalid input
//!     ↓
//! stage inserts per segment     ← meta-cache: bloom, BM25, row counts
//!     ↓
//! route deletes                 ← bloom-filter oracle or L0 segment
//!     ↓
//! advance checkpoint            ← only forward, never past live buffers
//!     ↓
//! evaluate sync policies        ← union across the policy set
//!     ↓
//! yield + submit sync tasks     ← buffer ownership moves to the task
//! ```
//!
//! ## Delete Routing
//!
//! Under `BloomFilterPkOracle`, each delete key is probed against every
//! live segment's pk filters and buffered into each candidate's delta
//! buffer. Under `L0Delta`, all deletes of a partition land in one
//! dedicated delete-only L0 segment, allocated lazily.
//!
//! ## Locking
//!
//! One `RwLock` guards the buffer map and checkpoint. Nothing suspends
//! while it is held: sync-task submission is non-blocking and the yielded
//! payloads are moved out before submission, so a slow object store can
//! never stall ingest.

use crate::allocator::Allocator;
use crate::config::{DeletePolicy, WriteBufferConfig};
use crate::error::{Error, Result};
use crate::metacache::{
    MetaCache, SegmentAction, SegmentFilter, SegmentInfo, SegmentLevel, SegmentState,
};
use crate::meta_writer::MetaWriter;
use crate::policy::{
    flush_ts_policy, flushing_segments_policy, row_threshold_policy, size_threshold_policy,
    stale_buffer_policy, SyncPolicy,
};
use crate::retry::{retry_write, RetryPolicy};
use crate::segment_buffer::SegmentBuffer;
use crate::sync::{ChannelFailure, SyncHandle, SyncManager, SyncPack, SyncTask};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use vectorhouse_core::{
    position::earliest_position, CollectionSchema, DeleteBatch, InsertBatch, LogPosition,
};

struct Inner {
    /// segment id => live buffer; a yielded segment has no entry
    buffers: HashMap<i64, SegmentBuffer>,
    /// End position of the last accepted batch
    checkpoint: Option<LogPosition>,
    /// partition id => dedicated delete-only segment (L0Delta policy)
    l0_segments: HashMap<i64, i64>,
    /// Bytes staged across all buffers
    memory_used: usize,
    closed: bool,
}

/// Per-channel ingest orchestrator
pub struct WriteBuffer {
    channel: String,
    collection_id: i64,
    schema: Arc<CollectionSchema>,

    meta_cache: Arc<MetaCache>,
    sync_mgr: Arc<SyncManager>,
    meta_writer: Arc<dyn MetaWriter>,
    allocator: Arc<dyn Allocator>,

    config: WriteBufferConfig,
    retry: RetryPolicy,
    policies: Vec<SyncPolicy>,
    flush_ts: Arc<AtomicU64>,
    failure: Arc<ChannelFailure>,

    inner: RwLock<Inner>,
}

impl WriteBuffer {
    pub fn new(
        meta_cache: Arc<MetaCache>,
        sync_mgr: Arc<SyncManager>,
        meta_writer: Arc<dyn MetaWriter>,
        allocator: Arc<dyn Allocator>,
        config: WriteBufferConfig,
    ) -> Result<Self> {
        let schema = meta_cache.schema();
        let pk_field = schema
            .primary_field()
            .ok_or_else(|| Error::InvalidArgument("schema has no primary key field".into()))?;
        if !pk_field.data_type.valid_primary_key() {
            return Err(Error::InvalidArgument(format!(
                "field {} cannot carry the primary key",
                pk_field.name
            )));
        }

        let flush_ts = Arc::new(AtomicU64::new(crate::policy::NON_FLUSH_TS));
        let policies = vec![
            flushing_segments_policy(Arc::clone(&meta_cache)),
            flush_ts_policy(Arc::clone(&flush_ts)),
            size_threshold_policy(config.size_threshold_bytes),
            row_threshold_policy(config.row_threshold),
            stale_buffer_policy(config.stale_duration_ms),
        ];

        Ok(Self {
            channel: meta_cache.channel().to_string(),
            collection_id: meta_cache.collection_id(),
            schema: Arc::new(schema.clone()),
            retry: RetryPolicy::from(&config.sync_retry),
            meta_cache,
            sync_mgr,
            meta_writer,
            allocator,
            config,
            policies,
            flush_ts,
            failure: Arc::new(ChannelFailure::new()),
            inner: RwLock::new(Inner {
                buffers: HashMap::new(),
                checkpoint: None,
                l0_segments: HashMap::new(),
                memory_used: 0,
                closed: false,
            }),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The channel's terminal-failure latch, for the supervisor to watch
    pub fn failure(&self) -> &Arc<ChannelFailure> {
        &self.failure
    }

    /// Whether the segment currently holds a live buffer
    pub fn has_segment(&self, segment_id: i64) -> bool {
        self.inner
            .read()
            .expect("write buffer lock poisoned")
            .buffers
            .contains_key(&segment_id)
    }

    pub fn set_flush_timestamp(&self, flush_ts: u64) {
        self.flush_ts.store(flush_ts, Ordering::Release);
    }

    pub fn get_flush_timestamp(&self) -> u64 {
        self.flush_ts.load(Ordering::Acquire)
    }

    /// Buffer one log batch of mutations and dispatch any ripe syncs.
    ///
    /// Validation happens before any state is touched, so an invalid batch
    /// leaves the buffer exactly as it was.
    pub async fn buffer_data(
        &self,
        inserts: &[InsertBatch],
        deletes: &[DeleteBatch],
        start: &LogPosition,
        end: &LogPosition,
    ) -> Result<()> {
        self.check_failed()?;

        for batch in inserts {
            batch.validate(&self.schema)?;
            if let Some(info) = self.meta_cache.get(batch.segment_id) {
                if info.state == SegmentState::Dropped {
                    return Err(Error::Aborted(format!(
                        "segment {} is dropped",
                        batch.segment_id
                    )));
                }
            }
        }
        for batch in deletes {
            batch.validate()?;
        }

        let incoming: usize = inserts.iter().map(|b| b.memory_size()).sum::<usize>()
            + deletes
                .iter()
                .map(|d| {
                    d.primary_keys
                        .iter()
                        .map(|pk| pk.memory_size() + 8)
                        .sum::<usize>()
                })
                .sum::<usize>();
        {
            let inner = self.inner.read().expect("write buffer lock poisoned");
            self.check_accepting(&inner, incoming)?;
        }

        // L0 segment ids come from the allocator; reserve them before the
        // write lock so nothing suspends while it is held.
        let l0_reserved = self.reserve_l0_segments(deletes, start).await?;

        let mut inner = self.inner.write().expect("write buffer lock poisoned");
        self.check_accepting(&inner, incoming)?;

        self.buffer_inserts(&mut inner, inserts, start, end)?;
        self.route_deletes(&mut inner, deletes, &l0_reserved, start, end)?;

        // Checkpoint only moves forward
        if inner
            .checkpoint
            .as_ref()
            .map_or(true, |ckpt| end.timestamp > ckpt.timestamp)
        {
            inner.checkpoint = Some(end.clone());
        }

        self.dispatch_ripe_segments(&mut inner);
        inner.memory_used = inner.buffers.values().map(|b| b.memory_size()).sum();
        Ok(())
    }

    /// Mark segments for flush. Growing segments transition directly;
    /// importing segments transition in a separate pass. The flushing
    /// policy emits the sync tasks on the next buffer_data or tick.
    pub fn flush_segments(&self, segment_ids: &[i64]) -> Result<()> {
        self.check_failed()?;

        self.meta_cache.update_segments(
            vec![SegmentAction::SetState(SegmentState::Flushing)],
            &SegmentFilter::default()
                .with_segment_ids(segment_ids.iter().copied())
                .with_states([SegmentState::Growing]),
        );
        self.meta_cache.update_segments(
            vec![SegmentAction::SetState(SegmentState::Flushing)],
            &SegmentFilter::default()
                .with_segment_ids(segment_ids.iter().copied())
                .with_states([SegmentState::Importing]),
        );
        Ok(())
    }

    /// Run the sync policies without new data, e.g. from a periodic tick
    pub fn trigger_sync(&self) -> Result<()> {
        self.check_failed()?;
        let mut inner = self.inner.write().expect("write buffer lock poisoned");
        if inner.closed {
            return Ok(());
        }
        self.dispatch_ripe_segments(&mut inner);
        inner.memory_used = inner.buffers.values().map(|b| b.memory_size()).sum();
        Ok(())
    }

    /// Lower bound on durably-accounted log positions: the earliest of
    /// buffered data, in-flight sync starts, and the stored checkpoint.
    pub fn min_checkpoint(&self) -> Option<LogPosition> {
        let inner = self.inner.read().expect("write buffer lock poisoned");
        let candidates = inner
            .buffers
            .values()
            .map(|buf| buf.earliest_position())
            .chain([self.sync_mgr.min_checkpoint(&self.channel)]);
        earliest_position(candidates).or_else(|| inner.checkpoint.clone())
    }

    /// Close the channel. With `drop` unset this is a no-op; with it set,
    /// every live buffer is synced one last time with the drop flag, then
    /// the channel is removed from cluster metadata. Any failure is
    /// terminal for the channel.
    pub async fn close(&self, drop: bool) -> Result<()> {
        if !drop {
            return Ok(());
        }

        let handles: Vec<SyncHandle> = {
            let mut inner = self.inner.write().expect("write buffer lock poisoned");
            inner.closed = true;
            let ids: Vec<i64> = inner.buffers.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| self.take_sync_task(&mut inner, id, true))
                .map(|task| self.sync_mgr.sync_data(task))
                .collect()
        };

        let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;
        for result in results {
            result?;
        }

        let cancel = CancellationToken::new();
        retry_write(&self.retry, &cancel, "drop_channel", || {
            self.meta_writer.drop_channel(&self.channel)
        })
        .await
        .map_err(|err| {
            self.failure
                .fail(format!("dropping channel {} failed: {err}", self.channel));
            err
        })?;

        tracing::info!(channel = %self.channel, "Channel closed and dropped");
        Ok(())
    }

    fn check_failed(&self) -> Result<()> {
        if self.failure.is_failed() {
            return Err(Error::ChannelFailed(self.channel.clone()));
        }
        Ok(())
    }

    fn check_accepting(&self, inner: &Inner, incoming: usize) -> Result<()> {
        if inner.closed {
            return Err(Error::Aborted(format!("channel {} is closed", self.channel)));
        }
        if inner.memory_used + incoming > self.config.memory_limit_bytes {
            return Err(Error::ResourceExhausted(format!(
                "buffer memory {} + incoming {} exceeds cap {}",
                inner.memory_used, incoming, self.config.memory_limit_bytes
            )));
        }
        Ok(())
    }

    fn buffer_inserts(
        &self,
        inner: &mut Inner,
        inserts: &[InsertBatch],
        start: &LogPosition,
        end: &LogPosition,
    ) -> Result<()> {
        for batch in inserts {
            if self.meta_cache.get(batch.segment_id).is_none() {
                self.meta_cache.add_segment(
                    SegmentInfo::new(
                        batch.segment_id,
                        batch.partition_id,
                        self.collection_id,
                        SegmentState::Growing,
                        SegmentLevel::L1,
                    )
                    .with_start_position(start.clone()),
                )?;
            }

            let buffer = Self::get_or_create_buffer(
                &mut inner.buffers,
                batch.segment_id,
                &self.schema,
            )?;
            let buffered = buffer.buffer_insert(&self.schema, batch, start, end)?;
            let rows = buffer.rows() as i64;

            self.meta_cache
                .update_pk_range(batch.segment_id, &buffered.primary_keys)?;
            if !buffered.bm25.is_empty() {
                self.meta_cache
                    .update_bm25_live(batch.segment_id, &buffered.bm25)?;
            }
            self.meta_cache.update_segments(
                vec![SegmentAction::UpdateBufferedRows(rows)],
                &SegmentFilter::default().with_segment_ids([batch.segment_id]),
            );
        }
        Ok(())
    }

    /// Reserve L0 segment ids for partitions that have none yet.
    /// Only used under the L0Delta policy.
    async fn reserve_l0_segments(
        &self,
        deletes: &[DeleteBatch],
        start: &LogPosition,
    ) -> Result<HashMap<i64, i64>> {
        if self.config.delete_policy != DeletePolicy::L0Delta || deletes.is_empty() {
            return Ok(HashMap::new());
        }

        let missing: Vec<i64> = {
            let inner = self.inner.read().expect("write buffer lock poisoned");
            deletes
                .iter()
                .map(|d| d.partition_id)
                .filter(|p| !inner.l0_segments.contains_key(p))
                .collect::<BTreeSet<i64>>()
                .into_iter()
                .collect()
        };

        let mut reserved = HashMap::new();
        for partition_id in missing {
            let (segment_id, _) = self.allocator.alloc(1).await?;
            self.meta_cache.add_segment(
                SegmentInfo::new(
                    segment_id,
                    partition_id,
                    self.collection_id,
                    SegmentState::Growing,
                    SegmentLevel::L0,
                )
                .with_start_position(start.clone()),
            )?;
            tracing::info!(
                segment_id,
                partition_id,
                "Allocated L0 delete segment"
            );
            reserved.insert(partition_id, segment_id);
        }
        Ok(reserved)
    }

    fn route_deletes(
        &self,
        inner: &mut Inner,
        deletes: &[DeleteBatch],
        l0_reserved: &HashMap<i64, i64>,
        start: &LogPosition,
        end: &LogPosition,
    ) -> Result<()> {
        match self.config.delete_policy {
            DeletePolicy::BloomFilterPkOracle => {
                // Probe every live non-L0 segment's filters per key
                let live = SegmentFilter::default()
                    .with_states([
                        SegmentState::Growing,
                        SegmentState::Sealed,
                        SegmentState::Flushing,
                        SegmentState::Importing,
                    ])
                    .with_levels([SegmentLevel::L1]);
                for batch in deletes {
                    for (pk, ts) in batch.primary_keys.iter().zip(&batch.timestamps) {
                        for segment_id in self.meta_cache.predict_segments(pk, &live) {
                            let buffer = Self::get_or_create_buffer(
                                &mut inner.buffers,
                                segment_id,
                                &self.schema,
                            )?;
                            buffer.buffer_delete(
                                std::slice::from_ref(pk),
                                std::slice::from_ref(ts),
                                start,
                                end,
                            );
                        }
                    }
                }
            }
            DeletePolicy::L0Delta => {
                for batch in deletes {
                    let segment_id = {
                        let known = inner.l0_segments.get(&batch.partition_id).copied();
                        match known.or_else(|| l0_reserved.get(&batch.partition_id).copied()) {
                            Some(id) => id,
                            None => {
                                return Err(Error::Internal(format!(
                                    "no L0 segment reserved for partition {}",
                                    batch.partition_id
                                )))
                            }
                        }
                    };
                    inner.l0_segments.insert(batch.partition_id, segment_id);

                    let buffer = Self::get_or_create_buffer(
                        &mut inner.buffers,
                        segment_id,
                        &self.schema,
                    )?;
                    buffer.buffer_delete(&batch.primary_keys, &batch.timestamps, start, end);
                }
            }
        }
        Ok(())
    }

    fn get_or_create_buffer<'a>(
        buffers: &'a mut HashMap<i64, SegmentBuffer>,
        segment_id: i64,
        schema: &CollectionSchema,
    ) -> Result<&'a mut SegmentBuffer> {
        if !buffers.contains_key(&segment_id) {
            buffers.insert(segment_id, SegmentBuffer::new(segment_id, schema)?);
        }
        Ok(buffers
            .get_mut(&segment_id)
            .expect("buffer just inserted"))
    }

    /// Union the policy outputs and submit one sync task per ripe segment
    fn dispatch_ripe_segments(&self, inner: &mut Inner) {
        let channel_ts = inner
            .checkpoint
            .as_ref()
            .map(|ckpt| ckpt.timestamp)
            .unwrap_or(0);

        let buffers: Vec<&SegmentBuffer> = inner.buffers.values().collect();
        let mut ripe = BTreeSet::new();
        for policy in &self.policies {
            let picked = policy.evaluate(&buffers, channel_ts);
            if !picked.is_empty() {
                tracing::info!(
                    policy = policy.name(),
                    segment_ids = ?picked,
                    "Sync policy selected segments"
                );
                ripe.extend(picked);
            }
        }
        drop(buffers);

        for segment_id in ripe {
            if let Some(task) = self.take_sync_task(inner, segment_id, false) {
                // Errors surface through the failure latch; the handle is
                // only awaited during close.
                let _handle = self.sync_mgr.sync_data(task);
            }
        }
    }

    /// Yield the segment's buffer and assemble a sync task. Returns `None`
    /// when the meta-cache no longer knows the segment.
    fn take_sync_task(
        &self,
        inner: &mut Inner,
        segment_id: i64,
        is_drop: bool,
    ) -> Option<SyncTask> {
        let Some(info) = self.meta_cache.get(segment_id) else {
            tracing::warn!(segment_id, "Segment missing from meta cache, skipping sync");
            return None;
        };

        let (insert, delta, bm25, start_position) = match inner.buffers.remove(&segment_id) {
            Some(buffer) => buffer.yield_payload(),
            None => (None, None, HashMap::new(), None),
        };
        let batch_rows = insert.as_ref().map(|i| i.num_rows as i64).unwrap_or(0);

        let mut actions = vec![SegmentAction::RollStats(None)];
        if insert.is_some() {
            actions.push(SegmentAction::StartSyncing(batch_rows));
        }
        self.meta_cache.update_segments(
            actions,
            &SegmentFilter::default().with_segment_ids([segment_id]),
        );

        let pack = SyncPack {
            collection_id: self.collection_id,
            partition_id: info.partition_id,
            segment_id,
            channel: self.channel.clone(),
            level: info.level,
            insert,
            delta,
            bm25,
            start_position,
            checkpoint: inner.checkpoint.clone(),
            batch_rows,
            is_flush: info.state == SegmentState::Flushing,
            is_drop,
        };
        Some(SyncTask {
            pack,
            schema: Arc::clone(&self.schema),
            meta_cache: Arc::clone(&self.meta_cache),
            meta_writer: Arc::clone(&self.meta_writer),
            failure: Arc::clone(&self.failure),
            cancel: CancellationToken::new(),
        })
    }
}
