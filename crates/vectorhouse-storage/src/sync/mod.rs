//! Sync Manager - Serializing Segment Syncs
//!
//! Accepts sync tasks from channel write buffers and executes them with
//! two guarantees:
//!
//! 1. **At most one concurrent task per segment.** Tasks for a busy
//!    segment queue in FIFO order behind the running one, so a segment's
//!    artifacts are always written in dispatch order.
//! 2. **In-flight checkpoint coverage.** Every submitted task registers
//!    its starting position until it resolves - success, failure, or
//!    cancellation - so the channel checkpoint can never advance past
//!    data that left a buffer but has not been committed.
//!
//! ## Task Execution
//!
//! Each task runs the pack writer (serialize, land artifacts, assemble
//! manifest), commits the manifest through the meta-writer, then updates
//! the meta-cache (row accounting, Flushing -> Flushed on flush, entry
//! removal on drop). A permanent failure trips the channel's terminal
//! failure latch; the supervisor recreates the channel.

pub mod pack_writer;
pub mod serializer;
pub mod task;

pub use pack_writer::{BulkPackWriter, COMPOUND_STATS_ID};
pub use task::{ChannelFailure, SyncPack, SyncTask};

use crate::allocator::Allocator;
use crate::bloom::BloomFilterConfig;
use crate::error::{Error, Result};
use crate::metacache::{SegmentAction, SegmentFilter, SegmentState};
use crate::meta_writer::ManifestUpdate;
use crate::retry::{retry_write, RetryPolicy};
use object_store::ObjectStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use vectorhouse_core::LogPosition;

/// Completion handle for one submitted sync task
pub struct SyncHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl SyncHandle {
    /// Wait for the task to resolve
    pub async fn wait(self) -> Result<()> {
        self.rx
            .await
            .map_err(|_| Error::Internal("sync worker terminated".into()))?
    }
}

struct QueuedTask {
    seq: u64,
    task: SyncTask,
    done: oneshot::Sender<Result<()>>,
}

struct InflightEntry {
    channel: String,
    start_position: Option<LogPosition>,
}

#[derive(Default)]
struct SyncState {
    /// segment id => pending tasks, FIFO
    queues: HashMap<i64, VecDeque<QueuedTask>>,
    /// segments with a running worker
    busy: HashSet<i64>,
    /// task seq => start position, held until the task resolves
    inflight: HashMap<u64, InflightEntry>,
    next_seq: u64,
}

/// Executes sync tasks with per-segment serialization
pub struct SyncManager {
    object_store: Arc<dyn ObjectStore>,
    allocator: Arc<dyn Allocator>,
    root_path: String,
    retry: RetryPolicy,
    bloom_config: BloomFilterConfig,
    state: Mutex<SyncState>,
}

impl SyncManager {
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
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Submit a task. Never blocks: the task is queued behind any running
    /// task for the same segment and its starting position is registered
    /// for checkpoint coverage before this call returns.
    pub fn sync_data(self: &Arc<Self>, task: SyncTask) -> SyncHandle {
        let (tx, rx) = oneshot::channel();
        let segment_id = task.pack.segment_id;

        let spawn_worker = {
            let mut state = self.state.lock().expect("sync state lock poisoned");
            let seq = state.next_seq;
            state.next_seq += 1;
            state.inflight.insert(
                seq,
                InflightEntry {
                    channel: task.pack.channel.clone(),
                    start_position: task.pack.start_position.clone(),
                },
            );
            state
                .queues
                .entry(segment_id)
                .or_default()
                .push_back(QueuedTask {
                    seq,
                    task,
                    done: tx,
                });
            state.busy.insert(segment_id)
        };

        if spawn_worker {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.run_segment_worker(segment_id).await;
            });
        }

        SyncHandle { rx }
    }

    /// Earliest start position among the channel's unresolved tasks
    pub fn min_checkpoint(&self, channel: &str) -> Option<LogPosition> {
        let state = self.state.lock().expect("sync state lock poisoned");
        state
            .inflight
            .values()
            .filter(|entry| entry.channel == channel)
            .filter_map(|entry| entry.start_position.clone())
            .min_by_key(|pos| pos.timestamp)
    }

    /// Drain one segment's queue in FIFO order
    async fn run_segment_worker(self: Arc<Self>, segment_id: i64) {
        loop {
            let queued = {
                let mut state = self.state.lock().expect("sync state lock poisoned");
                match state
                    .queues
                    .get_mut(&segment_id)
                    .and_then(|queue| queue.pop_front())
                {
                    Some(queued) => Some(queued),
                    None => {
                        state.queues.remove(&segment_id);
                        state.busy.remove(&segment_id);
                        None
                    }
                }
            };
            let Some(QueuedTask { seq, task, done }) = queued else {
                return;
            };

            let result = self.execute(&task).await;

            // Resolve the in-flight entry only after the task settled so
            // min_checkpoint keeps covering yielded-but-uncommitted data.
            {
                let mut state = self.state.lock().expect("sync state lock poisoned");
                state.inflight.remove(&seq);
            }
            let _ = done.send(result);
        }
    }

    async fn execute(&self, task: &SyncTask) -> Result<()> {
        let pack = &task.pack;
        tracing::info!(
            segment_id = pack.segment_id,
            channel = %pack.channel,
            batch_rows = pack.batch_rows,
            is_flush = pack.is_flush,
            is_drop = pack.is_drop,
            "Executing sync task"
        );

        let result = self.execute_inner(task).await;
        match &result {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                tracing::warn!(segment_id = pack.segment_id, "Sync task cancelled");
            }
            Err(err) => {
                task.failure.fail(format!(
                    "sync of segment {} failed: {err}",
                    pack.segment_id
                ));
            }
        }
        result
    }

    async fn execute_inner(&self, task: &SyncTask) -> Result<()> {
        let pack = &task.pack;

        let mut writer = BulkPackWriter::new(
            Arc::clone(&self.object_store),
            Arc::clone(&self.allocator),
            self.root_path.clone(),
            self.retry.clone(),
            self.bloom_config.clone(),
        );
        let manifest = writer.write(pack, &task.meta_cache, &task.cancel).await?;

        let update = ManifestUpdate {
            channel: pack.channel.clone(),
            collection_id: pack.collection_id,
            partition_id: pack.partition_id,
            segment_id: pack.segment_id,
            manifest,
            checkpoint: pack.checkpoint.clone(),
            batch_rows: pack.batch_rows,
            is_flush: pack.is_flush,
            is_drop: pack.is_drop,
        };
        retry_write(&self.retry, &task.cancel, "update_manifest", || {
            let update = update.clone();
            async move { task.meta_writer.update_manifest(update).await }
        })
        .await
        .map_err(|err| match err {
            Error::Cancelled => Error::Cancelled,
            // Artifacts are already durable; a lost commit is terminal.
            other => Error::Internal(format!("manifest commit failed: {other}")),
        })?;

        let filter = SegmentFilter::default().with_segment_ids([pack.segment_id]);
        let mut actions = vec![SegmentAction::FinishSyncing(pack.batch_rows)];
        if pack.is_flush {
            actions.push(SegmentAction::SetState(SegmentState::Flushed));
        }
        task.meta_cache.update_segments(actions, &filter);

        if pack.is_drop {
            task.meta_cache.remove_segments(&filter);
        }

        tracing::info!(
            segment_id = pack.segment_id,
            size_written = update.manifest.size_written,
            "Sync task committed"
        );
        Ok(())
    }
}
