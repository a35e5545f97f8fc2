//! Sync Tasks
//!
//! A `SyncPack` is the immutable snapshot of one segment's yielded buffer
//! data, assembled under the write buffer's lock and handed to the sync
//! manager. A `SyncTask` wraps the pack with the collaborators the worker
//! needs to land artifacts and commit the manifest, plus the channel's
//! terminal-failure latch.

use crate::bm25::Bm25Stats;
use crate::metacache::{MetaCache, SegmentLevel};
use crate::meta_writer::MetaWriter;
use crate::segment_buffer::{DeleteData, InsertData};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use vectorhouse_core::{CollectionSchema, LogPosition};

/// Terminal-failure latch for one channel.
///
/// Sync-task failures trip the latch; the write buffer refuses further
/// operations once tripped and the supervisor is expected to tear the
/// channel down and recreate it.
#[derive(Default)]
pub struct ChannelFailure {
    failed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl ChannelFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "Channel entered terminal failure");
        *self.reason.lock().expect("failure latch poisoned") = Some(reason);
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().expect("failure latch poisoned").clone()
    }
}

/// Immutable snapshot of one segment's data to synchronize
pub struct SyncPack {
    pub collection_id: i64,
    pub partition_id: i64,
    pub segment_id: i64,
    pub channel: String,
    pub level: SegmentLevel,

    pub insert: Option<InsertData>,
    pub delta: Option<DeleteData>,
    /// Batch BM25 sketches for the yielded rows, per text field
    pub bm25: HashMap<i64, Bm25Stats>,

    /// Earliest position covered by the yielded data
    pub start_position: Option<LogPosition>,
    /// Channel checkpoint at dispatch time
    pub checkpoint: Option<LogPosition>,
    /// Rows in the insert payload
    pub batch_rows: i64,

    /// Produce merged stats and transition the segment to Flushed
    pub is_flush: bool,
    /// Final task of a channel teardown; removes the segment after commit
    pub is_drop: bool,
}

impl SyncPack {
    /// Timestamp range covered by the pack's payloads
    pub fn ts_range(&self) -> (u64, u64) {
        let mut ts_from = u64::MAX;
        let mut ts_to = 0;
        if let Some(insert) = &self.insert {
            ts_from = ts_from.min(insert.ts_from);
            ts_to = ts_to.max(insert.ts_to);
        }
        if let Some(delta) = &self.delta {
            ts_from = ts_from.min(delta.ts_from);
            ts_to = ts_to.max(delta.ts_to);
        }
        if ts_from == u64::MAX {
            (0, 0)
        } else {
            (ts_from, ts_to)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_none() && self.delta.is_none() && self.bm25.is_empty()
    }
}

/// One unit of work for the sync manager
pub struct SyncTask {
    pub pack: SyncPack,
    pub schema: Arc<CollectionSchema>,
    pub meta_cache: Arc<MetaCache>,
    pub meta_writer: Arc<dyn MetaWriter>,
    pub failure: Arc<ChannelFailure>,
    pub cancel: CancellationToken,
}
