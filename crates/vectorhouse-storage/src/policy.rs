//! Sync Policies
//!
//! A sync policy inspects the channel's live segment buffers and decides
//! which segments must be handed to the sync manager. Policies are pure:
//! given the same buffers and channel timestamp they return the same ids,
//! so evaluating the set twice without intervening writes is idempotent.
//! The write buffer manager unions the outputs of all installed policies.

use crate::metacache::{MetaCache, SegmentFilter, SegmentState};
use crate::segment_buffer::SegmentBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Flush timestamp value meaning "no flush requested"
pub const NON_FLUSH_TS: u64 = 0;

type PolicyFn = Box<dyn Fn(&[&SegmentBuffer], u64) -> Vec<i64> + Send + Sync>;

/// A named segment-selection rule
pub struct SyncPolicy {
    name: &'static str,
    select: PolicyFn,
}

impl SyncPolicy {
    pub fn new(name: &'static str, select: PolicyFn) -> Self {
        Self { name, select }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn evaluate(&self, buffers: &[&SegmentBuffer], channel_ts: u64) -> Vec<i64> {
        (self.select)(buffers, channel_ts)
    }
}

/// Segments the meta-cache marks Flushing and which still hold a buffer
pub fn flushing_segments_policy(meta_cache: Arc<MetaCache>) -> SyncPolicy {
    SyncPolicy::new(
        "flushing_segments",
        Box::new(move |buffers, _ts| {
            let flushing = meta_cache
                .segment_ids_by(&SegmentFilter::default().with_states([SegmentState::Flushing]));
            buffers
                .iter()
                .map(|buf| buf.segment_id())
                .filter(|id| flushing.contains(id))
                .collect()
        }),
    )
}

/// Buffers whose latest covered timestamp has reached the flush timestamp
pub fn flush_ts_policy(flush_ts: Arc<AtomicU64>) -> SyncPolicy {
    SyncPolicy::new(
        "flush_ts_reached",
        Box::new(move |buffers, _ts| {
            let flush_ts = flush_ts.load(Ordering::Acquire);
            if flush_ts == NON_FLUSH_TS {
                return Vec::new();
            }
            buffers
                .iter()
                .filter(|buf| {
                    buf.latest_position()
                        .is_some_and(|pos| pos.timestamp >= flush_ts)
                })
                .map(|buf| buf.segment_id())
                .collect()
        }),
    )
}

/// Buffers holding at least `threshold_bytes` of staged data
pub fn size_threshold_policy(threshold_bytes: usize) -> SyncPolicy {
    SyncPolicy::new(
        "size_threshold",
        Box::new(move |buffers, _ts| {
            buffers
                .iter()
                .filter(|buf| buf.memory_size() >= threshold_bytes)
                .map(|buf| buf.segment_id())
                .collect()
        }),
    )
}

/// Buffers holding at least `threshold_rows` staged rows
pub fn row_threshold_policy(threshold_rows: usize) -> SyncPolicy {
    SyncPolicy::new(
        "row_threshold",
        Box::new(move |buffers, _ts| {
            buffers
                .iter()
                .filter(|buf| buf.rows() >= threshold_rows)
                .map(|buf| buf.segment_id())
                .collect()
        }),
    )
}

/// Buffers whose earliest data is older than `max_age_ms` vs the channel
/// timestamp. Timestamps carry millisecond physical time.
pub fn stale_buffer_policy(max_age_ms: u64) -> SyncPolicy {
    SyncPolicy::new(
        "stale_buffer",
        Box::new(move |buffers, channel_ts| {
            buffers
                .iter()
                .filter(|buf| {
                    buf.earliest_position()
                        .is_some_and(|pos| channel_ts.saturating_sub(pos.timestamp) >= max_age_ms)
                })
                .map(|buf| buf.segment_id())
                .collect()
        }),
    )
}
