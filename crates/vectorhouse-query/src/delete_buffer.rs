//! Block-Structured Delete Buffer
//!
//! Holds in-flight deletes for growing segments as a timestamp-ordered
//! list of blocks. The head block is the oldest; new entries append to the
//! tail, opening a fresh block when the tail's byte budget is spent.
//!
//! ## Pinning
//!
//! Readers pin the timestamp their snapshot depends on. Discarding is
//! refused while any pinned timestamp lies strictly below the clean
//! timestamp: a pin protects every delete at or after it, so the check is
//! deliberately conservative rather than per-block.
//!
//! ## L0 Attachment
//!
//! L0 delete segments loaded on the query side register here too; when a
//! clean timestamp passes an L0 segment's start, the segment is released
//! through its handle and the same timestamp drives block discard.

use crate::delete_record::{CacheBlock, SegmentHandle, Timed};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

struct BufferState<T: Timed> {
    blocks: Vec<CacheBlock<T>>,
    /// Cached counters over all blocks
    row_num: i64,
    size: i64,
    /// pinned timestamp => segment ids holding the pin
    pinned: HashMap<u64, HashSet<i64>>,
    l0_segments: Vec<Arc<dyn SegmentHandle>>,
}

/// Timestamp-ordered delete buffer with pinned retention
pub struct ListDeleteBuffer<T: Timed> {
    safe_ts: u64,
    size_per_block: i64,
    state: RwLock<BufferState<T>>,
}

impl<T: Timed> ListDeleteBuffer<T> {
    pub fn new(start_ts: u64, size_per_block: i64) -> Self {
        Self {
            safe_ts: start_ts,
            size_per_block,
            state: RwLock::new(BufferState {
                blocks: vec![CacheBlock::new(start_ts, size_per_block)],
                row_num: 0,
                size: 0,
                pinned: HashMap::new(),
                l0_segments: Vec::new(),
            }),
        }
    }

    /// Append an entry, opening a new block when the tail is full
    pub fn put(&self, entry: T) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        state.row_num += entry.entry_num();
        state.size += entry.size();

        let size_per_block = self.size_per_block;
        let tail = state.blocks.last_mut().expect("block list never empty");
        if let Err(entry) = tail.put(entry) {
            let mut block = CacheBlock::new(entry.timestamp(), size_per_block);
            block
                .put(entry)
                .unwrap_or_else(|_| unreachable!("fresh block rejected first entry"));
            state.blocks.push(block);
        }
    }

    /// All entries with timestamp >= ts, in block order then insertion order
    pub fn list_after(&self, ts: u64) -> Vec<T>
    where
        T: Clone,
    {
        let state = self.state.read().expect("delete buffer lock poisoned");
        state
            .blocks
            .iter()
            .flat_map(|block| block.list_after(ts))
            .cloned()
            .collect()
    }

    pub fn safe_ts(&self) -> u64 {
        self.safe_ts
    }

    /// (entries, bytes) currently held
    pub fn size(&self) -> (i64, i64) {
        let state = self.state.read().expect("delete buffer lock poisoned");
        (state.row_num, state.size)
    }

    /// Protect `ts` from discard on behalf of a segment
    pub fn pin(&self, ts: u64, segment_id: i64) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        state.pinned.entry(ts).or_default().insert(segment_id);
        tracing::debug!(ts, segment_id, "Pinned delete buffer timestamp");
    }

    /// Release a segment's pin; the timestamp entry disappears with its
    /// last holder
    pub fn unpin(&self, ts: u64, segment_id: i64) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        if let Some(holders) = state.pinned.get_mut(&ts) {
            holders.remove(&segment_id);
            if holders.is_empty() {
                state.pinned.remove(&ts);
            }
        }
        tracing::debug!(ts, segment_id, "Unpinned delete buffer timestamp");
    }

    /// Drop head blocks fully covered by `clean_ts`, unless a pin below
    /// `clean_ts` protects them
    pub fn try_discard(&self, clean_ts: u64) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        if Self::is_pinned_before(&state, clean_ts) {
            return;
        }
        Self::discard_blocks(&mut state, clean_ts);
    }

    /// Attach L0 delete segments to the buffer's lifetime
    pub fn register_l0(&self, segments: impl IntoIterator<Item = Arc<dyn SegmentHandle>>) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        for segment in segments {
            tracing::info!(
                segment_id = segment.id(),
                start_ts = segment.start_timestamp(),
                "Registered L0 segment in delete buffer"
            );
            state.l0_segments.push(segment);
        }
    }

    pub fn list_l0(&self) -> Vec<Arc<dyn SegmentHandle>> {
        let state = self.state.read().expect("delete buffer lock poisoned");
        state.l0_segments.clone()
    }

    /// Release L0 segments whose data is fully covered by `ts`, then run
    /// the same discard over the blocks
    pub fn unregister(&self, ts: u64) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        if Self::is_pinned_before(&state, ts) {
            return;
        }

        let mut retained = Vec::new();
        for segment in state.l0_segments.drain(..) {
            if segment.start_timestamp() >= ts {
                retained.push(segment);
            } else {
                tracing::info!(
                    segment_id = segment.id(),
                    start_ts = segment.start_timestamp(),
                    clean_ts = ts,
                    "Releasing L0 segment from delete buffer"
                );
                segment.release();
            }
        }
        state.l0_segments = retained;

        Self::discard_blocks(&mut state, ts);
    }

    /// Release everything and reset to one empty block at the original
    /// safe timestamp
    pub fn clear(&self) {
        let mut state = self.state.write().expect("delete buffer lock poisoned");
        for segment in state.l0_segments.drain(..) {
            segment.release();
        }
        state.blocks = vec![CacheBlock::new(self.safe_ts, self.size_per_block)];
        state.row_num = 0;
        state.size = 0;
    }

    /// Whether any pinned timestamp lies strictly below `clean_ts`.
    /// A pin protects all data after it, so one early pin blocks the
    /// whole discard.
    fn is_pinned_before(state: &BufferState<T>, clean_ts: u64) -> bool {
        for (pinned_ts, holders) in &state.pinned {
            if *pinned_ts < clean_ts && !holders.is_empty() {
                tracing::info!(
                    pinned_ts,
                    clean_ts,
                    holders = holders.len(),
                    "Skipping delete buffer cleanup: timestamp pinned below clean ts"
                );
                return true;
            }
        }
        false
    }

    fn discard_blocks(state: &mut BufferState<T>, clean_ts: u64) {
        if state.blocks.len() == 1 {
            return;
        }
        // Keep from the last block whose head is still covered by clean_ts
        let mut next_head = 0;
        for (idx, block) in state.blocks.iter().enumerate().rev() {
            if block.head_ts <= clean_ts {
                next_head = idx;
                break;
            }
        }
        if next_head == 0 {
            return;
        }

        for block in state.blocks.drain(..next_head) {
            let (rows, bytes) = block.counters();
            state.row_num -= rows;
            state.size -= bytes;
        }
        tracing::debug!(clean_ts, remaining = state.blocks.len(), "Discarded delete blocks");
    }
}
