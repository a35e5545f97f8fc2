//! Delete Entries and Cache Blocks
//!
//! A `DeleteRecord` is one batch of applied deletes: primary keys, their
//! delete timestamps, and the batch's byte size. Records are stored in
//! append-only `CacheBlock`s; a block is sealed once its byte budget is
//! spent and a new block starts at the next record's timestamp.

use vectorhouse_core::PrimaryKey;

/// Anything the delete buffer can store: timestamped, countable, sized
pub trait Timed {
    /// Timestamp ordering the entry within the buffer
    fn timestamp(&self) -> u64;
    /// Number of delete entries in this record
    fn entry_num(&self) -> i64;
    /// Byte size of this record
    fn size(&self) -> i64;
}

/// One batch of deletes applied on the query side
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    pub primary_keys: Vec<PrimaryKey>,
    pub timestamps: Vec<u64>,
}

impl DeleteRecord {
    pub fn new(primary_keys: Vec<PrimaryKey>, timestamps: Vec<u64>) -> Self {
        Self {
            primary_keys,
            timestamps,
        }
    }
}

impl Timed for DeleteRecord {
    fn timestamp(&self) -> u64 {
        self.timestamps.first().copied().unwrap_or(0)
    }

    fn entry_num(&self) -> i64 {
        self.primary_keys.len() as i64
    }

    fn size(&self) -> i64 {
        self.primary_keys
            .iter()
            .map(|pk| pk.memory_size() as i64 + 8)
            .sum()
    }
}

/// Query-side view of an L0 delete segment attached to the buffer.
///
/// The segment lifecycle itself lives elsewhere; the buffer only needs
/// identity, the start position timestamp, and a way to release.
pub trait SegmentHandle: Send + Sync {
    fn id(&self) -> i64;
    fn start_timestamp(&self) -> u64;
    /// Release the segment's resources; called when the buffer lets go
    fn release(&self);
}

pub(crate) struct CacheBlock<T: Timed> {
    pub head_ts: u64,
    size_cap: i64,
    size: i64,
    entries: Vec<T>,
}

impl<T: Timed> CacheBlock<T> {
    pub fn new(head_ts: u64, size_cap: i64) -> Self {
        Self {
            head_ts,
            size_cap,
            size: 0,
            entries: Vec::new(),
        }
    }

    /// Append unless the block's byte budget is already spent.
    /// Returns the entry back when full so the caller can open a new block.
    pub fn put(&mut self, entry: T) -> Result<(), T> {
        if !self.entries.is_empty() && self.size >= self.size_cap {
            return Err(entry);
        }
        self.size += entry.size();
        self.entries.push(entry);
        Ok(())
    }

    pub fn list_after(&self, ts: u64) -> impl Iterator<Item = &T> {
        self.entries.iter().filter(move |e| e.timestamp() >= ts)
    }

    /// (entries, bytes) held by this block
    pub fn counters(&self) -> (i64, i64) {
        (
            self.entries.iter().map(|e| e.entry_num()).sum(),
            self.size,
        )
    }
}
