//! Segment Meta-Cache
//!
//! In-memory authoritative state for every segment on one channel: identity,
//! lifecycle state, row counters, primary-key bloom filters, and BM25
//! statistics. All segment-state mutation on the write path goes through
//! this cache; the sync path commits manifests back into it.
//!
//! ## Lifecycle
//!
//! ```text
//! Growing ──► Sealed ──► Flushing ──► Flushed
//!    │           │          │
//!    └───────────┴──────────┴──────► Dropped (always allowed)
//! Growing ──► Importing ──► Flushing
//! ```
//!
//! Once a segment leaves Growing it never returns. Invalid transitions are
//! refused (the update skips the segment and logs a warning), so callers
//! compose state filters with state updates to express guarded transitions.
//!
//! ## Concurrency
//!
//! One `RwLock` over the segment map. Updates are serialized per call;
//! readers observe either the pre- or post-state of any single
//! `update_segments`. Nothing suspends while the lock is held.

use crate::bloom::{BloomFilterConfig, BloomFilterSet, PkStats, RolledStats};
use crate::bm25::Bm25Stats;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use vectorhouse_core::{CollectionSchema, LogPosition, PrimaryKey};

/// Segment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentState {
    Growing,
    Sealed,
    Flushing,
    Flushed,
    Dropped,
    Importing,
}

impl SegmentState {
    /// Whether a transition from `self` to `next` is legal
    fn can_transition_to(self, next: SegmentState) -> bool {
        use SegmentState::*;
        match (self, next) {
            (_, Dropped) => true,
            (Growing, Sealed) | (Growing, Flushing) | (Growing, Importing) => true,
            (Sealed, Flushing) => true,
            (Importing, Flushing) => true,
            (Flushing, Flushed) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// Storage level of a segment. L0 segments carry deletes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentLevel {
    L0,
    L1,
}

/// Immutable snapshot of one segment's state
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub segment_id: i64,
    pub partition_id: i64,
    pub collection_id: i64,
    pub state: SegmentState,
    pub level: SegmentLevel,
    /// Rows currently staged in the segment buffer
    pub buffered_rows: i64,
    /// Rows handed to in-flight sync tasks
    pub syncing_rows: i64,
    /// Rows committed by completed syncs
    pub flushed_rows: i64,
    pub start_position: Option<LogPosition>,
    /// Segments this one was compacted from
    pub compact_from: Vec<i64>,
}

impl SegmentInfo {
    pub fn new(
        segment_id: i64,
        partition_id: i64,
        collection_id: i64,
        state: SegmentState,
        level: SegmentLevel,
    ) -> Self {
        Self {
            segment_id,
            partition_id,
            collection_id,
            state,
            level,
            buffered_rows: 0,
            syncing_rows: 0,
            flushed_rows: 0,
            start_position: None,
            compact_from: Vec::new(),
        }
    }

    pub fn with_start_position(mut self, pos: LogPosition) -> Self {
        self.start_position = Some(pos);
        self
    }

    /// Total rows this segment has accepted (monotonic)
    pub fn num_rows(&self) -> i64 {
        self.buffered_rows + self.syncing_rows + self.flushed_rows
    }
}

/// One mutation applied to matching segments under the segment lock.
///
/// Actions compose: `update_segments` takes a vector applied in order.
pub enum SegmentAction {
    /// Guarded state transition; illegal transitions skip the segment
    SetState(SegmentState),
    /// Set the buffered-row counter to the buffer's current size
    UpdateBufferedRows(i64),
    /// Move rows from buffered to in-flight accounting
    StartSyncing(i64),
    /// Move rows from in-flight to committed accounting
    FinishSyncing(i64),
    /// Roll pk batch stats into history; `Some` carries recomputed stats
    /// from the pack writer, `None` rolls the accumulated current batch
    RollStats(Option<PkStats>),
    /// Fold synced batch BM25 sketches into the segment's durable totals
    MergeBm25Stats(HashMap<i64, Bm25Stats>),
}

/// Composable selection over segments
#[derive(Default, Clone)]
pub struct SegmentFilter {
    ids: Option<HashSet<i64>>,
    states: Option<Vec<SegmentState>>,
    levels: Option<Vec<SegmentLevel>>,
}

impl SegmentFilter {
    pub fn with_segment_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = SegmentState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    pub fn with_levels(mut self, levels: impl IntoIterator<Item = SegmentLevel>) -> Self {
        self.levels = Some(levels.into_iter().collect());
        self
    }

    fn matches(&self, info: &SegmentInfo) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&info.segment_id) {
                return false;
            }
        }
        if let Some(states) = &self.states {
            if !states.contains(&info.state) {
                return false;
            }
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&info.level) {
                return false;
            }
        }
        true
    }
}

struct SegmentEntry {
    info: SegmentInfo,
    bloom: BloomFilterSet,
    /// field id => durable BM25 totals, folded in as batches sync
    bm25_synced: HashMap<i64, Bm25Stats>,
    /// field id => live BM25 totals, updated as rows are buffered
    bm25_live: HashMap<i64, Bm25Stats>,
}

/// Authoritative segment state for one channel
pub struct MetaCache {
    collection_id: i64,
    channel: String,
    schema: CollectionSchema,
    bloom_config: BloomFilterConfig,
    segments: RwLock<HashMap<i64, SegmentEntry>>,
}

impl MetaCache {
    pub fn new(
        collection_id: i64,
        channel: impl Into<String>,
        schema: CollectionSchema,
        bloom_config: BloomFilterConfig,
    ) -> Self {
        Self {
            collection_id,
            channel: channel.into(),
            schema,
            bloom_config,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the collection schema from the broker and build the cache.
    /// The schema is held for the collection lifetime; schema changes go
    /// through channel recreation.
    pub async fn open(
        broker: &dyn crate::broker::Broker,
        collection_id: i64,
        channel: impl Into<String>,
        bloom_config: BloomFilterConfig,
    ) -> Result<Self> {
        let schema = broker.describe_collection(collection_id).await?;
        Ok(Self::new(collection_id, channel, schema, bloom_config))
    }

    pub fn collection_id(&self) -> i64 {
        self.collection_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Register a segment. Re-adding the same id is a no-op; an id clash
    /// with a different collection or partition is an error.
    pub fn add_segment(&self, info: SegmentInfo) -> Result<()> {
        let mut segments = self.segments.write().expect("meta cache lock poisoned");
        if let Some(existing) = segments.get(&info.segment_id) {
            if existing.info.collection_id != info.collection_id
                || existing.info.partition_id != info.partition_id
            {
                return Err(Error::InvalidArgument(format!(
                    "segment {} already registered to collection {} partition {}",
                    info.segment_id, existing.info.collection_id, existing.info.partition_id
                )));
            }
            return Ok(());
        }

        let pk_field_id = self
            .schema
            .primary_field()
            .map(|f| f.field_id)
            .ok_or_else(|| Error::Internal("schema has no primary key field".into()))?;

        tracing::info!(
            segment_id = info.segment_id,
            partition_id = info.partition_id,
            state = ?info.state,
            level = ?info.level,
            "Adding segment to meta cache"
        );

        segments.insert(
            info.segment_id,
            SegmentEntry {
                info,
                bloom: BloomFilterSet::new(pk_field_id, self.bloom_config.clone()),
                bm25_synced: HashMap::new(),
                bm25_live: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn get(&self, segment_id: i64) -> Option<SegmentInfo> {
        let segments = self.segments.read().expect("meta cache lock poisoned");
        segments.get(&segment_id).map(|e| e.info.clone())
    }

    pub fn get_segments_by(&self, filter: &SegmentFilter) -> Vec<SegmentInfo> {
        let segments = self.segments.read().expect("meta cache lock poisoned");
        segments
            .values()
            .filter(|e| filter.matches(&e.info))
            .map(|e| e.info.clone())
            .collect()
    }

    pub fn segment_ids_by(&self, filter: &SegmentFilter) -> Vec<i64> {
        self.get_segments_by(filter)
            .into_iter()
            .map(|info| info.segment_id)
            .collect()
    }

    /// Apply actions in order to every matching segment; returns how many
    /// segments were touched.
    ///
    /// Actions carrying non-clonable payloads (`RollStats(Some)`) hand the
    /// payload to the first matching segment; callers select those by id.
    pub fn update_segments(
        &self,
        mut actions: Vec<SegmentAction>,
        filter: &SegmentFilter,
    ) -> usize {
        let mut segments = self.segments.write().expect("meta cache lock poisoned");
        let mut updated = 0;
        for entry in segments.values_mut().filter(|e| filter.matches(&e.info)) {
            for action in actions.iter_mut() {
                apply_action(entry, action);
            }
            updated += 1;
        }
        updated
    }

    /// Drop matching segments from the cache, returning their ids
    pub fn remove_segments(&self, filter: &SegmentFilter) -> Vec<i64> {
        let mut segments = self.segments.write().expect("meta cache lock poisoned");
        let ids: Vec<i64> = segments
            .values()
            .filter(|e| filter.matches(&e.info))
            .map(|e| e.info.segment_id)
            .collect();
        for id in &ids {
            segments.remove(id);
            tracing::info!(segment_id = id, "Removed segment from meta cache");
        }
        ids
    }

    /// Record buffered primary keys into the segment's current batch filter
    pub fn update_pk_range(&self, segment_id: i64, keys: &[PrimaryKey]) -> Result<()> {
        let mut segments = self.segments.write().expect("meta cache lock poisoned");
        let entry = segments
            .get_mut(&segment_id)
            .ok_or(Error::NotFound(segment_id))?;
        entry.bloom.update_pk_range(keys);
        Ok(())
    }

    /// Fold a buffered batch's BM25 sketches into the live per-field totals
    pub fn update_bm25_live(
        &self,
        segment_id: i64,
        sketches: &HashMap<i64, Bm25Stats>,
    ) -> Result<()> {
        let mut segments = self.segments.write().expect("meta cache lock poisoned");
        let entry = segments
            .get_mut(&segment_id)
            .ok_or(Error::NotFound(segment_id))?;
        for (field_id, stats) in sketches {
            entry
                .bm25_live
                .entry(*field_id)
                .or_default()
                .merge(stats);
        }
        Ok(())
    }

    /// Segments whose bloom filters say they might contain the key
    pub fn predict_segments(&self, key: &PrimaryKey, filter: &SegmentFilter) -> Vec<i64> {
        let segments = self.segments.read().expect("meta cache lock poisoned");
        segments
            .values()
            .filter(|e| filter.matches(&e.info))
            .filter(|e| e.bloom.might_contain(key))
            .map(|e| e.info.segment_id)
            .collect()
    }

    /// Snapshot the rolled pk-stats history of a segment, serialized via
    /// the provided closure. Used by the pack writer for merged stats.
    pub fn with_stats_history<R>(
        &self,
        segment_id: i64,
        f: impl FnOnce(&[RolledStats]) -> R,
    ) -> Result<R> {
        let segments = self.segments.read().expect("meta cache lock poisoned");
        let entry = segments
            .get(&segment_id)
            .ok_or(Error::NotFound(segment_id))?;
        Ok(f(entry.bloom.history()))
    }

    /// Snapshot the durable (synced) BM25 totals of a segment
    pub fn synced_bm25(&self, segment_id: i64) -> Result<HashMap<i64, Bm25Stats>> {
        let segments = self.segments.read().expect("meta cache lock poisoned");
        let entry = segments
            .get(&segment_id)
            .ok_or(Error::NotFound(segment_id))?;
        Ok(entry.bm25_synced.clone())
    }
}

fn apply_action(entry: &mut SegmentEntry, action: &mut SegmentAction) {
    let info = &mut entry.info;
    match action {
        SegmentAction::SetState(next) => {
            if info.state.can_transition_to(*next) {
                if info.state != *next {
                    tracing::debug!(
                        segment_id = info.segment_id,
                        from = ?info.state,
                        to = ?next,
                        "Segment state transition"
                    );
                }
                info.state = *next;
            } else {
                tracing::warn!(
                    segment_id = info.segment_id,
                    from = ?info.state,
                    to = ?next,
                    "Refusing illegal segment state transition"
                );
            }
        }
        SegmentAction::UpdateBufferedRows(rows) => {
            info.buffered_rows = *rows;
        }
        SegmentAction::StartSyncing(rows) => {
            info.syncing_rows += *rows;
            info.buffered_rows = (info.buffered_rows - *rows).max(0);
        }
        SegmentAction::FinishSyncing(rows) => {
            info.syncing_rows = (info.syncing_rows - *rows).max(0);
            info.flushed_rows += *rows;
        }
        SegmentAction::RollStats(stats) => {
            entry.bloom.roll(stats.take());
        }
        SegmentAction::MergeBm25Stats(sketches) => {
            for (field_id, stats) in sketches.iter() {
                entry
                    .bm25_synced
                    .entry(*field_id)
                    .or_default()
                    .merge(stats);
            }
        }
    }
}
