//! Meta-Writer: Manifest Commit Interface
//!
//! After the pack writer lands a sync task's artifacts in object storage,
//! the resulting manifest must be committed to the cluster metadata
//! service before the data is considered durable. The meta-writer is that
//! commit seam, injected as a trait object so tests can record commits
//! in memory.
//!
//! Binlog and manifest types live here: they are the data contract of the
//! commit call.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vectorhouse_core::LogPosition;

/// One written artifact: location plus the row/timestamp range it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binlog {
    pub entries_num: u64,
    pub ts_from: u64,
    pub ts_to: u64,
    pub log_path: String,
    pub log_size: i64,
    pub memory_size: i64,
}

/// All binlogs of one field within one sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinlog {
    pub field_id: i64,
    pub binlogs: Vec<Binlog>,
}

/// The artifacts of one completed sync task.
///
/// Maps are ordered by field id so manifest comparisons and replays are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncManifest {
    pub inserts: BTreeMap<i64, FieldBinlog>,
    pub stats: BTreeMap<i64, FieldBinlog>,
    pub delta: Option<FieldBinlog>,
    pub bm25: BTreeMap<i64, FieldBinlog>,
    /// Total bytes written to object storage
    pub size_written: i64,
}

/// One manifest commit request
#[derive(Debug, Clone)]
pub struct ManifestUpdate {
    pub channel: String,
    pub collection_id: i64,
    pub partition_id: i64,
    pub segment_id: i64,
    pub manifest: SyncManifest,
    pub checkpoint: Option<LogPosition>,
    pub batch_rows: i64,
    pub is_flush: bool,
    pub is_drop: bool,
}

#[async_trait]
pub trait MetaWriter: Send + Sync {
    /// Commit a sync task's manifest. Retried with the sync retry policy;
    /// a permanent failure after artifacts were written escalates to
    /// channel-terminal.
    async fn update_manifest(&self, update: ManifestUpdate) -> Result<()>;

    /// Remove the channel from cluster metadata. Terminal: the channel
    /// must not accept writes afterwards.
    async fn drop_channel(&self, channel: &str) -> Result<()>;
}
