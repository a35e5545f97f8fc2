//! Vectorhouse Write Path
//!
//! This crate implements the data-plane write path of a Vectorhouse node:
//! ingest insert/delete mutations from the replayable log, buffer them in
//! memory per segment, and synchronize binlog artifacts to S3-compatible
//! object storage while advancing a durable channel checkpoint.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐
//! │  mutation log    │
//! └────────┬─────────┘
//!          │ insert / delete batches
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │   WriteBuffer    │◄───►│    MetaCache     │
//! │ per-segment      │     │ states, blooms,  │
//! │ staging buffers  │     │ BM25, row counts │
//! └────────┬─────────┘     └──────────────────┘
//!          │ sync policies pick ripe segments
//!          ▼
//! ┌──────────────────┐
//! │   SyncManager    │  at most one task per segment, FIFO
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │  BulkPackWriter  │────►│  object storage  │
//! │ binlogs, stats,  │     │ insert_log/...   │
//! │ deltas, BM25     │     │ stats_log/...    │
//! └────────┬─────────┘     └──────────────────┘
//!          │ manifest
//!          ▼
//! ┌──────────────────┐
//! │    MetaWriter    │  commit, then checkpoint advances
//! └──────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`write_buffer::WriteBuffer`]: per-channel ingest orchestrator
//! - [`metacache::MetaCache`]: authoritative segment state for one channel
//! - [`sync::SyncManager`]: per-segment FIFO sync execution
//! - [`sync::BulkPackWriter`]: artifact serialization and upload
//!
//! The allocator, meta-writer, and broker are injected trait objects; see
//! [`allocator::Allocator`], [`meta_writer::MetaWriter`], [`broker::Broker`].

pub mod allocator;
pub mod bloom;
pub mod bm25;
pub mod broker;
pub mod config;
pub mod error;
pub mod metacache;
pub mod meta_writer;
pub mod policy;
pub mod retry;
pub mod segment_buffer;
pub mod sync;
pub mod write_buffer;

pub use allocator::{Allocator, LocalAllocator};
pub use bloom::{BloomFilterConfig, BloomFilterSet, PkBloomFilter, PkStats};
pub use bm25::Bm25Stats;
pub use broker::Broker;
pub use config::{DeletePolicy, SyncRetryConfig, WriteBufferConfig};
pub use error::{Error, Result};
pub use metacache::{
    MetaCache, SegmentAction, SegmentFilter, SegmentInfo, SegmentLevel, SegmentState,
};
pub use meta_writer::{Binlog, FieldBinlog, ManifestUpdate, MetaWriter, SyncManifest};
pub use policy::SyncPolicy;
pub use retry::RetryPolicy;
pub use segment_buffer::{DeleteData, InsertData, SegmentBuffer};
pub use sync::{BulkPackWriter, ChannelFailure, SyncManager, SyncPack, SyncTask, COMPOUND_STATS_ID};
pub use write_buffer::WriteBuffer;
