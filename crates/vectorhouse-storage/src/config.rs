//! Write-Path Configuration
//!
//! This module defines configuration for the channel write buffer and the
//! sync path.
//!
//! ## WriteBufferConfig
//!
//! Controls buffering, sync-policy thresholds, and delete routing:
//!
//! - **delete_policy**: how deletes are materialized (bloom-filter oracle
//!   vs dedicated L0 delta segment)
//! - **size_threshold_bytes**: sync a segment buffer once it holds this
//!   many bytes (default: 16MB)
//! - **row_threshold**: sync a segment buffer once it holds this many rows
//!   (default: 100k)
//! - **stale_duration_ms**: sync a buffer whose earliest data is older
//!   than this vs the channel clock (default: 10 min)
//! - **memory_limit_bytes**: hard cap across all buffers of one channel;
//!   exceeded writes fail with ResourceExhausted (default: 512MB)
//!
//! ## SyncRetryConfig
//!
//! Exponential backoff for object-store writes and meta commits:
//! max_attempts, initial/max backoff. Backoff doubles per attempt and is
//! capped at `backoff_max_ms`.

use serde::{Deserialize, Serialize};

/// How the write buffer materializes incoming deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Probe per-segment pk bloom filters and buffer the delete into every
    /// candidate segment's delta buffer
    BloomFilterPkOracle,
    /// Buffer all deletes into one dedicated delete-only L0 segment
    L0Delta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBufferConfig {
    /// Delete materialization policy
    #[serde(default = "default_delete_policy")]
    pub delete_policy: DeletePolicy,

    /// Sync a buffer when its memory reaches this size (default: 16MB)
    #[serde(default = "default_size_threshold")]
    pub size_threshold_bytes: usize,

    /// Sync a buffer when it holds this many rows (default: 100_000)
    #[serde(default = "default_row_threshold")]
    pub row_threshold: usize,

    /// Sync a buffer whose earliest data is older than this (default: 10 min)
    #[serde(default = "default_stale_duration_ms")]
    pub stale_duration_ms: u64,

    /// Memory cap across all buffers of the channel (default: 512MB)
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: usize,

    /// Retry policy for object-store writes and meta commits
    #[serde(default)]
    pub sync_retry: SyncRetryConfig,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            delete_policy: default_delete_policy(),
            size_threshold_bytes: default_size_threshold(),
            row_threshold: default_row_threshold(),
            stale_duration_ms: default_stale_duration_ms(),
            memory_limit_bytes: default_memory_limit(),
            sync_retry: SyncRetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRetryConfig {
    /// Maximum write attempts including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds (default: 100ms)
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff cap in milliseconds (default: 10s)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for SyncRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_delete_policy() -> DeletePolicy {
    DeletePolicy::BloomFilterPkOracle
}

fn default_size_threshold() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_row_threshold() -> usize {
    100_000
}

fn default_stale_duration_ms() -> u64 {
    10 * 60 * 1000 // 10 minutes
}

fn default_memory_limit() -> usize {
    512 * 1024 * 1024 // 512MB
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    10_000
}
