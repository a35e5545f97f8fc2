//! Log-Id Allocation
//!
//! Binlog artifacts are keyed by globally unique ids handed out by the
//! allocator service. The pack writer requests one contiguous range per
//! sync task, sized up front from the task's contents, so a write can
//! never run out of ids mid-task.
//!
//! The allocator is injected as a trait object; production wires the
//! cluster allocator client, tests and single-node deployments use
//! `LocalAllocator`.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

#[async_trait]
pub trait Allocator: Send + Sync {
    /// Reserve `count` contiguous ids; returns `(start, end)` with
    /// `end = start + count`. Ids are consumed in order by the caller.
    async fn alloc(&self, count: u32) -> Result<(i64, i64)>;
}

/// Process-local allocator for tests and single-node deployments.
///
/// Ids start at 1: id 0 is the reserved merged-stats sentinel and must
/// never be allocated.
pub struct LocalAllocator {
    next: AtomicI64,
}

impl LocalAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }
}

impl Default for LocalAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Allocator for LocalAllocator {
    async fn alloc(&self, count: u32) -> Result<(i64, i64)> {
        let start = self.next.fetch_add(count as i64, Ordering::SeqCst);
        Ok((start, start + count as i64))
    }
}
