//! Write-Path Error Types
//!
//! This module defines all error kinds that can occur on the write path.
//!
//! ## Error Categories
//!
//! ### Caller Errors
//! - `InvalidArgument`: schema mismatch, pk/ts length mismatch, unknown field
//! - `NotFound`: segment absent where one was expected
//! - `Aborted`: lifecycle transition refused (e.g. buffering into Dropped)
//!
//! ### Resource Errors
//! - `ResourceExhausted`: buffer memory cap reached
//! - `Unavailable`: transient storage/allocator failure - retried internally
//!
//! ### Terminal Errors
//! - `Internal`: manifest commit failed after artifacts were written;
//!   escalates to channel-terminal failure
//! - `ChannelFailed`: the channel entered terminal failure; the supervisor
//!   is expected to tear down and recreate the write buffer
//!
//! ## Retry Classification
//!
//! `is_retriable` drives the sync retry loop: only `Unavailable` is retried.
//! Everything else either reflects a caller bug (won't succeed on retry) or
//! has already escalated past the point where a retry helps.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("segment not found: {0}")]
    NotFound(i64),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("channel {0} entered terminal failure")]
    ChannelFailed(String),
}

impl Error {
    /// Whether the sync retry loop should try again
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

impl From<vectorhouse_core::Error> for Error {
    fn from(err: vectorhouse_core::Error) -> Self {
        Error::InvalidArgument(err.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        // Object-store failures are transient from the write path's view;
        // the retry policy bounds how long we keep believing that.
        Error::Unavailable(err.to_string())
    }
}
