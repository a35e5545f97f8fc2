//! Core Error Types
//!
//! Errors raised while validating or assembling core data structures. The
//! write path wraps these into its own error enum at the crate boundary.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unknown field id: {0}")]
    UnknownField(i64),

    #[error("column type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("length mismatch: {0}")]
    LengthMismatch(String),
}
