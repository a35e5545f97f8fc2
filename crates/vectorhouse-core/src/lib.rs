//! Vectorhouse Core Data Model
//!
//! This crate defines the types shared by every Vectorhouse component - the
//! write path, the sync path, and the query-side delete buffer all speak in
//! terms of these structures.
//!
//! ## What Lives Here?
//!
//! 1. **Log positions**: where a message sits in the replayable mutation log
//! 2. **Schemas**: collection and field definitions, including the primary key
//! 3. **Columns**: typed columnar value storage (`FieldColumn`)
//! 4. **Messages**: insert and delete mutation batches as consumed from the log
//!
//! ## Design Decisions
//!
//! - Positions are ordered by *timestamp*, not wire offset. Timestamps come
//!   from a logical clock, so they give a total order across producers while
//!   offsets are only meaningful within one channel.
//! - Columns are plain enums over `Vec<T>` rather than an arrow-style
//!   abstraction: the write path only ever appends and serializes, so the
//!   simple representation keeps the hot path allocation-friendly.
//! - Primary keys are a two-variant enum (`Int`, `VarChar`) matching the key
//!   types the schema permits.

pub mod column;
pub mod error;
pub mod message;
pub mod position;
pub mod schema;

pub use column::{FieldColumn, PrimaryKey};
pub use error::{Error, Result};
pub use message::{DeleteBatch, InsertBatch};
pub use position::LogPosition;
pub use schema::{CollectionSchema, DataType, FieldSchema};
