//! Vectorhouse Query-Side Delete Buffer
//!
//! While a segment is growing, deletes that target it have not yet been
//! compacted into durable delta logs. The query side keeps those in-flight
//! deletes in a delete buffer so reads can apply them, and pins timestamps
//! that active readers depend on so garbage collection cannot race a
//! consistent snapshot.
//!
//! The buffer is a timestamp-ordered list of fixed-size blocks; discarding
//! old deletes drops whole blocks from the head once nothing pins them.

pub mod delete_buffer;
pub mod delete_record;

pub use delete_buffer::ListDeleteBuffer;
pub use delete_record::{DeleteRecord, SegmentHandle, Timed};
