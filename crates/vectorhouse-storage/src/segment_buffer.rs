//! Per-Segment Write Buffers
//!
//! Each segment with un-synced data owns one `SegmentBuffer`: an insert
//! sub-buffer of staged columnar rows and a delta sub-buffer of buffered
//! deletes. The write buffer manager creates buffers lazily on first write
//! and removes them when their payload is yielded to a sync task.
//!
//! ## Yield Semantics
//!
//! `yield_payload` consumes the buffer's contents in one step; after yield
//! the manager drops the buffer entirely, so a segment either has a live
//! buffer with data or no buffer at all. The yielded payload carries the
//! earliest covered position, which the sync manager pins for checkpoint
//! computation until the task resolves.

use crate::bm25::Bm25Stats;
use crate::error::{Error, Result};
use std::collections::HashMap;
use vectorhouse_core::{
    position::earliest_position, CollectionSchema, FieldColumn, InsertBatch, LogPosition,
    PrimaryKey,
};

/// Columnar payload yielded from an insert sub-buffer
#[derive(Debug)]
pub struct InsertData {
    pub pk_field_id: i64,
    /// field id => accumulated column
    pub fields: HashMap<i64, FieldColumn>,
    /// Per-row logical timestamps
    pub timestamps: Vec<u64>,
    /// Primary keys in row order, for batch stats
    pub primary_keys: Vec<PrimaryKey>,
    pub num_rows: usize,
    pub memory_size: usize,
    pub ts_from: u64,
    pub ts_to: u64,
}

/// Delete payload yielded from a delta sub-buffer
#[derive(Debug)]
pub struct DeleteData {
    pub primary_keys: Vec<PrimaryKey>,
    pub timestamps: Vec<u64>,
    pub memory_size: usize,
    pub ts_from: u64,
    pub ts_to: u64,
}

/// Staged columnar rows for one segment
struct InsertBuffer {
    pk_field_id: i64,
    fields: HashMap<i64, FieldColumn>,
    timestamps: Vec<u64>,
    primary_keys: Vec<PrimaryKey>,
    memory_size: usize,
    start_position: Option<LogPosition>,
    end_position: Option<LogPosition>,
    ts_from: u64,
    ts_to: u64,
}

impl InsertBuffer {
    fn new(schema: &CollectionSchema) -> Result<Self> {
        let pk_field_id = schema
            .primary_field()
            .map(|f| f.field_id)
            .ok_or_else(|| Error::Internal("schema has no primary key field".into()))?;
        Ok(Self {
            pk_field_id,
            fields: schema
                .fields
                .iter()
                .map(|f| (f.field_id, FieldColumn::empty(f.data_type)))
                .collect(),
            timestamps: Vec::new(),
            primary_keys: Vec::new(),
            memory_size: 0,
            start_position: None,
            end_position: None,
            ts_from: u64::MAX,
            ts_to: 0,
        })
    }

    fn rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Append a validated batch; returns the batch's primary keys so the
    /// caller can feed the segment's bloom filter.
    fn buffer(
        &mut self,
        batch: &InsertBatch,
        start: &LogPosition,
        end: &LogPosition,
    ) -> Result<Vec<PrimaryKey>> {
        let pk_column = batch
            .fields
            .get(&self.pk_field_id)
            .ok_or_else(|| Error::InvalidArgument("batch missing primary key column".into()))?;
        let batch_pks = pk_column.primary_keys()?;

        for (field_id, column) in &batch.fields {
            let staged = self
                .fields
                .get_mut(field_id)
                .ok_or_else(|| Error::InvalidArgument(format!("unknown field id {field_id}")))?;
            staged.append(column)?;
            self.memory_size += column.memory_size();
        }
        self.timestamps.extend_from_slice(&batch.timestamps);
        self.memory_size += batch.timestamps.len() * 8;
        self.primary_keys.extend_from_slice(&batch_pks);

        for ts in &batch.timestamps {
            self.ts_from = self.ts_from.min(*ts);
            self.ts_to = self.ts_to.max(*ts);
        }
        if self.start_position.is_none() {
            self.start_position = Some(start.clone());
        }
        self.end_position = Some(end.clone());

        Ok(batch_pks)
    }

    fn take(self) -> Option<InsertData> {
        if self.timestamps.is_empty() {
            return None;
        }
        Some(InsertData {
            pk_field_id: self.pk_field_id,
            num_rows: self.timestamps.len(),
            memory_size: self.memory_size,
            ts_from: self.ts_from,
            ts_to: self.ts_to,
            fields: self.fields,
            timestamps: self.timestamps,
            primary_keys: self.primary_keys,
        })
    }
}

/// Buffered deletes for one segment: parallel pk/timestamp arrays
struct DeltaBuffer {
    primary_keys: Vec<PrimaryKey>,
    timestamps: Vec<u64>,
    memory_size: usize,
    start_position: Option<LogPosition>,
    end_position: Option<LogPosition>,
    ts_from: u64,
    ts_to: u64,
}

impl DeltaBuffer {
    fn new() -> Self {
        Self {
            primary_keys: Vec::new(),
            timestamps: Vec::new(),
            memory_size: 0,
            start_position: None,
            end_position: None,
            ts_from: u64::MAX,
            ts_to: 0,
        }
    }

    fn buffer(
        &mut self,
        pks: &[PrimaryKey],
        tss: &[u64],
        start: &LogPosition,
        end: &LogPosition,
    ) {
        for (pk, ts) in pks.iter().zip(tss) {
            self.memory_size += pk.memory_size() + 8;
            self.primary_keys.push(pk.clone());
            self.timestamps.push(*ts);
            self.ts_from = self.ts_from.min(*ts);
            self.ts_to = self.ts_to.max(*ts);
        }
        if self.start_position.is_none() {
            self.start_position = Some(start.clone());
        }
        self.end_position = Some(end.clone());
    }

    fn take(self) -> Option<DeleteData> {
        if self.timestamps.is_empty() {
            return None;
        }
        Some(DeleteData {
            memory_size: self.memory_size,
            ts_from: self.ts_from,
            ts_to: self.ts_to,
            primary_keys: self.primary_keys,
            timestamps: self.timestamps,
        })
    }
}

/// What one buffered insert batch contributed, for meta-cache updates
pub struct BufferedBatch {
    /// Primary keys of the batch, for the segment's bloom filter
    pub primary_keys: Vec<PrimaryKey>,
    /// Batch BM25 sketches per text field
    pub bm25: HashMap<i64, Bm25Stats>,
}

/// Insert and delta sub-buffers for one segment
pub struct SegmentBuffer {
    segment_id: i64,
    insert: InsertBuffer,
    delta: DeltaBuffer,
    /// Batch BM25 sketches for the buffered rows, per text field
    bm25: HashMap<i64, Bm25Stats>,
}

impl SegmentBuffer {
    pub fn new(segment_id: i64, schema: &CollectionSchema) -> Result<Self> {
        Ok(Self {
            segment_id,
            insert: InsertBuffer::new(schema)?,
            delta: DeltaBuffer::new(),
            bm25: HashMap::new(),
        })
    }

    pub fn segment_id(&self) -> i64 {
        self.segment_id
    }

    /// Append a validated insert batch. Returns the batch's primary keys
    /// and BM25 sketches so the caller can update the meta-cache; the
    /// sketches are also folded into the buffer's cumulative batch.
    pub fn buffer_insert(
        &mut self,
        schema: &CollectionSchema,
        batch: &InsertBatch,
        start: &LogPosition,
        end: &LogPosition,
    ) -> Result<BufferedBatch> {
        let primary_keys = self.insert.buffer(batch, start, end)?;

        let mut batch_bm25: HashMap<i64, Bm25Stats> = HashMap::new();
        for field in schema.bm25_fields() {
            if let Some(FieldColumn::VarChar(texts)) = batch.fields.get(&field.field_id) {
                let sketch = batch_bm25.entry(field.field_id).or_default();
                for text in texts {
                    sketch.process_text(text);
                }
            }
        }
        for (field_id, sketch) in &batch_bm25 {
            self.bm25.entry(*field_id).or_default().merge(sketch);
        }

        Ok(BufferedBatch {
            primary_keys,
            bm25: batch_bm25,
        })
    }

    pub fn buffer_delete(
        &mut self,
        pks: &[PrimaryKey],
        tss: &[u64],
        start: &LogPosition,
        end: &LogPosition,
    ) {
        self.delta.buffer(pks, tss, start, end);
    }

    /// Earliest position covered by either sub-buffer; `None` when empty
    pub fn earliest_position(&self) -> Option<LogPosition> {
        earliest_position([
            self.insert.start_position.clone(),
            self.delta.start_position.clone(),
        ])
    }

    /// Latest position covered by either sub-buffer
    pub fn latest_position(&self) -> Option<LogPosition> {
        [&self.insert.end_position, &self.delta.end_position]
            .into_iter()
            .flatten()
            .max_by_key(|pos| pos.timestamp)
            .cloned()
    }

    pub fn rows(&self) -> usize {
        self.insert.rows()
    }

    pub fn memory_size(&self) -> usize {
        self.insert.memory_size + self.delta.memory_size
    }

    /// Batch BM25 sketches accumulated since the last yield
    pub fn bm25_sketches(&self) -> &HashMap<i64, Bm25Stats> {
        &self.bm25
    }

    /// Consume the buffer's payload. The manager removes the buffer right
    /// after, so a yielded segment has no buffer until new data arrives.
    pub fn yield_payload(
        self,
    ) -> (
        Option<InsertData>,
        Option<DeleteData>,
        HashMap<i64, Bm25Stats>,
        Option<LogPosition>,
    ) {
        let start = self.earliest_position();
        (self.insert.take(), self.delta.take(), self.bm25, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectorhouse_core::{DataType, FieldSchema};

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "docs",
            vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "body", DataType::VarChar).with_bm25(),
            ],
        )
    }

    fn batch(ids: Vec<i64>, ts: Vec<u64>) -> InsertBatch {
        let texts = ids.iter().map(|i| format!("doc {i}")).collect();
        InsertBatch {
            segment_id: 1,
            partition_id: 2,
            timestamps: ts,
            fields: HashMap::from([
                (100, FieldColumn::Int64(ids)),
                (101, FieldColumn::VarChar(texts)),
            ]),
        }
    }

    fn pos(offset: u64, ts: u64) -> LogPosition {
        LogPosition::new("ch", offset, ts)
    }

    #[test]
    fn test_buffer_insert_tracks_positions_and_rows() {
        let schema = schema();
        let mut buf = SegmentBuffer::new(1, &schema).unwrap();

        let buffered = buf
            .buffer_insert(&schema, &batch(vec![1, 2], vec![10, 11]), &pos(0, 10), &pos(1, 11))
            .unwrap();
        assert_eq!(
            buffered.primary_keys,
            vec![PrimaryKey::Int(1), PrimaryKey::Int(2)]
        );
        // The returned sketch covers only this batch
        assert_eq!(buffered.bm25.get(&101).unwrap().num_rows, 2);

        buf.buffer_insert(&schema, &batch(vec![3], vec![20]), &pos(2, 20), &pos(3, 20))
            .unwrap();

        assert_eq!(buf.rows(), 3);
        assert_eq!(buf.earliest_position().unwrap().timestamp, 10);
        assert_eq!(buf.latest_position().unwrap().timestamp, 20);
        assert!(buf.memory_size() > 0);
        // BM25 sketch saw all three docs
        assert_eq!(buf.bm25_sketches().get(&101).unwrap().num_rows, 3);
    }

    #[test]
    fn test_buffer_delete_extends_positions() {
        let schema = schema();
        let mut buf = SegmentBuffer::new(1, &schema).unwrap();

        buf.buffer_delete(
            &[PrimaryKey::Int(7)],
            &[15],
            &pos(5, 15),
            &pos(5, 15),
        );
        assert_eq!(buf.rows(), 0);
        assert_eq!(buf.earliest_position().unwrap().timestamp, 15);
    }

    #[test]
    fn test_min_position_across_sub_buffers() {
        let schema = schema();
        let mut buf = SegmentBuffer::new(1, &schema).unwrap();
        assert!(buf.earliest_position().is_none());

        buf.buffer_insert(&schema, &batch(vec![1], vec![20]), &pos(1, 20), &pos(1, 20))
            .unwrap();
        buf.buffer_delete(&[PrimaryKey::Int(1)], &[12], &pos(0, 12), &pos(0, 12));

        // Delta started earlier than inserts
        assert_eq!(buf.earliest_position().unwrap().timestamp, 12);
    }

    #[test]
    fn test_yield_payload() {
        let schema = schema();
        let mut buf = SegmentBuffer::new(1, &schema).unwrap();
        buf.buffer_insert(&schema, &batch(vec![1, 2], vec![10, 11]), &pos(0, 10), &pos(1, 11))
            .unwrap();
        buf.buffer_delete(&[PrimaryKey::Int(9)], &[11], &pos(1, 11), &pos(1, 11));

        let (insert, delta, bm25, start) = buf.yield_payload();
        let insert = insert.unwrap();
        assert_eq!(insert.num_rows, 2);
        assert_eq!(insert.ts_from, 10);
        assert_eq!(insert.ts_to, 11);
        assert_eq!(insert.primary_keys.len(), 2);

        let delta = delta.unwrap();
        assert_eq!(delta.primary_keys, vec![PrimaryKey::Int(9)]);
        assert_eq!(bm25.get(&101).unwrap().num_rows, 2);
        assert_eq!(start.unwrap().timestamp, 10);
    }

    #[test]
    fn test_yield_empty_sub_buffers() {
        let schema = schema();
        let buf = SegmentBuffer::new(1, &schema).unwrap();
        let (insert, delta, bm25, start) = buf.yield_payload();
        assert!(insert.is_none());
        assert!(delta.is_none());
        assert!(bm25.is_empty());
        assert!(start.is_none());
    }
}
