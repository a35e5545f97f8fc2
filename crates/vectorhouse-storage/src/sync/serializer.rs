//! Binlog Blob Serialization
//!
//! Turns yielded buffer payloads into the binary blobs the pack writer
//! lands in object storage. Four artifact families share the same framing
//! discipline (magic, version, typed payload, little-endian):
//!
//! - **Insert binlogs**: one blob per field, the column values for the batch
//! - **PK stats**: bloom filter plus min/max key, JSON-enveloped; the
//!   merged variant concatenates every rolled batch of the segment
//! - **Delta logs**: (primary key, timestamp) pairs
//! - **BM25 logs**: term-frequency sketches per text field
//!
//! Blobs are self-describing so offline tooling can inspect an artifact
//! without the manifest that referenced it.

use crate::bloom::{BloomFilterConfig, PkStats, RolledStats};
use crate::bm25::Bm25Stats;
use crate::error::{Error, Result};
use crate::segment_buffer::{DeleteData, InsertData};
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use vectorhouse_core::{CollectionSchema, FieldColumn, FieldSchema, PrimaryKey};

/// Magic prefix of every binlog blob
pub const BINLOG_MAGIC: u32 = 0x5648_4C47;

/// Current blob layout version
pub const BINLOG_VERSION: u8 = 1;

/// One serialized artifact ready for upload
pub struct Blob {
    pub data: Vec<u8>,
    /// Entries covered by the blob
    pub rows: u64,
    /// In-memory size of the source data
    pub memory_size: i64,
}

#[derive(Serialize)]
struct PkStatsEnvelope<'a> {
    field_id: i64,
    min_pk: &'a Option<PrimaryKey>,
    max_pk: &'a Option<PrimaryKey>,
    row_count: u64,
}

fn put_frame_header(buf: &mut BytesMut) {
    buf.put_u32_le(BINLOG_MAGIC);
    buf.put_u8(BINLOG_VERSION);
}

fn data_type_tag(column: &FieldColumn) -> u8 {
    match column {
        FieldColumn::Bool(_) => 0,
        FieldColumn::Int64(_) => 1,
        FieldColumn::Float(_) => 2,
        FieldColumn::Double(_) => 3,
        FieldColumn::VarChar(_) => 4,
        FieldColumn::FloatVector { .. } => 5,
    }
}

fn put_primary_key(buf: &mut BytesMut, pk: &PrimaryKey) {
    match pk {
        PrimaryKey::Int(v) => {
            buf.put_u8(0);
            buf.put_i64_le(*v);
        }
        PrimaryKey::VarChar(s) => {
            buf.put_u8(1);
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
    }
}

fn encode_pk_stats(stats: &PkStats) -> Result<Vec<u8>> {
    let envelope = PkStatsEnvelope {
        field_id: stats.pk_field_id,
        min_pk: &stats.min_pk,
        max_pk: &stats.max_pk,
        row_count: stats.row_count() as u64,
    };
    let header = serde_json::to_vec(&envelope)
        .map_err(|e| Error::Internal(format!("failed to encode pk stats envelope: {e}")))?;
    let bloom = stats.bloom.to_bytes();

    let mut buf = BytesMut::with_capacity(5 + 8 + header.len() + bloom.len());
    put_frame_header(&mut buf);
    buf.put_u32_le(header.len() as u32);
    buf.put_slice(&header);
    buf.put_u32_le(bloom.len() as u32);
    buf.put_slice(&bloom);
    Ok(buf.to_vec())
}

/// Serializes one sync pack's payloads into artifact blobs
pub struct StorageSerializer {
    pk_field: FieldSchema,
}

impl StorageSerializer {
    pub fn new(schema: &CollectionSchema) -> Result<Self> {
        let pk_field = schema
            .primary_field()
            .cloned()
            .ok_or_else(|| Error::Internal("schema has no primary key field".into()))?;
        Ok(Self { pk_field })
    }

    pub fn pk_field_id(&self) -> i64 {
        self.pk_field.field_id
    }

    /// One blob per field: frame header, field id, type tag, row count,
    /// then the column values
    pub fn serialize_inserts(&self, insert: &InsertData) -> Result<BTreeMap<i64, Blob>> {
        let mut blobs = BTreeMap::new();
        for (field_id, column) in &insert.fields {
            let mut buf = BytesMut::with_capacity(32 + column.memory_size());
            put_frame_header(&mut buf);
            buf.put_i64_le(*field_id);
            buf.put_u8(data_type_tag(column));
            buf.put_u64_le(column.len() as u64);

            match column {
                FieldColumn::Bool(values) => {
                    for v in values {
                        buf.put_u8(*v as u8);
                    }
                }
                FieldColumn::Int64(values) => {
                    for v in values {
                        buf.put_i64_le(*v);
                    }
                }
                FieldColumn::Float(values) => {
                    for v in values {
                        buf.put_f32_le(*v);
                    }
                }
                FieldColumn::Double(values) => {
                    for v in values {
                        buf.put_f64_le(*v);
                    }
                }
                FieldColumn::VarChar(values) => {
                    for v in values {
                        buf.put_u32_le(v.len() as u32);
                        buf.put_slice(v.as_bytes());
                    }
                }
                FieldColumn::FloatVector { dim, data } => {
                    buf.put_u32_le(*dim);
                    for v in data {
                        buf.put_f32_le(*v);
                    }
                }
            }

            blobs.insert(
                *field_id,
                Blob {
                    data: buf.to_vec(),
                    rows: column.len() as u64,
                    memory_size: column.memory_size() as i64,
                },
            );
        }
        Ok(blobs)
    }

    /// Build and serialize single-batch pk stats from the pack's keys
    pub fn serialize_pk_stats(
        &self,
        insert: &InsertData,
        config: &BloomFilterConfig,
    ) -> Result<(PkStats, Blob)> {
        let mut stats = PkStats::new(self.pk_field.field_id, config.clone());
        for key in &insert.primary_keys {
            stats.update(key);
        }
        let data = encode_pk_stats(&stats)?;
        let blob = Blob {
            rows: stats.row_count() as u64,
            memory_size: data.len() as i64,
            data,
        };
        Ok((stats, blob))
    }

    /// Serialize the whole rolled history of a segment as the merged
    /// stats artifact: entry count, then length-prefixed batch envelopes
    pub fn serialize_merged_pk_stats(&self, history: &[RolledStats]) -> Result<Blob> {
        let mut buf = BytesMut::new();
        put_frame_header(&mut buf);
        buf.put_u32_le(history.len() as u32);

        let mut rows = 0u64;
        for entry in history {
            let encoded = encode_pk_stats(&entry.stats)?;
            buf.put_u32_le(encoded.len() as u32);
            buf.put_slice(&encoded);
            rows += entry.stats.row_count() as u64;
        }
        Ok(Blob {
            rows,
            memory_size: buf.len() as i64,
            data: buf.to_vec(),
        })
    }

    /// (primary key, timestamp) pairs, one blob for the whole batch
    pub fn serialize_delta(&self, delta: &DeleteData) -> Blob {
        let mut buf = BytesMut::with_capacity(16 + delta.memory_size);
        put_frame_header(&mut buf);
        buf.put_u64_le(delta.primary_keys.len() as u64);
        for (pk, ts) in delta.primary_keys.iter().zip(&delta.timestamps) {
            put_primary_key(&mut buf, pk);
            buf.put_u64_le(*ts);
        }
        Blob {
            rows: delta.primary_keys.len() as u64,
            memory_size: delta.memory_size as i64,
            data: buf.to_vec(),
        }
    }

    /// One blob per text field
    pub fn serialize_bm25(&self, sketches: &HashMap<i64, Bm25Stats>) -> BTreeMap<i64, Blob> {
        sketches
            .iter()
            .map(|(field_id, stats)| {
                let data = stats.to_bytes();
                (
                    *field_id,
                    Blob {
                        rows: stats.num_rows,
                        memory_size: stats.memory_size() as i64,
                        data,
                    },
                )
            })
            .collect()
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
                FieldSchema::new(101, "vec", DataType::FloatVector(2)),
            ],
        )
    }

    fn insert_data() -> InsertData {
        InsertData {
            pk_field_id: 100,
            fields: HashMap::from([
                (100, FieldColumn::Int64(vec![1, 2])),
                (
                    101,
                    FieldColumn::FloatVector {
                        dim: 2,
                        data: vec![0.1, 0.2, 0.3, 0.4],
                    },
                ),
            ]),
            timestamps: vec![10, 11],
            primary_keys: vec![PrimaryKey::Int(1), PrimaryKey::Int(2)],
            num_rows: 2,
            memory_size: 64,
            ts_from: 10,
            ts_to: 11,
        }
    }

    #[test]
    fn test_serialize_inserts_one_blob_per_field() {
        let serializer = StorageSerializer::new(&schema()).unwrap();
        let blobs = serializer.serialize_inserts(&insert_data()).unwrap();

        assert_eq!(blobs.len(), 2);
        for blob in blobs.values() {
            assert_eq!(blob.rows, 2);
            assert_eq!(
                u32::from_le_bytes(blob.data[0..4].try_into().unwrap()),
                BINLOG_MAGIC
            );
        }
    }

    #[test]
    fn test_serialize_pk_stats() {
        let serializer = StorageSerializer::new(&schema()).unwrap();
        let (stats, blob) = serializer
            .serialize_pk_stats(&insert_data(), &BloomFilterConfig::default())
            .unwrap();

        assert_eq!(stats.min_pk, Some(PrimaryKey::Int(1)));
        assert_eq!(stats.max_pk, Some(PrimaryKey::Int(2)));
        assert_eq!(blob.rows, 2);
        assert!(stats.bloom.might_contain(&PrimaryKey::Int(1)));
    }

    #[test]
    fn test_serialize_merged_pk_stats_empty_history() {
        let serializer = StorageSerializer::new(&schema()).unwrap();
        let blob = serializer.serialize_merged_pk_stats(&[]).unwrap();
        assert_eq!(blob.rows, 0);
        // Still a well-formed framed blob
        assert!(blob.data.len() >= 9);
    }

    #[test]
    fn test_serialize_delta() {
        let serializer = StorageSerializer::new(&schema()).unwrap();
        let delta = DeleteData {
            primary_keys: vec![PrimaryKey::Int(7), PrimaryKey::VarChar("k".into())],
            timestamps: vec![15, 16],
            memory_size: 17,
            ts_from: 15,
            ts_to: 16,
        };
        let blob = serializer.serialize_delta(&delta);
        assert_eq!(blob.rows, 2);
        assert_eq!(blob.memory_size, 17);
    }

    #[test]
    fn test_serialize_bm25() {
        let serializer = StorageSerializer::new(&schema()).unwrap();
        let mut stats = Bm25Stats::default();
        stats.process_text("hello world");

        let blobs = serializer.serialize_bm25(&HashMap::from([(101, stats)]));
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[&101].rows, 1);
    }
}
