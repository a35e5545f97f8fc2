//! Mutation Messages
//!
//! The write path consumes two kinds of mutation from the replayable log:
//! insert batches (columnar rows targeted at one segment) and delete
//! batches (primary keys with delete timestamps). Both carry enough
//! context for the write buffer to route them without consulting the log
//! broker again.

use crate::column::{FieldColumn, PrimaryKey};
use crate::error::{Error, Result};
use crate::schema::CollectionSchema;
use std::collections::HashMap;

/// One insert message: a batch of rows for a single segment
#[derive(Debug, Clone)]
pub struct InsertBatch {
    pub segment_id: i64,
    pub partition_id: i64,
    /// Logical-clock timestamp per row
    pub timestamps: Vec<u64>,
    /// field id => column of values, one entry per schema field
    pub fields: HashMap<i64, FieldColumn>,
}

impl InsertBatch {
    pub fn num_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Validate this batch against the collection schema.
    ///
    /// Every schema field must be present with the declared type, every
    /// column must have one value per row, and no unknown fields may appear.
    pub fn validate(&self, schema: &CollectionSchema) -> Result<()> {
        for field in &schema.fields {
            let column = self
                .fields
                .get(&field.field_id)
                .ok_or_else(|| Error::SchemaMismatch(format!("missing field {}", field.name)))?;
            if column.data_type() != field.data_type {
                return Err(Error::TypeMismatch {
                    expected: format!("{:?}", field.data_type),
                    actual: format!("{:?}", column.data_type()),
                });
            }
            if column.len() != self.num_rows() {
                return Err(Error::LengthMismatch(format!(
                    "field {} has {} rows, batch has {}",
                    field.name,
                    column.len(),
                    self.num_rows()
                )));
            }
        }
        for field_id in self.fields.keys() {
            if schema.field(*field_id).is_none() {
                return Err(Error::UnknownField(*field_id));
            }
        }
        Ok(())
    }

    pub fn memory_size(&self) -> usize {
        self.timestamps.len() * 8 + self.fields.values().map(|c| c.memory_size()).sum::<usize>()
    }
}

/// One delete message: primary keys with per-key delete timestamps
#[derive(Debug, Clone)]
pub struct DeleteBatch {
    pub partition_id: i64,
    pub primary_keys: Vec<PrimaryKey>,
    pub timestamps: Vec<u64>,
}

impl DeleteBatch {
    /// pks and timestamps must be parallel arrays
    pub fn validate(&self) -> Result<()> {
        if self.primary_keys.len() != self.timestamps.len() {
            return Err(Error::LengthMismatch(format!(
                "{} primary keys, {} timestamps",
                self.primary_keys.len(),
                self.timestamps.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, FieldSchema};

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "docs",
            vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "score", DataType::Float),
            ],
        )
    }

    fn batch() -> InsertBatch {
        InsertBatch {
            segment_id: 1,
            partition_id: 2,
            timestamps: vec![10, 11],
            fields: HashMap::from([
                (100, FieldColumn::Int64(vec![1, 2])),
                (101, FieldColumn::Float(vec![0.5, 0.7])),
            ]),
        }
    }

    #[test]
    fn test_validate_ok() {
        batch().validate(&schema()).unwrap();
    }

    #[test]
    fn test_validate_missing_field() {
        let mut b = batch();
        b.fields.remove(&101);
        assert!(b.validate(&schema()).is_err());
    }

    #[test]
    fn test_validate_unknown_field() {
        let mut b = batch();
        b.fields.insert(999, FieldColumn::Int64(vec![0, 0]));
        assert!(b.validate(&schema()).is_err());
    }

    #[test]
    fn test_validate_row_count_mismatch() {
        let mut b = batch();
        b.fields.insert(101, FieldColumn::Float(vec![0.5]));
        assert!(b.validate(&schema()).is_err());
    }

    #[test]
    fn test_delete_batch_length_mismatch() {
        let d = DeleteBatch {
            partition_id: 2,
            primary_keys: vec![PrimaryKey::Int(1)],
            timestamps: vec![10, 11],
        };
        assert!(d.validate().is_err());
    }
}
