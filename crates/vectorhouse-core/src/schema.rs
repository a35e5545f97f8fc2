//! Collection Schemas
//!
//! A collection schema describes the fields of a collection: their ids,
//! names, data types, and which field carries the primary key. The write
//! path validates every insert batch against the schema before buffering,
//! and the pack writer consults it to decide which fields get BM25
//! statistics.
//!
//! Schemas are fetched once per collection lifetime from the broker and
//! cached; they never change while a channel is open (schema evolution is
//! handled by the control plane, out of scope here).

use serde::{Deserialize, Serialize};

/// Field data types supported by the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int64,
    Float,
    Double,
    VarChar,
    /// Dense float vector with fixed dimension
    FloatVector(u32),
}

impl DataType {
    /// Whether this type can carry the collection primary key
    pub fn valid_primary_key(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::VarChar)
    }
}

/// Schema of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: i64,
    pub name: String,
    pub data_type: DataType,
    pub is_primary_key: bool,
    /// VarChar fields flagged here get per-segment BM25 term statistics
    #[serde(default)]
    pub enable_bm25: bool,
}

impl FieldSchema {
    pub fn new(field_id: i64, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            is_primary_key: false,
            enable_bm25: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_bm25(mut self) -> Self {
        self.enable_bm25 = true;
        self
    }
}

/// Schema of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// The primary-key field. Every valid collection schema has exactly one.
    pub fn primary_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    pub fn field(&self, field_id: i64) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    /// Fields that carry BM25 term statistics
    pub fn bm25_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|f| f.enable_bm25 && f.data_type == DataType::VarChar)
    }

    pub fn has_bm25(&self) -> bool {
        self.bm25_fields().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> CollectionSchema {
        CollectionSchema::new(
            "docs",
            vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "body", DataType::VarChar).with_bm25(),
                FieldSchema::new(102, "embedding", DataType::FloatVector(4)),
            ],
        )
    }

    #[test]
    fn test_primary_field() {
        let schema = sample_schema();
        assert_eq!(schema.primary_field().unwrap().field_id, 100);
    }

    #[test]
    fn test_bm25_fields() {
        let schema = sample_schema();
        let bm25: Vec<i64> = schema.bm25_fields().map(|f| f.field_id).collect();
        assert_eq!(bm25, vec![101]);
        assert!(schema.has_bm25());
    }

    #[test]
    fn test_valid_primary_key_types() {
        assert!(DataType::Int64.valid_primary_key());
        assert!(DataType::VarChar.valid_primary_key());
        assert!(!DataType::FloatVector(8).valid_primary_key());
    }
}
