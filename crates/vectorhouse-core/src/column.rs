//! Typed Columnar Values
//!
//! `FieldColumn` is the unit of columnar data flowing through the write
//! path: one column of one field, for some number of rows. Insert messages
//! carry one `FieldColumn` per schema field; the segment buffer appends
//! message columns together until the segment syncs.
//!
//! ## Why a plain enum?
//!
//! The write path only appends, counts, and serializes columns. A
//! `Vec`-backed enum keeps appends cheap and avoids pulling a columnar
//! framework into the hot path.
//!
//! `PrimaryKey` is the scalar key type used for delete routing and bloom
//! filter probing. Keys are either Int64 or VarChar, mirroring what the
//! schema permits for primary-key fields.

use crate::error::{Error, Result};
use crate::schema::DataType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single primary-key value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrimaryKey {
    Int(i64),
    VarChar(String),
}

impl PrimaryKey {
    /// Byte view used for bloom filter probing and delta-log encoding
    pub fn as_bytes(&self) -> Bytes {
        match self {
            PrimaryKey::Int(v) => Bytes::copy_from_slice(&v.to_le_bytes()),
            PrimaryKey::VarChar(s) => Bytes::copy_from_slice(s.as_bytes()),
        }
    }

    /// Approximate in-memory size in bytes
    pub fn memory_size(&self) -> usize {
        match self {
            PrimaryKey::Int(_) => 8,
            PrimaryKey::VarChar(s) => s.len(),
        }
    }
}

/// One column of values for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldColumn {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    VarChar(Vec<String>),
    /// Flattened row-major vector data; `dim` values per row
    FloatVector { dim: u32, data: Vec<f32> },
}

impl FieldColumn {
    /// Create an empty column of the given type
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Bool => FieldColumn::Bool(Vec::new()),
            DataType::Int64 => FieldColumn::Int64(Vec::new()),
            DataType::Float => FieldColumn::Float(Vec::new()),
            DataType::Double => FieldColumn::Double(Vec::new()),
            DataType::VarChar => FieldColumn::VarChar(Vec::new()),
            DataType::FloatVector(dim) => FieldColumn::FloatVector {
                dim,
                data: Vec::new(),
            },
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            FieldColumn::Bool(_) => DataType::Bool,
            FieldColumn::Int64(_) => DataType::Int64,
            FieldColumn::Float(_) => DataType::Float,
            FieldColumn::Double(_) => DataType::Double,
            FieldColumn::VarChar(_) => DataType::VarChar,
            FieldColumn::FloatVector { dim, .. } => DataType::FloatVector(*dim),
        }
    }

    /// Number of rows in this column
    pub fn len(&self) -> usize {
        match self {
            FieldColumn::Bool(v) => v.len(),
            FieldColumn::Int64(v) => v.len(),
            FieldColumn::Float(v) => v.len(),
            FieldColumn::Double(v) => v.len(),
            FieldColumn::VarChar(v) => v.len(),
            FieldColumn::FloatVector { dim, data } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / *dim as usize
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate in-memory size in bytes
    pub fn memory_size(&self) -> usize {
        match self {
            FieldColumn::Bool(v) => v.len(),
            FieldColumn::Int64(v) => v.len() * 8,
            FieldColumn::Float(v) => v.len() * 4,
            FieldColumn::Double(v) => v.len() * 8,
            FieldColumn::VarChar(v) => v.iter().map(|s| s.len() + 4).sum(),
            FieldColumn::FloatVector { data, .. } => data.len() * 4,
        }
    }

    /// Append another column of the same type
    pub fn append(&mut self, other: &FieldColumn) -> Result<()> {
        match (self, other) {
            (FieldColumn::Bool(a), FieldColumn::Bool(b)) => a.extend_from_slice(b),
            (FieldColumn::Int64(a), FieldColumn::Int64(b)) => a.extend_from_slice(b),
            (FieldColumn::Float(a), FieldColumn::Float(b)) => a.extend_from_slice(b),
            (FieldColumn::Double(a), FieldColumn::Double(b)) => a.extend_from_slice(b),
            (FieldColumn::VarChar(a), FieldColumn::VarChar(b)) => a.extend_from_slice(b),
            (
                FieldColumn::FloatVector { dim: da, data: a },
                FieldColumn::FloatVector { dim: db, data: b },
            ) if da == db => a.extend_from_slice(b),
            (this, other) => {
                return Err(Error::TypeMismatch {
                    expected: format!("{:?}", this.data_type()),
                    actual: format!("{:?}", other.data_type()),
                })
            }
        }
        Ok(())
    }

    /// Extract primary keys from this column.
    ///
    /// Only Int64 and VarChar columns can carry primary keys.
    pub fn primary_keys(&self) -> Result<Vec<PrimaryKey>> {
        match self {
            FieldColumn::Int64(v) => Ok(v.iter().copied().map(PrimaryKey::Int).collect()),
            FieldColumn::VarChar(v) => {
                Ok(v.iter().cloned().map(PrimaryKey::VarChar).collect())
            }
            other => Err(Error::TypeMismatch {
                expected: "Int64 or VarChar".to_string(),
                actual: format!("{:?}", other.data_type()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_same_type() {
        let mut a = FieldColumn::Int64(vec![1, 2]);
        let b = FieldColumn::Int64(vec![3]);
        a.append(&b).unwrap();
        assert_eq!(a, FieldColumn::Int64(vec![1, 2, 3]));
        assert_eq!(a.len(), 3);
        assert_eq!(a.memory_size(), 24);
    }

    #[test]
    fn test_append_type_mismatch() {
        let mut a = FieldColumn::Int64(vec![1]);
        let b = FieldColumn::Float(vec![1.0]);
        assert!(a.append(&b).is_err());
    }

    #[test]
    fn test_vector_rows() {
        let col = FieldColumn::FloatVector {
            dim: 4,
            data: vec![0.0; 12],
        };
        assert_eq!(col.len(), 3);
        assert_eq!(col.memory_size(), 48);
    }

    #[test]
    fn test_vector_dim_mismatch() {
        let mut a = FieldColumn::FloatVector {
            dim: 4,
            data: vec![0.0; 4],
        };
        let b = FieldColumn::FloatVector {
            dim: 8,
            data: vec![0.0; 8],
        };
        assert!(a.append(&b).is_err());
    }

    #[test]
    fn test_primary_keys_extraction() {
        let col = FieldColumn::Int64(vec![7, 9]);
        let pks = col.primary_keys().unwrap();
        assert_eq!(pks, vec![PrimaryKey::Int(7), PrimaryKey::Int(9)]);

        let col = FieldColumn::Double(vec![1.0]);
        assert!(col.primary_keys().is_err());
    }

    #[test]
    fn test_primary_key_bytes() {
        assert_eq!(
            PrimaryKey::Int(1).as_bytes(),
            Bytes::copy_from_slice(&1i64.to_le_bytes())
        );
        assert_eq!(
            PrimaryKey::VarChar("k1".into()).as_bytes(),
            Bytes::from_static(b"k1")
        );
    }
}
