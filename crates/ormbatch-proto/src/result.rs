//! Raw rows and result sets as produced by a driver.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::error::Error;
use crate::value::Value;

/// One physical row.
#[derive(
    Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Row {
    /// Column values in column order.
    pub values: Vec<Value>,
}

impl Row {
    /// Create a row from values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a column value by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// A single physical result set: column names plus rows.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct ResultSet {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows in store order.
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create an empty result set with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: vec![],
        }
    }

    /// Append a row.
    pub fn with_row(mut self, row: impl Into<Row>) -> Self {
        self.rows.push(row.into());
        self
    }

    /// Create a one-column, one-row result set.
    pub fn scalar(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(vec![column.into()]).with_row(vec![value.into()])
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the set holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Encode rows for storage in a byte-oriented cache.
pub fn encode_rows(rows: &[Row]) -> Result<Vec<u8>, Error> {
    let owned: Vec<Row> = rows.to_vec();
    rkyv::to_bytes::<rkyv::rancor::Error>(&owned)
        .map(|v| v.to_vec())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode rows previously produced by [`encode_rows`].
pub fn decode_rows(bytes: &[u8]) -> Result<Vec<Row>, Error> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<Vec<Row>, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_rows() {
        let rows = vec![
            Row::new(vec![Value::Int32(1), Value::String("a".into())]),
            Row::new(vec![Value::Null, Value::Uuid([7; 16])]),
        ];
        let bytes = encode_rows(&rows).unwrap();
        assert_eq!(decode_rows(&bytes).unwrap(), rows);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_rows(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_scalar_result_set() {
        let set = ResultSet::scalar("count", 3i64);
        assert_eq!(set.columns, vec!["count".to_string()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rows[0].get(0), Some(&Value::Int64(3)));
        assert_eq!(set.column_index("count"), Some(0));
    }
}
