//! Materialized result values and typed extraction.

use std::collections::HashSet;

use ormbatch_proto::Value;

use crate::entity::{EntityKey, EntityRef};
use crate::error::Error;

/// One materialized result row.
#[derive(Debug, Clone)]
pub enum ResultValue {
    /// A scalar column or projection.
    Scalar(Value),
    /// A hydrated entity.
    Entity(EntityRef),
    /// Several columns of one row.
    Tuple(Vec<ResultValue>),
}

/// Shape of a result row, fixed when a query is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Single scalar value.
    Scalar,
    /// Single entity.
    Entity,
    /// Multiple columns.
    Tuple,
}

impl ResultValue {
    /// Shape of this value.
    pub fn shape(&self) -> ResultShape {
        match self {
            ResultValue::Scalar(_) => ResultShape::Scalar,
            ResultValue::Entity(_) => ResultShape::Entity,
            ResultValue::Tuple(_) => ResultShape::Tuple,
        }
    }

    /// Convert into another shape.
    ///
    /// Single-element tuples unwrap to their element and single values wrap
    /// into one-element tuples. Anything else is a conversion error.
    pub fn coerce(self, shape: ResultShape) -> Result<ResultValue, Error> {
        if self.shape() == shape {
            return Ok(self);
        }
        match (self, shape) {
            (ResultValue::Tuple(mut items), target) if items.len() == 1 => {
                let item = items.remove(0);
                if item.shape() == target {
                    Ok(item)
                } else {
                    Err(Error::Conversion(format!(
                        "cannot convert {:?} element to {:?}",
                        item.shape(),
                        target
                    )))
                }
            }
            (value, ResultShape::Tuple) => Ok(ResultValue::Tuple(vec![value])),
            (value, target) => Err(Error::Conversion(format!(
                "cannot convert {:?} row to {:?}",
                value.shape(),
                target
            ))),
        }
    }

    /// Scalar payload, if this is a scalar.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            ResultValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Entity payload, if this is an entity.
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            ResultValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Tuple elements, if this is a tuple.
    pub fn as_tuple(&self) -> Option<&[ResultValue]> {
        match self {
            ResultValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for ResultValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ResultValue::Scalar(a), ResultValue::Scalar(b)) => a == b,
            (ResultValue::Entity(a), ResultValue::Entity(b)) => a.key() == b.key(),
            (ResultValue::Tuple(a), ResultValue::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for ResultValue {
    fn from(v: Value) -> Self {
        ResultValue::Scalar(v)
    }
}

impl From<EntityRef> for ResultValue {
    fn from(e: EntityRef) -> Self {
        ResultValue::Entity(e)
    }
}

/// Extraction of a typed value from a result row.
pub trait FromResultValue: Sized {
    /// Convert a row.
    fn from_result_value(value: ResultValue) -> Result<Self, Error>;
}

fn mismatch(expected: &str, value: &ResultValue) -> Error {
    let found = match value {
        ResultValue::Scalar(v) => v.type_name().to_string(),
        ResultValue::Entity(e) => e.entity_name().to_string(),
        ResultValue::Tuple(items) => format!("tuple of {}", items.len()),
    };
    Error::Conversion(format!("expected {}, found {}", expected, found))
}

impl FromResultValue for ResultValue {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        Ok(value)
    }
}

impl FromResultValue for Value {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        match value {
            ResultValue::Scalar(v) => Ok(v),
            other => Err(mismatch("scalar", &other)),
        }
    }
}

macro_rules! scalar_from_result {
    ($ty:ty, $name:literal, $accessor:ident) => {
        impl FromResultValue for $ty {
            fn from_result_value(value: ResultValue) -> Result<Self, Error> {
                value
                    .as_scalar()
                    .and_then(|v| v.$accessor())
                    .ok_or_else(|| mismatch($name, &value))
            }
        }
    };
}

scalar_from_result!(i32, "int32", as_i32);
scalar_from_result!(i64, "int64", as_i64);
scalar_from_result!(f64, "float64", as_f64);
scalar_from_result!(bool, "bool", as_bool);

impl FromResultValue for String {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        match value {
            ResultValue::Scalar(Value::String(s)) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromResultValue for EntityRef {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        match value {
            ResultValue::Entity(e) => Ok(e),
            other => Err(mismatch("entity", &other)),
        }
    }
}

impl FromResultValue for Vec<ResultValue> {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        match value {
            ResultValue::Tuple(items) => Ok(items),
            other => Ok(vec![other]),
        }
    }
}

impl<T: FromResultValue> FromResultValue for Option<T> {
    fn from_result_value(value: ResultValue) -> Result<Self, Error> {
        match value {
            ResultValue::Scalar(Value::Null) => Ok(None),
            other => T::from_result_value(other).map(Some),
        }
    }
}

/// Reshapes rows after they are materialized.
///
/// Applied to live and cached rows alike, so a transformer never observes
/// where its input came from.
pub trait ResultTransformer: Send + Sync {
    /// Stable name; part of the query cache key.
    fn name(&self) -> &str;

    /// Transform one row.
    fn transform_tuple(&self, row: ResultValue) -> Result<ResultValue, Error> {
        Ok(row)
    }

    /// Transform the whole list after every row was transformed.
    fn transform_list(&self, rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        Ok(rows)
    }
}

/// Drops repeated root entities, keeping first occurrences.
#[derive(Debug, Default, Clone, Copy)]
pub struct DistinctRootEntity;

impl ResultTransformer for DistinctRootEntity {
    fn name(&self) -> &str {
        "distinct_root_entity"
    }

    fn transform_tuple(&self, row: ResultValue) -> Result<ResultValue, Error> {
        match row {
            ResultValue::Tuple(mut items) if !items.is_empty() => {
                let last = items.len() - 1;
                Ok(items.swap_remove(last))
            }
            other => Ok(other),
        }
    }

    fn transform_list(&self, rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        let mut seen: HashSet<EntityKey> = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|row| match row {
                ResultValue::Entity(e) => seen.insert(e.key().clone()),
                _ => true,
            })
            .collect())
    }
}
