//! Filter and ordering descriptions carried by criteria and expression queries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Filter expression over entity properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterExpr {
    /// Property equals value.
    Eq { field: String, value: Value },
    /// Property not equals value.
    Ne { field: String, value: Value },
    /// Property less than value.
    Lt { field: String, value: Value },
    /// Property less than or equal to value.
    Le { field: String, value: Value },
    /// Property greater than value.
    Gt { field: String, value: Value },
    /// Property greater than or equal to value.
    Ge { field: String, value: Value },
    /// Property is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Property is null.
    IsNull { field: String },
    /// Property is not null.
    IsNotNull { field: String },
    /// All conditions must be true.
    And(Vec<FilterExpr>),
    /// At least one condition must be true.
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FilterExpr::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN filter.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpr::In {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NULL filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        FilterExpr::IsNotNull {
            field: field.into(),
        }
    }

    /// Combine filters with AND.
    pub fn and(filters: Vec<FilterExpr>) -> Self {
        FilterExpr::And(filters)
    }

    /// Combine filters with OR.
    pub fn or(filters: Vec<FilterExpr>) -> Self {
        FilterExpr::Or(filters)
    }

    /// Bound values in evaluation order (left to right, depth first).
    pub fn parameters(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.collect_parameters(&mut out);
        out
    }

    fn collect_parameters(&self, out: &mut Vec<Value>) {
        match self {
            FilterExpr::Eq { value, .. }
            | FilterExpr::Ne { value, .. }
            | FilterExpr::Lt { value, .. }
            | FilterExpr::Le { value, .. }
            | FilterExpr::Gt { value, .. }
            | FilterExpr::Ge { value, .. } => out.push(value.clone()),
            FilterExpr::In { values, .. } => out.extend(values.iter().cloned()),
            FilterExpr::IsNull { .. } | FilterExpr::IsNotNull { .. } => {}
            FilterExpr::And(filters) | FilterExpr::Or(filters) => {
                for f in filters {
                    f.collect_parameters(out);
                }
            }
        }
    }

    /// Evaluate the filter against a property lookup.
    ///
    /// Missing properties behave like nulls; comparisons against null are false.
    pub fn matches<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        let cmp = |field: &str, value: &Value| {
            lookup(field).and_then(|actual| actual.compare(value))
        };

        match self {
            FilterExpr::Eq { field, value } => cmp(field, value) == Some(Ordering::Equal),
            FilterExpr::Ne { field, value } => {
                matches!(cmp(field, value), Some(Ordering::Less | Ordering::Greater))
            }
            FilterExpr::Lt { field, value } => cmp(field, value) == Some(Ordering::Less),
            FilterExpr::Le { field, value } => {
                matches!(cmp(field, value), Some(Ordering::Less | Ordering::Equal))
            }
            FilterExpr::Gt { field, value } => cmp(field, value) == Some(Ordering::Greater),
            FilterExpr::Ge { field, value } => {
                matches!(cmp(field, value), Some(Ordering::Greater | Ordering::Equal))
            }
            FilterExpr::In { field, values } => values
                .iter()
                .any(|v| cmp(field, v) == Some(Ordering::Equal)),
            FilterExpr::IsNull { field } => lookup(field).map_or(true, Value::is_null),
            FilterExpr::IsNotNull { field } => lookup(field).map_or(false, |v| !v.is_null()),
            FilterExpr::And(filters) => filters.iter().all(|f| f.matches(lookup)),
            FilterExpr::Or(filters) => filters.iter().any(|f| f.matches(lookup)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Ordering by a single property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Property to order by.
    pub field: String,
    /// Direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Ascending order on a property.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order on a property.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn props(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_comparison_filters() {
        let row = props(&[("Version", Value::Int32(2))]);
        let lookup = |f: &str| row.get(f);

        assert!(FilterExpr::ge("Version", 1).matches(&lookup));
        assert!(FilterExpr::ge("Version", 2).matches(&lookup));
        assert!(!FilterExpr::gt("Version", 2).matches(&lookup));
        assert!(FilterExpr::lt("Version", 3i64).matches(&lookup));
        assert!(FilterExpr::ne("Version", 5).matches(&lookup));
        assert!(FilterExpr::in_values("Version", vec![1.into(), 2.into()]).matches(&lookup));
    }

    #[test]
    fn test_null_handling() {
        let row = props(&[("Name", Value::Null)]);
        let lookup = |f: &str| row.get(f);

        assert!(FilterExpr::is_null("Name").matches(&lookup));
        assert!(FilterExpr::is_null("Missing").matches(&lookup));
        assert!(!FilterExpr::is_not_null("Name").matches(&lookup));
        assert!(!FilterExpr::eq("Name", "x").matches(&lookup));
        assert!(!FilterExpr::ne("Name", "x").matches(&lookup));
    }

    #[test]
    fn test_compound_filters_and_parameters() {
        let filter = FilterExpr::and(vec![
            FilterExpr::ge("Version", 1),
            FilterExpr::or(vec![FilterExpr::eq("Name", "a"), FilterExpr::eq("Name", "b")]),
        ]);
        assert_eq!(
            filter.parameters(),
            vec![Value::Int32(1), Value::from("a"), Value::from("b")]
        );

        let row = props(&[("Version", Value::Int32(1)), ("Name", Value::from("b"))]);
        assert!(filter.matches(&|f: &str| row.get(f)));
    }
}
