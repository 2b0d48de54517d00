//! Expression queries and post-execute transforms.
//!
//! An expression query is translated into a compiled statement by the
//! mapping collaborator. It may carry a [`PostExecuteTransform`] that operates
//! on the whole materialized sequence (`single_or_default`, `count`, ...)
//! instead of on individual rows.

use std::fmt;
use std::sync::Arc;

use ormbatch_proto::{FilterExpr, OrderSpec, RowSelection, Value};

use crate::error::Error;
use crate::result::{ResultShape, ResultValue};
use crate::session::Session;

use super::{LoadPlan, Projection, QuerySource};

/// A translated query expression.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExpression {
    /// Mapped entity name.
    pub entity: String,
    /// Restriction.
    pub filter: Option<FilterExpr>,
    /// Ordering.
    pub order_by: Vec<OrderSpec>,
    /// Projection; `None` selects entities.
    pub projection: Option<Projection>,
    /// Row selection.
    pub selection: RowSelection,
    /// Whether the query cache may be used.
    pub cacheable: bool,
}

impl QueryExpression {
    /// Expression over all instances of an entity.
    pub fn from_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            order_by: vec![],
            projection: None,
            selection: RowSelection::default(),
            cacheable: false,
        }
    }

    /// Add a restriction, AND-ed with any existing one.
    pub fn filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(existing) => FilterExpr::And(vec![existing, filter]),
        });
        self
    }

    /// Add an ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Project a single property.
    pub fn select(mut self, property: impl Into<String>) -> Self {
        self.projection = Some(Projection::Property(property.into()));
        self
    }

    /// Project the row count.
    pub fn count(mut self) -> Self {
        self.projection = Some(Projection::RowCount);
        self
    }

    /// Skip leading rows.
    pub fn skip(mut self, n: usize) -> Self {
        self.selection.first_row = Some(n);
        self
    }

    /// Cap the number of rows.
    pub fn take(mut self, n: usize) -> Self {
        self.selection.max_rows = Some(n);
        self
    }

    /// Allow the query cache.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Shape of each row the expression produces.
    pub fn element_shape(&self) -> ResultShape {
        match self.projection {
            None => ResultShape::Entity,
            Some(_) => ResultShape::Scalar,
        }
    }
}

type TransformFn = dyn Fn(Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> + Send + Sync;

/// A function applied to the entire materialized sequence of a query.
#[derive(Clone)]
pub struct PostExecuteTransform {
    name: String,
    input: Option<ResultShape>,
    apply: Arc<TransformFn>,
}

impl PostExecuteTransform {
    /// A transform producing a new list.
    pub fn list<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            input: None,
            apply: Arc::new(f),
        }
    }

    /// A transform reducing the list to one value, returned as a
    /// single-element list.
    pub fn aggregate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<ResultValue>) -> Result<ResultValue, Error> + Send + Sync + 'static,
    {
        Self::list(name, move |rows| Ok(vec![f(rows)?]))
    }

    /// Expect input rows of a given shape; rows of another shape are
    /// converted before the transform runs.
    pub fn with_input(mut self, shape: ResultShape) -> Self {
        self.input = Some(shape);
        self
    }

    /// The only row, or null when there is none. More than one row fails.
    pub fn single_or_default() -> Self {
        Self::aggregate("single_or_default", |mut rows| match rows.len() {
            0 => Ok(ResultValue::Scalar(Value::Null)),
            1 => Ok(rows.remove(0)),
            n => Err(Error::Conversion(format!(
                "sequence contains more than one element ({})",
                n
            ))),
        })
    }

    /// The first row, or null when there is none.
    pub fn first_or_default() -> Self {
        Self::aggregate("first_or_default", |rows| {
            Ok(rows
                .into_iter()
                .next()
                .unwrap_or(ResultValue::Scalar(Value::Null)))
        })
    }

    /// Number of rows.
    pub fn count() -> Self {
        Self::aggregate("count", |rows| {
            Ok(ResultValue::Scalar(Value::Int64(rows.len() as i64)))
        })
    }

    /// Whether any row exists.
    pub fn any() -> Self {
        Self::aggregate("any", |rows| Ok(ResultValue::Scalar(Value::Bool(!rows.is_empty()))))
    }

    /// Transform name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply to a sequence.
    pub fn apply(&self, rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        (self.apply)(rows)
    }
}

impl fmt::Debug for PostExecuteTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostExecuteTransform")
            .field("name", &self.name)
            .field("input", &self.input)
            .finish()
    }
}

/// An expression query with an optional post-execute transform.
///
/// The transform lives on the instance; two queries built from the same
/// expression never share transform state.
#[derive(Debug, Clone)]
pub struct ExpressionQuery {
    expression: QueryExpression,
    transform: Option<PostExecuteTransform>,
}

impl ExpressionQuery {
    /// Query without a transform.
    pub fn new(expression: QueryExpression) -> Self {
        Self {
            expression,
            transform: None,
        }
    }

    /// Attach a transform.
    pub fn with_transform(mut self, transform: PostExecuteTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// The expression.
    pub fn expression(&self) -> &QueryExpression {
        &self.expression
    }

    /// The transform, if any.
    pub fn transform(&self) -> Option<&PostExecuteTransform> {
        self.transform.as_ref()
    }
}

impl From<QueryExpression> for ExpressionQuery {
    fn from(expression: QueryExpression) -> Self {
        Self::new(expression)
    }
}

impl QuerySource for ExpressionQuery {
    fn resolve_plans(&mut self, session: &Session) -> Result<Vec<LoadPlan>, Error> {
        let statement = session
            .translator()
            .expression_statement(&self.expression, session)?;
        statement.plans(session)
    }

    fn finish_results(&mut self, rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        let Some(transform) = &self.transform else {
            return Ok(rows);
        };
        let rows = match transform.input {
            Some(shape) if shape != self.expression.element_shape() => rows
                .into_iter()
                .map(|row| row.coerce(shape))
                .collect::<Result<Vec<_>, _>>()?,
            _ => rows,
        };
        transform.apply(rows)
    }

    fn describe(&self) -> String {
        match &self.transform {
            Some(t) => format!("expression({}).{}", self.expression.entity, t.name()),
            None => format!("expression({})", self.expression.entity),
        }
    }
}

impl QuerySource for QueryExpression {
    fn resolve_plans(&mut self, session: &Session) -> Result<Vec<LoadPlan>, Error> {
        let statement = session.translator().expression_statement(self, session)?;
        statement.plans(session)
    }

    fn describe(&self) -> String {
        format!("expression({})", self.entity)
    }
}
