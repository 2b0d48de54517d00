//! Object-criteria queries.

use std::fmt;
use std::sync::Arc;

use ormbatch_proto::{FilterExpr, OrderSpec, RowSelection};

use crate::error::Error;
use crate::loader::QueryParameters;
use crate::result::ResultTransformer;
use crate::session::Session;

use super::{LoadPlan, QuerySource};

/// Projection of a criteria or expression query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Number of matching rows.
    RowCount,
    /// A single property of each matching entity.
    Property(String),
}

/// A criteria query over a mapped entity name.
///
/// When the name is polymorphic, one load plan is resolved per concrete
/// implementor and the results are concatenated in implementor order.
#[derive(Clone)]
pub struct Criteria {
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
    /// Cache region.
    pub cache_region: Option<String>,
    /// Result transformer.
    pub result_transformer: Option<Arc<dyn ResultTransformer>>,
    /// Read-only mode for loaded entities.
    pub read_only: Option<bool>,
}

impl Criteria {
    /// Criteria over all instances of an entity.
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            filter: None,
            order_by: vec![],
            projection: None,
            selection: RowSelection::default(),
            cacheable: false,
            cache_region: None,
            result_transformer: None,
            read_only: None,
        }
    }

    /// Add a restriction, AND-ed with any existing one.
    pub fn add(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(FilterExpr::And(mut all)) => {
                all.push(filter);
                FilterExpr::And(all)
            }
            Some(existing) => FilterExpr::And(vec![existing, filter]),
        });
        self
    }

    /// Add an ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Skip leading rows.
    pub fn with_first_result(mut self, first: usize) -> Self {
        self.selection.first_row = Some(first);
        self
    }

    /// Cap the number of rows.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.selection.max_rows = Some(max);
        self
    }

    /// Allow the query cache.
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Set the cache region.
    pub fn with_cache_region(mut self, region: impl Into<String>) -> Self {
        self.cache_region = Some(region.into());
        self
    }

    /// Attach a result transformer.
    pub fn with_result_transformer(mut self, transformer: Arc<dyn ResultTransformer>) -> Self {
        self.result_transformer = Some(transformer);
        self
    }

    /// Set read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Parameters the load plans execute with.
    pub fn query_parameters(&self) -> QueryParameters {
        QueryParameters {
            positional: self
                .filter
                .as_ref()
                .map(FilterExpr::parameters)
                .unwrap_or_default(),
            selection: self.selection,
            cacheable: self.cacheable,
            cache_region: self.cache_region.clone(),
            read_only: self.read_only,
            result_transformer: self.result_transformer.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Criteria")
            .field("entity", &self.entity)
            .field("filter", &self.filter)
            .field("order_by", &self.order_by)
            .field("projection", &self.projection)
            .field("selection", &self.selection)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl QuerySource for Criteria {
    fn resolve_plans(&mut self, session: &Session) -> Result<Vec<LoadPlan>, Error> {
        let translator = session.translator();
        let implementors = translator.implementors(&self.entity);
        if implementors.is_empty() {
            return Err(Error::PlanResolution(format!(
                "unknown entity: {}",
                self.entity
            )));
        }

        let parameters = self.query_parameters();
        implementors
            .iter()
            .map(|implementor| {
                let loader = translator.criteria_loader(implementor, self, session)?;
                Ok(LoadPlan::new(loader, parameters.clone()))
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("criteria({})", self.entity)
    }
}
