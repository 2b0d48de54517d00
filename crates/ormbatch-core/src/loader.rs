//! Loader collaborator boundary.
//!
//! A [`Loader`] is produced by the mapping collaborator for one load plan. It
//! knows how to build the physical command, how to materialize one row of its
//! result set, and how to finish hydration once the cursor is closed. The
//! default methods implement the parts every loader shares: subselect
//! registration, result-list construction and query cache integration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ormbatch_proto::{Row, RowSelection, SqlCommand, Value};

use crate::cache::{QueryCache, QueryKey};
use crate::entity::{EntityKey, EntityRef};
use crate::error::Error;
use crate::result::{ResultTransformer, ResultValue};
use crate::session::{Dialect, Session, SubselectFetch};

/// Parameters a load plan executes with.
#[derive(Clone, Default)]
pub struct QueryParameters {
    /// Positional parameter values.
    pub positional: Vec<Value>,
    /// Named parameter values.
    pub named: BTreeMap<String, Value>,
    /// Row selection.
    pub selection: RowSelection,
    /// Whether results may be served from and stored in the query cache.
    pub cacheable: bool,
    /// Cache region name.
    pub cache_region: Option<String>,
    /// Inspect result columns to determine scalar types on first read.
    pub auto_discover_scalar_types: bool,
    /// Read-only mode for loaded entities; `None` uses the session default.
    pub read_only: Option<bool>,
    /// Transformer applied to the result list.
    pub result_transformer: Option<Arc<dyn ResultTransformer>>,
}

impl QueryParameters {
    /// Named parameter value.
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// Name of the attached transformer, if any.
    pub fn transformer_name(&self) -> Option<&str> {
        self.result_transformer.as_ref().map(|t| t.name())
    }

    /// Check that the number of positional values matches the placeholders.
    pub fn validate(&self, expected_positional: usize) -> Result<(), Error> {
        if self.positional.len() != expected_positional {
            return Err(Error::PlanResolution(format!(
                "expected positional parameter count: {}, actual parameters: {}",
                expected_positional,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for QueryParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParameters")
            .field("positional", &self.positional)
            .field("named", &self.named)
            .field("selection", &self.selection)
            .field("cacheable", &self.cacheable)
            .field("cache_region", &self.cache_region)
            .field("read_only", &self.read_only)
            .field("result_transformer", &self.transformer_name())
            .finish()
    }
}

/// Outcome of a query cache lookup.
pub struct CacheLookup {
    /// Cached rows on a hit.
    pub rows: Option<Vec<Row>>,
    /// Cache to publish into on a miss.
    pub cache: Option<Arc<dyn QueryCache>>,
    /// Key of the lookup, when the plan is cacheable.
    pub key: Option<QueryKey>,
}

impl CacheLookup {
    /// A lookup that did not consult any cache.
    pub fn not_cacheable() -> Self {
        Self {
            rows: None,
            cache: None,
            key: None,
        }
    }
}

/// Loads a lazy collection for an owner.
pub trait CollectionLoader: Send + Sync {
    /// Load the collection `role` of `owner` and mark it initialized.
    fn initialize(&self, owner: &EntityRef, role: &str, session: &Session) -> Result<(), Error>;
}

/// Row materialization strategy for one load plan.
pub trait Loader: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Number of entity positions in each row.
    fn entity_span(&self) -> usize;

    /// Tables the query depends on.
    fn query_spaces(&self) -> &BTreeSet<String>;

    /// Whether entity keys are collected per row to build subselects.
    fn is_subselect_loading_enabled(&self) -> bool {
        false
    }

    /// Whether the row selection is pushed into the command.
    fn use_limit(&self, selection: &RowSelection, dialect: &Dialect) -> bool {
        selection.has_max_rows() && dialect.supports_limit_offset
    }

    /// Build the physical command.
    fn create_command(
        &self,
        parameters: &QueryParameters,
        session: &Session,
    ) -> Result<SqlCommand, Error>;

    /// Inspect result columns before the first row is read.
    fn auto_discover_types(
        &self,
        _columns: &[String],
        _parameters: &QueryParameters,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Materialize the current row.
    ///
    /// Entities created for the row are pushed to `hydrated`; when subselect
    /// loading is enabled their keys are written to `keys`, one slot per entity
    /// position.
    fn read_row(
        &self,
        row: &Row,
        columns: &[String],
        session: &Session,
        parameters: &QueryParameters,
        hydrated: &mut Vec<EntityRef>,
        keys: &mut [Option<EntityKey>],
    ) -> Result<ResultValue, Error>;

    /// Finish hydration of the entities read from the result set.
    fn initialize_entities_and_collections(
        &self,
        hydrated: &[EntityRef],
        read_only: bool,
        _session: &Session,
    ) -> Result<(), Error> {
        for entity in hydrated {
            entity.set_read_only(read_only);
        }
        Ok(())
    }

    /// Register subselect definitions built from the keys of every row.
    ///
    /// Nothing is registered for a single row: a subselect over one owner is
    /// no better than loading its collection directly.
    fn create_subselects(
        &self,
        keys: &[Vec<Option<EntityKey>>],
        _parameters: &QueryParameters,
        command: &SqlCommand,
        session: &Session,
    ) -> Result<(), Error> {
        if keys.len() <= 1 {
            return Ok(());
        }
        for position in 0..self.entity_span() {
            let mut seen = BTreeSet::new();
            let owners: Vec<EntityKey> = keys
                .iter()
                .filter_map(|row| row.get(position).cloned().flatten())
                .filter(|key| seen.insert(key.clone()))
                .collect();
            if owners.is_empty() {
                continue;
            }
            let fetch = Arc::new(SubselectFetch::new(
                command.clone(),
                owners.clone(),
                self.query_spaces().clone(),
            ));
            for owner in owners {
                session.register_subselect(owner, fetch.clone());
            }
        }
        Ok(())
    }

    /// Build the caller-visible list, applying the transformer.
    fn get_result_list(
        &self,
        rows: Vec<ResultValue>,
        transformer: Option<&dyn ResultTransformer>,
    ) -> Result<Vec<ResultValue>, Error> {
        let Some(transformer) = transformer else {
            return Ok(rows);
        };
        let rows = rows
            .into_iter()
            .map(|row| transformer.transform_tuple(row))
            .collect::<Result<Vec<_>, _>>()?;
        transformer.transform_list(rows)
    }

    /// Turn materialized rows into cacheable raw rows.
    fn disassemble(&self, rows: &[ResultValue]) -> Result<Vec<Row>, Error> {
        Ok(rows
            .iter()
            .map(|row| {
                let mut values = Vec::new();
                disassemble_value(row, &mut values);
                Row::new(values)
            })
            .collect())
    }

    /// Rebuild materialized rows from cached raw rows.
    fn assemble(&self, rows: Vec<Row>, session: &Session) -> Result<Vec<ResultValue>, Error> {
        rows.into_iter()
            .map(|row| {
                let mut values = row.values.into_iter();
                let value = assemble_value(&mut values, session)?;
                if values.next().is_some() {
                    return Err(Error::Cache("trailing values in cached row".into()));
                }
                Ok(value)
            })
            .collect()
    }

    /// Turn cached rows into materialized rows attached to the session.
    fn process_cached_results(
        &self,
        rows: Vec<Row>,
        session: &Session,
        parameters: &QueryParameters,
    ) -> Result<Vec<ResultValue>, Error> {
        let values = self.assemble(rows, session)?;
        let read_only = parameters
            .read_only
            .unwrap_or_else(|| session.default_read_only());
        for value in &values {
            mark_read_only(value, read_only);
        }
        Ok(values)
    }

    /// Consult the query cache.
    fn results_if_cacheable(
        &self,
        session: &Session,
        parameters: &QueryParameters,
        command: &SqlCommand,
    ) -> Result<CacheLookup, Error> {
        if !parameters.cacheable {
            return Ok(CacheLookup::not_cacheable());
        }
        let Some(cache) = session.query_cache() else {
            return Ok(CacheLookup::not_cacheable());
        };
        let key = QueryKey::new(command, parameters);
        let rows = cache.get(&key, self.query_spaces());
        tracing::debug!(
            loader = self.name(),
            key = %key,
            hit = rows.is_some(),
            "query cache lookup"
        );
        Ok(CacheLookup {
            rows,
            cache: Some(cache.clone()),
            key: Some(key),
        })
    }

    /// Publish freshly read rows into the query cache.
    fn put_result_in_cache(
        &self,
        cache: &dyn QueryCache,
        key: QueryKey,
        rows: &[ResultValue],
    ) -> Result<bool, Error> {
        let raw = self.disassemble(rows)?;
        cache.put(key, &raw, self.query_spaces())
    }
}

const TAG_SCALAR: i32 = 0;
const TAG_ENTITY: i32 = 1;
const TAG_TUPLE: i32 = 2;

fn disassemble_value(value: &ResultValue, out: &mut Vec<Value>) {
    match value {
        ResultValue::Scalar(v) => {
            out.push(Value::Int32(TAG_SCALAR));
            out.push(v.clone());
        }
        ResultValue::Entity(e) => {
            let properties = e.properties();
            out.push(Value::Int32(TAG_ENTITY));
            out.push(Value::String(e.entity_name().to_string()));
            out.push(Value::Uuid(e.key().id));
            out.push(Value::Int64(properties.len() as i64));
            for (name, v) in properties {
                out.push(Value::String(name));
                out.push(v);
            }
        }
        ResultValue::Tuple(items) => {
            out.push(Value::Int32(TAG_TUPLE));
            out.push(Value::Int64(items.len() as i64));
            for item in items {
                disassemble_value(item, out);
            }
        }
    }
}

fn next_value<I: Iterator<Item = Value>>(values: &mut I) -> Result<Value, Error> {
    values
        .next()
        .ok_or_else(|| Error::Cache("truncated cached row".into()))
}

fn next_count<I: Iterator<Item = Value>>(values: &mut I) -> Result<usize, Error> {
    next_value(values)?
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| Error::Cache("invalid length in cached row".into()))
}

fn assemble_value<I: Iterator<Item = Value>>(
    values: &mut I,
    session: &Session,
) -> Result<ResultValue, Error> {
    let tag = next_value(values)?
        .as_i32()
        .ok_or_else(|| Error::Cache("missing tag in cached row".into()))?;
    match tag {
        TAG_SCALAR => Ok(ResultValue::Scalar(next_value(values)?)),
        TAG_ENTITY => {
            let name = match next_value(values)? {
                Value::String(s) => s,
                other => {
                    return Err(Error::Cache(format!(
                        "expected entity name, found {}",
                        other.type_name()
                    )))
                }
            };
            let id = *next_value(values)?
                .as_uuid()
                .ok_or_else(|| Error::Cache("expected entity id".into()))?;
            let count = next_count(values)?;
            let mut properties = BTreeMap::new();
            for _ in 0..count {
                let prop = match next_value(values)? {
                    Value::String(s) => s,
                    _ => return Err(Error::Cache("expected property name".into())),
                };
                properties.insert(prop, next_value(values)?);
            }
            let (entity, _) = session.load_entity(EntityKey::new(name, id), properties);
            Ok(ResultValue::Entity(entity))
        }
        TAG_TUPLE => {
            let count = next_count(values)?;
            let items = (0..count)
                .map(|_| assemble_value(values, session))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ResultValue::Tuple(items))
        }
        other => Err(Error::Cache(format!("unknown tag {} in cached row", other))),
    }
}

fn mark_read_only(value: &ResultValue, read_only: bool) {
    match value {
        ResultValue::Entity(e) => e.set_read_only(read_only),
        ResultValue::Tuple(items) => items.iter().for_each(|i| mark_read_only(i, read_only)),
        ResultValue::Scalar(_) => {}
    }
}
