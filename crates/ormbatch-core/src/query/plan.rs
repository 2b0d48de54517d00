//! Load plans and their per-execution state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use ormbatch_proto::{Row, SqlCommand};

use crate::cache::{QueryCache, QueryKey};
use crate::driver::ResultCursor;
use crate::entity::{EntityKey, EntityRef};
use crate::error::Error;
use crate::loader::{Loader, QueryParameters};
use crate::result::ResultValue;
use crate::session::Session;

/// One physical unit of execution of a query.
#[derive(Clone)]
pub struct LoadPlan {
    /// Row materialization strategy.
    pub loader: Arc<dyn Loader>,
    /// Parameters to execute with.
    pub parameters: QueryParameters,
    /// Tables the plan depends on.
    pub query_spaces: BTreeSet<String>,
}

impl LoadPlan {
    /// Create a plan; query spaces come from the loader.
    pub fn new(loader: Arc<dyn Loader>, parameters: QueryParameters) -> Self {
        let query_spaces = loader.query_spaces().clone();
        Self {
            loader,
            parameters,
            query_spaces,
        }
    }
}

/// Deferred cache publication for a plan that missed the cache.
struct PendingPut {
    cache: Arc<dyn QueryCache>,
    key: QueryKey,
}

/// A load plan plus its hydration buffers for one execution.
pub(crate) struct PlanState {
    plan: LoadPlan,
    command: Option<SqlCommand>,
    cached_rows: Option<Vec<Row>>,
    put_in_cache: Option<PendingPut>,
    hydrated: Vec<EntityRef>,
    subselect_keys: Vec<Vec<Option<EntityKey>>>,
    rows: Vec<ResultValue>,
    results: Option<Vec<ResultValue>>,
}

impl PlanState {
    pub(crate) fn new(plan: LoadPlan) -> Self {
        Self {
            plan,
            command: None,
            cached_rows: None,
            put_in_cache: None,
            hydrated: vec![],
            subselect_keys: vec![],
            rows: vec![],
            results: None,
        }
    }

    /// Build the command and consult the cache.
    ///
    /// Returns the command to execute, or `None` when the cache already
    /// supplied the rows.
    pub(crate) fn prepare(&mut self, session: &Session) -> Result<Option<SqlCommand>, Error> {
        let loader = &self.plan.loader;
        let command = loader.create_command(&self.plan.parameters, session)?;
        let lookup = loader.results_if_cacheable(session, &self.plan.parameters, &command)?;

        self.command = Some(command.clone());
        if let Some(rows) = lookup.rows {
            self.cached_rows = Some(rows);
            return Ok(None);
        }
        if let (Some(cache), Some(key)) = (lookup.cache, lookup.key) {
            self.put_in_cache = Some(PendingPut { cache, key });
        }
        Ok(Some(command))
    }

    /// Whether the cache satisfied this plan.
    pub(crate) fn is_satisfied(&self) -> bool {
        self.cached_rows.is_some()
    }

    /// Read this plan's rows from the current result set.
    ///
    /// Returns the number of rows consumed. Never reads past the row cap.
    pub(crate) fn read_result_set(
        &mut self,
        cursor: &mut dyn ResultCursor,
        session: &Session,
    ) -> Result<usize, Error> {
        let loader = self.plan.loader.clone();
        let parameters = &self.plan.parameters;
        let selection = parameters.selection;
        let dialect = session.dialect();

        if !dialect.supports_limit_offset || !loader.use_limit(&selection, dialect) {
            advance(cursor, selection.first_row.unwrap_or(0))?;
        }
        if parameters.auto_discover_scalar_types {
            loader.auto_discover_types(cursor.columns(), parameters)?;
        }

        let collect_keys = loader.is_subselect_loading_enabled();
        let cap = selection.row_cap();
        let mut count = 0;
        while count < cap && cursor.read()? {
            let mut keys = vec![None; loader.entity_span()];
            let value = loader.read_row(
                cursor.current()?,
                cursor.columns(),
                session,
                parameters,
                &mut self.hydrated,
                &mut keys,
            )?;
            self.rows.push(value);
            if collect_keys {
                self.subselect_keys.push(keys);
            }
            count += 1;
        }

        tracing::trace!(loader = loader.name(), rows = count, "read result set");
        Ok(count)
    }

    /// Run this plan on its own: one command, one cursor.
    pub(crate) fn execute_standalone(
        &mut self,
        session: &Session,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        let Some(command) = self.prepare(session)? else {
            return Ok(0);
        };
        let run = |state: &mut Self| -> Result<usize, Error> {
            session.check_cancelled()?;
            let mut guard = session.execute_reader(&command, timeout)?;
            let rows = state.read_result_set(guard.cursor(), session)?;
            guard.close()?;
            Ok(rows)
        };
        run(self).map_err(|e| {
            tracing::error!(error = %e, sql = %command, "failed to execute query");
            Error::data_access("failed to execute query", command.to_string(), e)
        })
    }

    /// Finish hydration, register subselects and publish to the cache.
    pub(crate) fn post_process(&mut self, session: &Session) -> Result<(), Error> {
        let loader = self.plan.loader.clone();
        let parameters = &self.plan.parameters;
        let transformer = parameters.result_transformer.as_deref();

        if let Some(cached) = self.cached_rows.take() {
            let rows = loader.process_cached_results(cached, session, parameters)?;
            self.results = Some(loader.get_result_list(rows, transformer)?);
            return Ok(());
        }

        let read_only = parameters
            .read_only
            .unwrap_or_else(|| session.default_read_only());
        loader.initialize_entities_and_collections(&self.hydrated, read_only, session)?;

        if loader.is_subselect_loading_enabled() {
            if let Some(command) = &self.command {
                loader.create_subselects(&self.subselect_keys, parameters, command, session)?;
            }
        }

        if let Some(put) = self.put_in_cache.take() {
            if let Err(e) = loader.put_result_in_cache(put.cache.as_ref(), put.key, &self.rows) {
                tracing::warn!(loader = loader.name(), error = %e, "failed to cache query results");
            }
        }

        self.hydrated.clear();
        self.subselect_keys.clear();
        let rows = std::mem::take(&mut self.rows);
        self.results = Some(loader.get_result_list(rows, transformer)?);
        Ok(())
    }

    /// Final rows of this plan.
    pub(crate) fn take_results(&mut self) -> Vec<ResultValue> {
        self.results.take().unwrap_or_default()
    }
}

/// Skip leading rows the store did not skip itself.
fn advance(cursor: &mut dyn ResultCursor, first_row: usize) -> Result<(), Error> {
    for _ in 0..first_row {
        if !cursor.read()? {
            break;
        }
    }
    Ok(())
}
