//! Batch orchestration.
//!
//! A [`QueryBatch`] collects queries from any source and executes them in as
//! few round trips as the driver allows:
//!
//! - zero when every plan is served from the query cache,
//! - one when the driver can stream several result sets from one request,
//! - one per query otherwise.
//!
//! A batch is single-use per execution: `execute` drains the pending queries
//! whether it succeeds or fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::demux::demultiplex;
use crate::driver::ResultSetsCommand;
use crate::error::Error;
use crate::future::{FutureEnumerable, FutureList, FutureValue};
use crate::query::{
    ExpressionQuery, IntoQuery, PostExecuteTransform, QueryExpression, QueryPlanProvider,
    SharedQuery,
};
use crate::result::FromResultValue;
use crate::session::Session;

type QueryGuard<'a> = MutexGuard<'a, dyn QueryPlanProvider>;

struct BatchState {
    queries: Vec<SharedQuery>,
    timeout_secs: Option<u32>,
}

/// An ordered set of queries executed together.
#[derive(Clone)]
pub struct QueryBatch {
    session: Arc<Session>,
    state: Arc<Mutex<BatchState>>,
}

impl QueryBatch {
    /// Create an empty batch bound to a session.
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(BatchState {
                queries: vec![],
                timeout_secs: None,
            })),
        }
    }

    /// The session the batch runs in.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Timeout in seconds handed to the driver.
    pub fn timeout(&self) -> Option<u32> {
        self.state.lock().timeout_secs
    }

    /// Set the timeout in seconds.
    pub fn set_timeout(&self, secs: Option<u32>) {
        self.state.lock().timeout_secs = secs;
    }

    /// Builder-style timeout.
    pub fn with_timeout(self, secs: u32) -> Self {
        self.set_timeout(Some(secs));
        self
    }

    /// Number of pending queries.
    pub fn len(&self) -> usize {
        self.state.lock().queries.len()
    }

    /// Check if no query is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queries.is_empty()
    }

    /// Append a query. Its plans are not resolved until execution.
    pub fn add(&self, query: impl IntoQuery) -> SharedQuery {
        let query = query.into_query();
        self.add_shared(query.clone());
        query
    }

    /// Append an existing query handle. Adding the same handle twice is
    /// ignored.
    pub fn add_shared(&self, query: SharedQuery) {
        let mut state = self.state.lock();
        if state.queries.iter().any(|q| Arc::ptr_eq(q, &query)) {
            tracing::warn!("query already added to batch; ignoring");
            return;
        }
        state.queries.push(query);
    }

    /// Append a query and return a handle to its list of results.
    pub fn add_as_list<T: FromResultValue>(&self, query: impl IntoQuery) -> FutureList<T> {
        let query = self.add(query);
        FutureList::new(self.clone(), query)
    }

    /// Append a query and return a handle to its first result.
    pub fn add_as_value<T: FromResultValue>(&self, query: impl IntoQuery) -> FutureValue<T> {
        let query = self.add(query);
        FutureValue::new(self.clone(), query)
    }

    /// Append a query and return a handle iterating its results.
    pub fn add_as_enumerable<T: FromResultValue>(
        &self,
        query: impl IntoQuery,
    ) -> FutureEnumerable<T> {
        let query = self.add(query);
        FutureEnumerable::new(self.clone(), query)
    }

    /// Append an expression query whose whole result is reduced by
    /// `transform`, returning a handle to the reduced value.
    pub fn add_as_value_with<T: FromResultValue>(
        &self,
        expression: QueryExpression,
        transform: PostExecuteTransform,
    ) -> FutureValue<T> {
        self.add_as_value(ExpressionQuery::new(expression).with_transform(transform))
    }

    /// Append an expression query whose result list is reshaped by
    /// `transform`.
    pub fn add_as_list_with<T: FromResultValue>(
        &self,
        expression: QueryExpression,
        transform: PostExecuteTransform,
    ) -> FutureList<T> {
        self.add_as_list(ExpressionQuery::new(expression).with_transform(transform))
    }

    /// Execute every pending query.
    ///
    /// No-op when nothing is pending. The pending set is cleared on every
    /// exit path. A cancellation request lapses when the call returns, and a
    /// failed execution discards the collections it queued for loading.
    pub fn execute(&self) -> Result<(), Error> {
        let (queries, timeout_secs) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.queries), state.timeout_secs)
        };
        let timeout = timeout_secs
            .map(|secs| Duration::from_secs(u64::from(secs)))
            .or_else(|| self.session.default_timeout());

        let result = if queries.is_empty() {
            Ok(())
        } else {
            self.execute_queries(&queries, timeout)
        };

        self.session.clear_cancellation();
        if result.is_err() {
            self.session.discard_non_lazy_collections();
        }
        result
    }

    fn execute_queries(
        &self,
        queries: &[SharedQuery],
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let started = Instant::now();
        let mut guards: Vec<QueryGuard<'_>> = queries.iter().map(|q| q.lock()).collect();
        for query in guards.iter_mut() {
            query.init(&self.session)?;
        }

        let rows = if self.session.supports_multiple_queries() {
            self.execute_combined(&mut guards, timeout)?
        } else {
            self.execute_sequential(&mut guards, timeout)?
        };

        if let Some(statistics) = self.session.statistics() {
            statistics.query_executed(&format!("{} queries", guards.len()), rows, started.elapsed());
        }
        Ok(())
    }

    fn execute_sequential(
        &self,
        queries: &mut [QueryGuard<'_>],
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        tracing::debug!(queries = queries.len(), "executing queries sequentially");
        let mut rows = 0;
        for query in queries.iter_mut() {
            rows += query.execute_standalone(timeout)?;
        }
        self.session.initialize_non_lazy_collections()?;
        Ok(rows)
    }

    fn execute_combined(
        &self,
        queries: &mut [QueryGuard<'_>],
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        let mut command = ResultSetsCommand::new(self.session.driver().clone());
        for query in queries.iter_mut() {
            for cmd in query.build_commands()? {
                command.append(cmd);
            }
        }

        let sql = command.sql();
        if command.has_queries() {
            tracing::debug!(queries = command.len(), sql = %sql, "executing multi query");
        } else {
            tracing::debug!("every query served from the query cache");
        }

        self.run_combined(&command, queries, timeout).map_err(|e| {
            tracing::error!(error = %e, sql = %sql, "failed to execute multi query");
            Error::data_access("failed to execute multi query", sql, e)
        })
    }

    fn run_combined(
        &self,
        command: &ResultSetsCommand,
        queries: &mut [QueryGuard<'_>],
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        let mut rows = 0;
        if command.has_queries() {
            let mut reader = command.execute_reader(timeout)?;
            rows = demultiplex(queries, reader.cursor(), &self.session)?;
            reader.close()?;
        }

        for query in queries.iter_mut() {
            query.post_process()?;
        }
        self.session.initialize_non_lazy_collections()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;
    use crate::loader::Loader;
    use crate::query::{Criteria, Statement};
    use crate::session::SessionFactory;
    use crate::translator::QueryTranslator;
    use ormbatch_proto::ResultSet;

    struct EmptyTranslator;

    impl QueryTranslator for EmptyTranslator {
        fn implementors(&self, _entity: &str) -> Vec<String> {
            vec![]
        }
        fn criteria_loader(
            &self,
            _implementor: &str,
            _criteria: &Criteria,
            _session: &Session,
        ) -> Result<Arc<dyn Loader>, Error> {
            Err(Error::PlanResolution("no loaders".into()))
        }
        fn statement_loaders(
            &self,
            _statement: &Statement,
            _session: &Session,
        ) -> Result<Vec<Arc<dyn Loader>>, Error> {
            Ok(vec![])
        }
        fn expression_statement(
            &self,
            _expression: &QueryExpression,
            _session: &Session,
        ) -> Result<Statement, Error> {
            Err(Error::PlanResolution("no expressions".into()))
        }
    }

    fn batch() -> (QueryBatch, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new(|_| Ok(ResultSet::default())));
        let factory = SessionFactory::builder()
            .with_driver(driver.clone())
            .with_translator(Arc::new(EmptyTranslator))
            .build()
            .unwrap();
        (QueryBatch::new(factory.open_session()), driver)
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (batch, driver) = batch();
        batch.execute().unwrap();
        assert_eq!(driver.round_trips(), 0);
    }

    #[test]
    fn test_plan_resolution_failure_clears_batch() {
        let (batch, driver) = batch();
        batch.add(Criteria::for_entity("Unknown"));
        assert_eq!(batch.len(), 1);

        let err = batch.execute().unwrap_err();
        assert!(matches!(err, Error::PlanResolution(_)));
        assert!(batch.is_empty());
        assert_eq!(driver.round_trips(), 0);
    }

    #[test]
    fn test_duplicate_handle_ignored() {
        let (batch, _) = batch();
        let q = batch.add(Criteria::for_entity("E"));
        batch.add_shared(q);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_timeout_accessors() {
        let (batch, _) = batch();
        assert_eq!(batch.timeout(), None);
        let batch = batch.with_timeout(12);
        assert_eq!(batch.timeout(), Some(12));
        batch.set_timeout(None);
        assert_eq!(batch.timeout(), None);
    }
}
