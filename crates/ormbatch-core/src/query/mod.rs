//! Query adapters.
//!
//! Every query source (criteria, compiled statement, expression) is
//! normalized into a [`PlannedQuery`], which implements the
//! [`QueryPlanProvider`] capability the batch drives. The batch depends only on
//! that capability, never on a concrete source.
//!
//! # Lifecycle
//!
//! 1. `init` resolves the source into load plans (no I/O).
//! 2. `build_commands` consults the cache per plan and returns the commands of
//!    the plans it did not satisfy, in plan order.
//! 3. `process_result_set` is called once per pending plan, in order, with the
//!    cursor positioned on that plan's result set.
//! 4. `post_process` finishes hydration and publishes to the cache.
//! 5. `results` returns the final rows.
//!
//! `execute_standalone` replaces steps 2-4 when commands cannot be combined.

mod criteria;
mod expression;
mod plan;
mod statement;

pub use criteria::{Criteria, Projection};
pub use expression::{ExpressionQuery, PostExecuteTransform, QueryExpression};
pub use plan::LoadPlan;
pub use statement::Statement;

use std::sync::Arc;
use std::time::Duration;

use ormbatch_proto::SqlCommand;
use parking_lot::Mutex;

use crate::driver::ResultCursor;
use crate::error::Error;
use crate::result::ResultValue;
use crate::session::Session;

use plan::PlanState;

/// Capability the batch drives for each query.
pub trait QueryPlanProvider: Send {
    /// Bind to a session and resolve load plans.
    fn init(&mut self, session: &Arc<Session>) -> Result<(), Error>;

    /// Commands for the plans the cache did not satisfy, in plan order.
    fn build_commands(&mut self) -> Result<Vec<SqlCommand>, Error>;

    /// Indices of plans that expect a result set, in order.
    fn pending_plans(&self) -> Vec<usize>;

    /// Read the result set of plan `index` from the cursor.
    fn process_result_set(
        &mut self,
        index: usize,
        cursor: &mut dyn ResultCursor,
    ) -> Result<usize, Error>;

    /// Finish every plan after the cursor is closed.
    fn post_process(&mut self) -> Result<(), Error>;

    /// Run every plan on its own round trip, then post-process.
    fn execute_standalone(&mut self, timeout: Option<Duration>) -> Result<usize, Error>;

    /// Final rows. Fails with [`Error::NotExecuted`] before execution.
    fn results(&self) -> Result<Vec<ResultValue>, Error>;

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

/// Handle to a query shared between a batch and a future.
pub type SharedQuery = Arc<Mutex<dyn QueryPlanProvider>>;

/// A query description that can be planned.
pub trait QuerySource: Send + 'static {
    /// Resolve into load plans. Must not perform I/O.
    fn resolve_plans(&mut self, session: &Session) -> Result<Vec<LoadPlan>, Error>;

    /// Adjust the concatenated rows of all plans.
    fn finish_results(&mut self, rows: Vec<ResultValue>) -> Result<Vec<ResultValue>, Error> {
        Ok(rows)
    }

    /// Short description for diagnostics.
    fn describe(&self) -> String;
}

/// A query source plus its execution state.
pub struct PlannedQuery<S> {
    source: S,
    session: Option<Arc<Session>>,
    plans: Vec<PlanState>,
    results: Option<Vec<ResultValue>>,
}

impl<S: QuerySource> PlannedQuery<S> {
    /// Wrap a source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            session: None,
            plans: vec![],
            results: None,
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn session(&self) -> Result<Arc<Session>, Error> {
        self.session
            .clone()
            .ok_or_else(|| Error::PlanResolution("query was not initialized".into()))
    }
}

impl<S: QuerySource> QueryPlanProvider for PlannedQuery<S> {
    fn init(&mut self, session: &Arc<Session>) -> Result<(), Error> {
        self.results = None;
        self.plans.clear();
        self.session = Some(session.clone());
        let plans = self.source.resolve_plans(session)?;
        self.plans = plans.into_iter().map(PlanState::new).collect();
        Ok(())
    }

    fn build_commands(&mut self) -> Result<Vec<SqlCommand>, Error> {
        let session = self.session()?;
        let mut commands = Vec::with_capacity(self.plans.len());
        for plan in &mut self.plans {
            if let Some(command) = plan.prepare(&session)? {
                commands.push(command);
            }
        }
        Ok(commands)
    }

    fn pending_plans(&self) -> Vec<usize> {
        self.plans
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_satisfied())
            .map(|(i, _)| i)
            .collect()
    }

    fn process_result_set(
        &mut self,
        index: usize,
        cursor: &mut dyn ResultCursor,
    ) -> Result<usize, Error> {
        let session = self.session()?;
        let plan = self.plans.get_mut(index).ok_or_else(|| {
            Error::PlanResolution(format!("no load plan at index {}", index))
        })?;
        plan.read_result_set(cursor, &session)
    }

    fn post_process(&mut self) -> Result<(), Error> {
        let session = self.session()?;
        let mut rows = Vec::new();
        for plan in &mut self.plans {
            plan.post_process(&session)?;
            rows.extend(plan.take_results());
        }
        self.results = Some(self.source.finish_results(rows)?);
        Ok(())
    }

    fn execute_standalone(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        let session = self.session()?;
        let mut rows = 0;
        for plan in &mut self.plans {
            rows += plan.execute_standalone(&session, timeout)?;
        }
        self.post_process()?;
        Ok(rows)
    }

    fn results(&self) -> Result<Vec<ResultValue>, Error> {
        self.results.clone().ok_or(Error::NotExecuted)
    }

    fn describe(&self) -> String {
        self.source.describe()
    }
}

/// Conversion into a batchable query handle.
pub trait IntoQuery {
    /// Wrap into a shared handle.
    fn into_query(self) -> SharedQuery;
}

impl<S: QuerySource> IntoQuery for S {
    fn into_query(self) -> SharedQuery {
        Arc::new(Mutex::new(PlannedQuery::new(self)))
    }
}

impl IntoQuery for SharedQuery {
    fn into_query(self) -> SharedQuery {
        self
    }
}
