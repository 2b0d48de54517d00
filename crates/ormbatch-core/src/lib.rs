//! ORMBatch core: heterogeneous multi-query batch execution.
//!
//! Queries built from criteria, compiled statements or expressions are added
//! to a [`QueryBatch`]. On execution the batch resolves every query into load
//! plans, serves what it can from the query cache, merges the remaining
//! commands into a single round trip, demultiplexes the returned result sets
//! back to their queries and finally runs deferred hydration (subselect
//! collections, cache publication).
//!
//! # Modules
//!
//! - [`batch`] - The batch orchestrator
//! - [`query`] - Query sources and the plan-provider capability
//! - [`future`] - Deferred result handles
//! - [`driver`] - Driver and cursor boundary, plus an in-memory driver
//! - [`loader`] - Loader boundary: command building and row materialization
//! - [`translator`] - Mapping boundary producing loaders
//! - [`session`] - Session factory, sessions and persistence context
//! - [`cache`] - Second-level query cache
//! - [`metrics`] - Batch statistics
//! - [`config`] - Engine configuration
//!
//! # Example
//!
//! ```ignore
//! let batch = QueryBatch::new(factory.open_session());
//! let mut count = batch.add_as_value::<i64>(
//!     Criteria::for_entity("EntityComplex").with_projection(Projection::RowCount),
//! );
//! let mut recent = batch.add_as_list::<EntityRef>(
//!     Criteria::for_entity("EntityComplex").add(FilterExpr::ge("Version", 1)),
//! );
//!
//! // One round trip for both queries.
//! let count = count.value()?;
//! let recent = recent.value()?;
//! ```

pub mod batch;
pub mod cache;
pub mod config;
mod demux;
pub mod driver;
pub mod entity;
pub mod error;
pub mod future;
pub mod loader;
pub mod metrics;
pub mod query;
pub mod result;
pub mod session;
pub mod translator;

pub use batch::QueryBatch;
pub use cache::{CacheStats, InMemoryQueryCache, QueryCache, QueryKey};
pub use config::BatchConfig;
pub use driver::{Driver, DriverError, MemoryDriver, ResultCursor};
pub use entity::{Entity, EntityKey, EntityRef, PersistentCollection};
pub use error::Error;
pub use future::{FutureEnumerable, FutureList, FutureValue};
pub use loader::{CollectionLoader, Loader, QueryParameters};
pub use metrics::{QueryStatistics, StatisticsSink};
pub use query::{
    Criteria, ExpressionQuery, IntoQuery, LoadPlan, PostExecuteTransform, Projection,
    QueryExpression, QueryPlanProvider, QuerySource, SharedQuery, Statement,
};
pub use result::{DistinctRootEntity, FromResultValue, ResultShape, ResultTransformer, ResultValue};
pub use session::{Dialect, PendingCollection, Session, SessionFactory, SubselectFetch};
pub use translator::QueryTranslator;

/// Result type for batch operations.
pub type Result<T> = std::result::Result<T, Error>;
