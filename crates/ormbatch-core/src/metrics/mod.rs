//! Batch instrumentation.
//!
//! The orchestrator reports one sample per `execute` call to a
//! [`StatisticsSink`]. [`QueryStatistics`] is the in-process sink: it keeps
//! totals, a latency [`Histogram`] and per-label counts, and renders them in
//! Prometheus text format.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ormbatch_core::metrics::QueryStatistics;
//!
//! let stats = Arc::new(QueryStatistics::new());
//! let factory = SessionFactory::builder()
//!     .with_statistics(stats.clone())
//!     .with_config(BatchConfig::default().with_statistics(true))
//!     // ...
//!     .build()?;
//!
//! println!("{}", stats.to_prometheus());
//! ```

mod histogram;
mod statistics;

pub use histogram::{Histogram, DEFAULT_LATENCY_BOUNDS_US};
pub use statistics::{QuerySample, QueryStatistics, StatisticsSink};
