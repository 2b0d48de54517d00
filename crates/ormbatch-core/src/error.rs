//! Core error types.

use thiserror::Error;

use crate::driver::DriverError;

/// Batch engine errors.
///
/// The first three variants form the caller-facing taxonomy: plan resolution
/// failures happen before any I/O, data access failures wrap everything that
/// goes wrong while talking to the store, and `NotExecuted` is a usage error.
#[derive(Debug, Error)]
pub enum Error {
    /// Query parameters or mapping could not be resolved into load plans.
    #[error("plan resolution failed: {0}")]
    PlanResolution(String),

    /// Executing or streaming a command failed.
    #[error("{message}: [{sql}]")]
    DataAccess {
        /// What was being attempted.
        message: String,
        /// The (combined) command text.
        sql: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Results were requested before the owning batch ran.
    #[error("batch wasn't executed; call QueryBatch::execute() before accessing results")]
    NotExecuted,

    /// Raw driver failure.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Execution was cancelled through the session.
    #[error("batch execution was cancelled")]
    Cancelled,

    /// A result value did not have the requested type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Query cache encode/decode failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Shared-type error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ormbatch_proto::Error),

    /// A background resolution task failed.
    #[error("background task failed: {0}")]
    Background(String),
}

impl Error {
    /// Wrap a failure as a data access error carrying the command text.
    pub fn data_access(message: impl Into<String>, sql: impl Into<String>, source: Error) -> Self {
        Error::DataAccess {
            message: message.into(),
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    /// Whether this is a data access failure.
    pub fn is_data_access(&self) -> bool {
        matches!(self, Error::DataAccess { .. })
    }

    /// The command text attached to a data access failure.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::DataAccess { sql, .. } => Some(sql),
            _ => None,
        }
    }
}
