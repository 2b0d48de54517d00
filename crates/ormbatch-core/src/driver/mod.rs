//! Driver collaborator boundary.
//!
//! A [`Driver`] executes physical commands and hands back a forward-only
//! [`ResultCursor`]. Drivers that can stream several result sets from one
//! request advertise it through [`Driver::supports_multiple_queries`]; the
//! batch then merges its commands into one [`ResultSetsCommand`].

mod memory;

pub use memory::{MemoryCursor, MemoryDriver};

use std::sync::Arc;
use std::time::Duration;

use ormbatch_proto::{Row, SqlCommand};
use thiserror::Error;

/// Driver-level failures.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The store rejected or failed a command.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The command exceeded its timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The command was cancelled.
    #[error("command cancelled")]
    Cancelled,

    /// The cursor was used after it was closed.
    #[error("cursor is closed")]
    CursorClosed,

    /// A row was requested before `read` returned true.
    #[error("cursor is not positioned on a row")]
    NoCurrentRow,

    /// The driver cannot combine commands into one request.
    #[error("driver does not support multiple result sets")]
    MultipleQueriesUnsupported,
}

/// Forward-only, single-pass cursor over one or more result sets.
pub trait ResultCursor: Send {
    /// Column names of the current result set.
    fn columns(&self) -> &[String];

    /// Advance to the next row of the current result set.
    fn read(&mut self) -> Result<bool, DriverError>;

    /// The row the cursor is positioned on.
    fn current(&self) -> Result<&Row, DriverError>;

    /// Move to the next result set, discarding unread rows of the current one.
    fn next_result(&mut self) -> Result<bool, DriverError>;

    /// Release the cursor.
    fn close(&mut self) -> Result<(), DriverError>;

    /// Whether the cursor has been released.
    fn is_closed(&self) -> bool;
}

/// Physical database driver.
pub trait Driver: Send + Sync {
    /// Driver name for diagnostics.
    fn name(&self) -> &str;

    /// Whether one request may carry several commands and stream their result
    /// sets back in order.
    fn supports_multiple_queries(&self) -> bool;

    /// Execute a single command.
    fn execute_reader(
        &self,
        command: &SqlCommand,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ResultCursor>, DriverError>;

    /// Execute several commands as one request. Result sets arrive in command
    /// order.
    fn execute_multiple(
        &self,
        _commands: &[SqlCommand],
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn ResultCursor>, DriverError> {
        Err(DriverError::MultipleQueriesUnsupported)
    }
}

/// Scoped ownership of an open cursor.
///
/// The cursor is closed when the guard is dropped, on every exit path.
/// Call [`CursorGuard::close`] to observe close failures.
pub struct CursorGuard {
    cursor: Box<dyn ResultCursor>,
    released: bool,
}

impl CursorGuard {
    /// Take ownership of a cursor.
    pub fn new(cursor: Box<dyn ResultCursor>) -> Self {
        Self {
            cursor,
            released: false,
        }
    }

    /// Borrow the cursor.
    pub fn cursor(&mut self) -> &mut dyn ResultCursor {
        self.cursor.as_mut()
    }

    /// Close the cursor and report any failure.
    pub fn close(mut self) -> Result<(), DriverError> {
        self.released = true;
        self.cursor.close()
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if self.released || self.cursor.is_closed() {
            return;
        }
        if let Err(e) = self.cursor.close() {
            tracing::warn!(error = %e, "failed to close result cursor");
        }
    }
}

/// Commands accumulated for one combined round trip.
pub struct ResultSetsCommand {
    driver: Arc<dyn Driver>,
    commands: Vec<SqlCommand>,
}

impl ResultSetsCommand {
    /// Start an empty combined command for a driver.
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            commands: vec![],
        }
    }

    /// Append a command; its result set follows those already appended.
    pub fn append(&mut self, command: SqlCommand) {
        self.commands.push(command);
    }

    /// Whether any command was appended.
    pub fn has_queries(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Number of appended commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no command was appended.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Combined command text for diagnostics.
    pub fn sql(&self) -> String {
        self.commands
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(";\n")
    }

    /// Issue the combined request.
    pub fn execute_reader(&self, timeout: Option<Duration>) -> Result<CursorGuard, DriverError> {
        let cursor = self.driver.execute_multiple(&self.commands, timeout)?;
        Ok(CursorGuard::new(cursor))
    }
}
