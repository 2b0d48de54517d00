//! In-memory reference driver.
//!
//! Answers commands through a responder closure and counts physical round
//! trips, which makes it suitable for embedding and for exercising the batch
//! protocol without a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ormbatch_proto::{ResultSet, Row, SqlCommand};
use parking_lot::Mutex;

use super::{Driver, DriverError, ResultCursor};

type Responder = dyn Fn(&SqlCommand) -> Result<ResultSet, DriverError> + Send + Sync;

/// Driver backed by a responder closure.
pub struct MemoryDriver {
    responder: Box<Responder>,
    supports_multiple_queries: bool,
    round_trips: AtomicUsize,
    executed: Mutex<Vec<String>>,
    last_timeout: Mutex<Option<Duration>>,
}

impl MemoryDriver {
    /// Create a driver that can combine commands.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&SqlCommand) -> Result<ResultSet, DriverError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            supports_multiple_queries: true,
            round_trips: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            last_timeout: Mutex::new(None),
        }
    }

    /// Disable combined requests.
    pub fn without_multiple_queries(mut self) -> Self {
        self.supports_multiple_queries = false;
        self
    }

    /// Number of physical requests issued so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    /// Text of every request issued so far, one entry per round trip.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Timeout passed with the most recent request.
    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock()
    }

    /// Reset the round-trip counter and request log.
    pub fn reset(&self) {
        self.round_trips.store(0, Ordering::SeqCst);
        self.executed.lock().clear();
        *self.last_timeout.lock() = None;
    }

    fn record(&self, sql: String, timeout: Option<Duration>) {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(sql);
        *self.last_timeout.lock() = timeout;
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_multiple_queries(&self) -> bool {
        self.supports_multiple_queries
    }

    fn execute_reader(
        &self,
        command: &SqlCommand,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ResultCursor>, DriverError> {
        self.record(command.to_string(), timeout);
        let set = (self.responder)(command)?;
        Ok(Box::new(MemoryCursor::new(vec![set])))
    }

    fn execute_multiple(
        &self,
        commands: &[SqlCommand],
        timeout: Option<Duration>,
    ) -> Result<Box<dyn ResultCursor>, DriverError> {
        if !self.supports_multiple_queries {
            return Err(DriverError::MultipleQueriesUnsupported);
        }
        let sql = commands
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(";\n");
        self.record(sql, timeout);

        let sets = commands
            .iter()
            .map(|c| (self.responder)(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(MemoryCursor::new(sets)))
    }
}

/// Cursor over materialized result sets.
#[derive(Debug)]
pub struct MemoryCursor {
    sets: Vec<ResultSet>,
    set_index: usize,
    row_index: Option<usize>,
    closed: bool,
}

impl MemoryCursor {
    /// Create a cursor positioned before the first row of the first set.
    pub fn new(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            set_index: 0,
            row_index: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed {
            Err(DriverError::CursorClosed)
        } else {
            Ok(())
        }
    }
}

impl ResultCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        self.sets
            .get(self.set_index)
            .map(|s| s.columns.as_slice())
            .unwrap_or(&[])
    }

    fn read(&mut self) -> Result<bool, DriverError> {
        self.ensure_open()?;
        let Some(set) = self.sets.get(self.set_index) else {
            return Ok(false);
        };
        let next = self.row_index.map_or(0, |i| i + 1);
        if next < set.rows.len() {
            self.row_index = Some(next);
            Ok(true)
        } else {
            self.row_index = Some(set.rows.len());
            Ok(false)
        }
    }

    fn current(&self) -> Result<&Row, DriverError> {
        self.ensure_open()?;
        self.sets
            .get(self.set_index)
            .and_then(|s| self.row_index.and_then(|i| s.rows.get(i)))
            .ok_or(DriverError::NoCurrentRow)
    }

    fn next_result(&mut self) -> Result<bool, DriverError> {
        self.ensure_open()?;
        if self.set_index < self.sets.len() {
            self.set_index += 1;
        }
        self.row_index = None;
        Ok(self.set_index < self.sets.len())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
