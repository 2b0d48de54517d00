//! Row selection (offset, limit and timeout) for a query.

use serde::{Deserialize, Serialize};

/// Which slice of a result set a query wants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowSelection {
    /// Number of leading rows to skip.
    pub first_row: Option<usize>,
    /// Maximum number of rows to return.
    pub max_rows: Option<usize>,
    /// Statement timeout in seconds.
    pub timeout_secs: Option<u32>,
}

impl RowSelection {
    /// Selection returning every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Set the number of rows to skip.
    pub fn with_first_row(mut self, first_row: usize) -> Self {
        self.first_row = Some(first_row);
        self
    }

    /// Set the maximum number of rows.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Set the statement timeout.
    pub fn with_timeout_secs(mut self, secs: u32) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Whether a row cap applies.
    pub fn has_max_rows(&self) -> bool {
        self.max_rows.is_some()
    }

    /// Whether leading rows are skipped.
    pub fn has_first_row(&self) -> bool {
        self.first_row.map_or(false, |n| n > 0)
    }

    /// The effective row cap (unbounded when unset).
    pub fn row_cap(&self) -> usize {
        self.max_rows.unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_cap() {
        assert_eq!(RowSelection::all().row_cap(), usize::MAX);
        assert_eq!(RowSelection::all().with_max_rows(3).row_cap(), 3);
    }

    #[test]
    fn test_first_row_zero_is_not_a_skip() {
        assert!(!RowSelection::all().with_first_row(0).has_first_row());
        assert!(RowSelection::all().with_first_row(2).has_first_row());
    }
}
