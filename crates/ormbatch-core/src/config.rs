//! Batch engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default capacity of the in-memory query cache.
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 1024;

/// Engine-wide configuration shared by every session of a factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Timeout in seconds handed to the driver when a batch sets none.
    pub default_timeout_secs: Option<u32>,

    /// Record one statistics sample per batch execution.
    pub statistics_enabled: bool,

    /// Consult and populate the query cache for cacheable queries.
    pub query_cache_enabled: bool,

    /// Capacity of the in-memory query cache created when none is supplied.
    pub query_cache_capacity: usize,

    /// Combine queries into one request when the driver supports it.
    /// When false every query runs as its own round trip.
    pub use_multiple_queries: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            statistics_enabled: false,
            query_cache_enabled: false,
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            use_multiple_queries: true,
        }
    }
}

impl BatchConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.query_cache_enabled && self.query_cache_capacity == 0 {
            return Err(Error::Config(
                "query_cache_capacity must be positive when the query cache is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Set the default timeout.
    pub fn with_default_timeout(mut self, secs: u32) -> Self {
        self.default_timeout_secs = Some(secs);
        self
    }

    /// Enable or disable statistics.
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    /// Enable or disable the query cache.
    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.query_cache_enabled = enabled;
        self
    }

    /// Set the in-memory query cache capacity.
    pub fn with_query_cache_capacity(mut self, capacity: usize) -> Self {
        self.query_cache_capacity = capacity;
        self
    }

    /// Allow or forbid combining queries into one request.
    pub fn with_multiple_queries(mut self, enabled: bool) -> Self {
        self.use_multiple_queries = enabled;
        self
    }
}
