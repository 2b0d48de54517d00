//! Physical commands handed to a driver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A driver-level command: statement text plus positional parameters.
///
/// The engine never inspects the text; it only concatenates it for
/// diagnostics and passes the command through to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCommand {
    /// Statement text.
    pub sql: String,
    /// Positional parameter values.
    pub parameters: Vec<Value>,
}

impl SqlCommand {
    /// Create a command without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: vec![],
        }
    }

    /// Add a positional parameter.
    pub fn with_parameter(mut self, value: impl Into<Value>) -> Self {
        self.parameters.push(value.into());
        self
    }

    /// Replace the positional parameters.
    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

impl fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}
