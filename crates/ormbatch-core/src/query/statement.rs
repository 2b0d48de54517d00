//! Compiled statement queries.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ormbatch_proto::{RowSelection, Value};

use crate::error::Error;
use crate::loader::QueryParameters;
use crate::result::ResultTransformer;
use crate::session::Session;

use super::{LoadPlan, QuerySource};

/// A query in the mapping collaborator's query language, with its bindings.
#[derive(Clone)]
pub struct Statement {
    /// Query text.
    pub text: String,
    /// Named parameters the text declares.
    pub declared_named: BTreeSet<String>,
    /// Number of positional placeholders in the text.
    pub positional_count: usize,
    /// Named bindings.
    pub named: BTreeMap<String, Value>,
    /// Positional bindings.
    pub positional: Vec<Value>,
    /// Row selection.
    pub selection: RowSelection,
    /// Whether the query cache may be used.
    pub cacheable: bool,
    /// Cache region.
    pub cache_region: Option<String>,
    /// Inspect result columns on first read.
    pub auto_discover_types: bool,
    /// Result transformer.
    pub result_transformer: Option<Arc<dyn ResultTransformer>>,
    /// Read-only mode for loaded entities.
    pub read_only: Option<bool>,
}

impl Statement {
    /// Create a statement. Named parameters are written `:name` in the text
    /// and are declared automatically; positional placeholders are `?`.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let (declared_named, positional_count) = scan_parameters(&text);
        Self {
            text,
            declared_named,
            positional_count,
            named: BTreeMap::new(),
            positional: vec![],
            selection: RowSelection::default(),
            cacheable: false,
            cache_region: None,
            auto_discover_types: false,
            result_transformer: None,
            read_only: None,
        }
    }

    /// Bind a named parameter.
    pub fn set_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Bind the next positional parameter.
    pub fn add_positional(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Skip leading rows.
    pub fn with_first_result(mut self, first: usize) -> Self {
        self.selection.first_row = Some(first);
        self
    }

    /// Cap the number of rows.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.selection.max_rows = Some(max);
        self
    }

    /// Allow the query cache.
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Set the cache region.
    pub fn with_cache_region(mut self, region: impl Into<String>) -> Self {
        self.cache_region = Some(region.into());
        self
    }

    /// Inspect result columns on first read.
    pub fn with_auto_discover_types(mut self, enabled: bool) -> Self {
        self.auto_discover_types = enabled;
        self
    }

    /// Attach a result transformer.
    pub fn with_result_transformer(mut self, transformer: Arc<dyn ResultTransformer>) -> Self {
        self.result_transformer = Some(transformer);
        self
    }

    /// Set read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Check that every declared named parameter is bound.
    pub fn verify_parameters(&self) -> Result<(), Error> {
        let missing: Vec<&str> = self
            .declared_named
            .iter()
            .filter(|name| !self.named.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::PlanResolution(format!(
                "not all named parameters have been set: [{}] [{}]",
                missing.join(", "),
                self.text
            )));
        }
        Ok(())
    }

    /// Parameters the load plans execute with, after validating positional
    /// bindings against the placeholders.
    pub fn query_parameters(&self) -> Result<QueryParameters, Error> {
        let parameters = QueryParameters {
            positional: self.positional.clone(),
            named: self.named.clone(),
            selection: self.selection,
            cacheable: self.cacheable,
            cache_region: self.cache_region.clone(),
            auto_discover_scalar_types: self.auto_discover_types,
            read_only: self.read_only,
            result_transformer: self.result_transformer.clone(),
        };
        parameters.validate(self.positional_count)?;
        Ok(parameters)
    }

    /// Resolve load plans through the session's translator.
    pub(crate) fn plans(&self, session: &Session) -> Result<Vec<LoadPlan>, Error> {
        self.verify_parameters()?;
        let parameters = self.query_parameters()?;
        let loaders = session.translator().statement_loaders(self, session)?;
        if loaders.is_empty() {
            return Err(Error::PlanResolution(format!(
                "statement produced no loaders: {}",
                self.text
            )));
        }
        Ok(loaders
            .into_iter()
            .map(|loader| LoadPlan::new(loader, parameters.clone()))
            .collect())
    }
}

/// Collect `:name` declarations and count `?` placeholders outside quoted
/// literals. `::` is a cast, not a parameter prefix.
fn scan_parameters(text: &str) -> (BTreeSet<String>, usize) {
    let mut names = BTreeSet::new();
    let mut positional = 0;
    let mut in_literal = false;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if in_literal {
            // `''` closes and reopens the literal.
            in_literal = c != '\'';
            continue;
        }
        match c {
            '\'' => in_literal = true,
            '?' => positional += 1,
            ':' if matches!(chars.peek(), Some((_, ':'))) => {
                chars.next();
                while matches!(chars.peek(), Some((_, n)) if is_name_char(*n)) {
                    chars.next();
                }
            }
            ':' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, n)) = chars.peek() {
                    if !is_name_char(n) {
                        break;
                    }
                    end = j + n.len_utf8();
                    chars.next();
                }
                if end > start {
                    names.insert(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    (names, positional)
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("text", &self.text)
            .field("named", &self.named)
            .field("positional", &self.positional)
            .field("selection", &self.selection)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl QuerySource for Statement {
    fn resolve_plans(&mut self, session: &Session) -> Result<Vec<LoadPlan>, Error> {
        self.plans(session)
    }

    fn describe(&self) -> String {
        format!("statement({})", self.text)
    }
}
