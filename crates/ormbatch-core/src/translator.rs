//! Mapping collaborator boundary.
//!
//! The translator owns the object/relational mapping: it knows which concrete
//! entity types implement a mapped name and turns each query source into the
//! [`Loader`]s that execute it. The batch never generates SQL itself.

use std::sync::Arc;

use crate::error::Error;
use crate::loader::Loader;
use crate::query::{Criteria, QueryExpression, Statement};
use crate::session::Session;

/// Turns query descriptions into loaders.
pub trait QueryTranslator: Send + Sync {
    /// Concrete entity types for a mapped name, in a stable order. Empty when
    /// the name is not mapped.
    fn implementors(&self, entity_name: &str) -> Vec<String>;

    /// Loader for a criteria query restricted to one concrete implementor.
    fn criteria_loader(
        &self,
        implementor: &str,
        criteria: &Criteria,
        session: &Session,
    ) -> Result<Arc<dyn Loader>, Error>;

    /// Loaders for a compiled statement. A statement over a polymorphic name
    /// may translate into several loaders.
    fn statement_loaders(
        &self,
        statement: &Statement,
        session: &Session,
    ) -> Result<Vec<Arc<dyn Loader>>, Error>;

    /// Translate an expression query into a compiled statement.
    fn expression_statement(
        &self,
        expression: &QueryExpression,
        session: &Session,
    ) -> Result<Statement, Error>;
}
