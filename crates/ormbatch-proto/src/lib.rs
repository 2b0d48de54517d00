//! ORMBatch shared types.
//!
//! This crate defines the plain data exchanged between the batch engine and
//! its collaborators (drivers, loaders, caches). Everything here is free of
//! behaviour that needs a session.
//!
//! # Modules
//!
//! - [`value`] - Runtime values bound as parameters and read from cursors
//! - [`command`] - Physical commands handed to a driver
//! - [`result`] - Raw rows and result sets, with rkyv encoding for caches
//! - [`filter`] - Filter and ordering descriptions for criteria queries
//! - [`selection`] - Row selection (offset / limit / timeout)
//! - [`error`] - Protocol error types

pub mod command;
pub mod error;
pub mod filter;
pub mod result;
pub mod selection;
pub mod value;

pub use command::SqlCommand;
pub use error::Error;
pub use filter::{FilterExpr, OrderDirection, OrderSpec};
pub use result::{decode_rows, encode_rows, ResultSet, Row};
pub use selection::RowSelection;
pub use value::Value;
