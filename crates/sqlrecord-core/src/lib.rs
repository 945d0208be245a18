//! Core types and traits for SQLRecord.
//!
//! This crate provides the foundations every other layer builds on:
//!
//! - `Value` and `Row` for dynamically typed SQL data
//! - `Connection`, the synchronous driver trait
//! - `Dialect` for the few places generated SQL differs per database
//! - `Reflection` and `ColumnDef` model metadata
//! - `Error`, the typed error taxonomy drivers translate into

pub mod connection;
pub mod dialect;
pub mod error;
pub mod identifiers;
pub mod reflection;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{Connection, IsolationLevel};
pub use dialect::Dialect;
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, FieldValidationError, PoolError,
    PoolErrorKind, QueryError, QueryErrorKind, Result, StaleObjectError, TransactionError,
    TransactionErrorKind, TypeError, ValidationError,
};
pub use identifiers::{quote_ident, quote_ident_mysql, sanitize_identifier};
pub use reflection::{AssociationKind, ColumnDef, Dependent, JoinTable, Reflection};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use value::{Value, ValueKey};
