//! Database connection traits.
//!
//! This module defines the driver-facing abstraction:
//!
//! - [`Connection`] - a single, exclusively owned database session
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! Connections are synchronous and owned by one thread at a time; the pool
//! hands them out and the session layer builds transactions, savepoints and
//! caching on top of these primitives.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Transactions can see uncommitted changes from others.
    ReadUncommitted,
    /// Transactions only see committed changes from others.
    #[default]
    ReadCommitted,
    /// Transactions see a consistent snapshot of the database.
    RepeatableRead,
    /// Transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database connection capable of executing queries.
///
/// Implementations must be `Send` so the pool can move them between
/// threads, but each connection is used by one thread at a time.
///
/// # Example
///
/// ```rust,ignore
/// let rows = conn.query("SELECT * FROM users WHERE id = ?1", &[Value::BigInt(1)])?;
///
/// conn.begin(None)?;
/// conn.execute("INSERT INTO logs (msg) VALUES (?1)", &[Value::Text("action".into())])?;
/// conn.commit()?;
/// ```
pub trait Connection: Send {
    /// Short adapter name used in logs (`"sqlite"`, ...).
    fn adapter_name(&self) -> &'static str;

    /// The SQL dialect this connection speaks.
    fn dialect(&self) -> Dialect;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement (INSERT, UPDATE, DELETE) and return rows affected.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the generated primary key.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Execute one or more statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Begin a real transaction.
    fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()>;

    /// Commit the real transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the real transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Whether nested transactions can be expressed as savepoints.
    fn supports_savepoints(&self) -> bool {
        true
    }

    fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute_batch(&format!("SAVEPOINT {}", crate::sanitize_identifier(name)))
    }

    fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute_batch(&format!(
            "RELEASE SAVEPOINT {}",
            crate::sanitize_identifier(name)
        ))
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {}",
            crate::sanitize_identifier(name)
        ))
    }

    /// Check that the connection is still usable.
    fn ping(&mut self) -> Result<()> {
        self.query("SELECT 1", &[]).map(|_| ())
    }
}
