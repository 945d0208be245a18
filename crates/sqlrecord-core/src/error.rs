//! Error types for SQLRecord operations.
//!
//! Driver failures are translated into typed [`QueryErrorKind`]s so callers can
//! react to unique or foreign-key violations without parsing messages, and
//! record-level conditions (stale writes, missing rows, halted callbacks) get
//! their own variants.

use std::fmt;

/// The primary error type for all SQLRecord operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect)
    Connection(ConnectionError),
    /// Query execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction errors
    Transaction(TransactionError),
    /// Pool errors
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// Record failed validation
    RecordInvalid(ValidationError),
    /// No row matched a finder
    RecordNotFound { model: String, key: String },
    /// A save was halted by a callback
    RecordNotSaved(String),
    /// A destroy was halted by a callback or a restricting association
    RecordNotDestroyed(String),
    /// Write attempted on a record loaded as readonly
    ReadOnlyRecord(String),
    /// Optimistic lock conflict
    StaleObject(StaleObjectError),
    /// Reference to an association the model does not declare
    AssociationNotFound { model: String, name: String },
    /// Reference to an attribute the model does not declare
    UnknownAttribute { model: String, name: String },
    /// Silently roll back the enclosing transaction block
    Rollback,
    /// Halt a callback chain
    Abort,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost or closed
    Disconnected,
    /// Connection pool exhausted
    PoolExhausted,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    /// Driver-specific numeric code, when available
    pub code: Option<i32>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Unique or primary key violation
    UniqueViolation,
    /// Foreign key violation
    ForeignKeyViolation,
    /// NOT NULL violation
    NotNullViolation,
    /// Other constraint violation (CHECK, ...)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Lock wait failed or deadlock detected
    Deadlock,
    /// Interrupted by the driver
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Commit or rollback with no open transaction
    NoActiveTransaction,
    /// Savepoint not found
    SavepointNotFound,
    /// Nested transaction requested on a driver without savepoints
    NestedNotSupported,
    /// Isolation level requested on a savepoint
    IsolationOnSavepoint,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Timed out waiting for a connection
    Timeout,
    /// Pool has been disconnected
    Closed,
    /// The connection manager failed to connect
    Connect,
    /// Pool configuration is invalid
    Config,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Stale-object details for an optimistic locking conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleObjectError {
    pub table: String,
    pub id: String,
    /// `"update"` or `"destroy"`
    pub action: &'static str,
}

/// Accumulated validation failures for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldValidationError>,
}

/// A single failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValidationError {
    /// Attribute name, or `"base"` for record-level errors
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Messages recorded for one attribute.
    pub fn on(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }

    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl QueryError {
    /// Build a query error with no SQL or code attached.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.kind == QueryErrorKind::UniqueViolation
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.kind == QueryErrorKind::ForeignKeyViolation
    }
}

impl Error {
    /// Is this a retryable error (lock contention, pool timeout)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => q.kind == QueryErrorKind::Deadlock,
            Error::Pool(p) => p.kind == PoolErrorKind::Timeout,
            Error::StaleObject(_) => true,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.is_unique_violation())
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Error::Query(q) if q.is_foreign_key_violation())
    }

    /// Is this an optimistic locking conflict?
    pub fn is_stale_object(&self) -> bool {
        matches!(self, Error::StaleObject(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    pub fn pool(kind: PoolErrorKind, message: impl Into<String>) -> Self {
        Error::Pool(PoolError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::RecordInvalid(e) => write!(f, "Validation failed: {}", e),
            Error::RecordNotFound { model, key } => {
                write!(f, "Couldn't find {} with {}", model, key)
            }
            Error::RecordNotSaved(msg) => write!(f, "Record not saved: {}", msg),
            Error::RecordNotDestroyed(msg) => write!(f, "Record not destroyed: {}", msg),
            Error::ReadOnlyRecord(model) => write!(f, "{} is marked as readonly", model),
            Error::StaleObject(e) => write!(f, "{}", e),
            Error::AssociationNotFound { model, name } => {
                write!(f, "Association named '{}' was not found on {}", name, model)
            }
            Error::UnknownAttribute { model, name } => {
                write!(f, "unknown attribute '{}' for {}", name, model)
            }
            Error::Rollback => write!(f, "Transaction rolled back"),
            Error::Abort => write!(f, "Callback chain halted"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::RecordInvalid(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{}: {}", self.message, sql),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for StaleObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Attempted to {} a stale object: {} (id {})",
            self.action, self.table, self.id
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| {
                if e.field == "base" {
                    e.message.clone()
                } else {
                    format!("{} {}", e.field, e.message)
                }
            })
            .collect();
        write!(f, "{}", messages.join(", "))
    }
}

impl std::error::Error for ValidationError {}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<StaleObjectError> for Error {
    fn from(err: StaleObjectError) -> Self {
        Error::StaleObject(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::RecordInvalid(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for SQLRecord operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_helpers() {
        let err = Error::Query(
            QueryError::new(QueryErrorKind::UniqueViolation, "UNIQUE constraint failed")
                .with_sql("INSERT INTO t VALUES (1)")
                .with_code(2067),
        );
        assert!(err.is_unique_violation());
        assert!(!err.is_foreign_key_violation());
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn retryable_flags() {
        let stale = Error::StaleObject(StaleObjectError {
            table: "people".into(),
            id: "1".into(),
            action: "update",
        });
        assert!(stale.is_retryable());
        assert!(stale.is_stale_object());
        assert!(Error::pool(PoolErrorKind::Timeout, "timeout").is_retryable());
        assert!(!Error::Rollback.is_retryable());
    }

    #[test]
    fn stale_object_message() {
        let err = StaleObjectError {
            table: "people".into(),
            id: "7".into(),
            action: "destroy",
        };
        assert_eq!(
            err.to_string(),
            "Attempted to destroy a stale object: people (id 7)"
        );
    }

    #[test]
    fn validation_messages() {
        let mut errors = ValidationError::new();
        assert!(errors.clone().into_result().is_ok());
        errors.add("title", "can't be blank");
        errors.add("base", "post is locked");
        assert_eq!(errors.on("title"), vec!["can't be blank"]);
        assert_eq!(errors.to_string(), "title can't be blank, post is locked");
        assert!(errors.into_result().is_err());
    }
}
