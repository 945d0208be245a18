//! SQLite connection implementation.
//!
//! This module provides a safe wrapper around SQLite's C API and implements
//! the [`Connection`] trait from sqlrecord-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::ffi;
use crate::types;
use sqlrecord_core::{
    ColumnInfo, Connection, ConnectionError, ConnectionErrorKind, Dialect, Error, IsolationLevel,
    QueryError, QueryErrorKind, Result, Row, TransactionErrorKind, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Arc;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// Enforce foreign key constraints (`PRAGMA foreign_keys = ON`).
    pub foreign_keys: bool,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = ffi::SQLITE_OPEN_NOMUTEX;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

/// A connection to a SQLite database.
///
/// The handle is opened in multi-thread mode: it may move between threads
/// but is only ever used through `&mut self`.
pub struct SqliteConnection {
    db: *mut ffi::sqlite3,
    path: String,
    in_transaction: bool,
}

// SAFETY: the handle is opened with SQLITE_OPEN_NOMUTEX and every access goes
// through `&mut self`, so it is never used from two threads at once.
unsafe impl Send for SqliteConnection {}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is valid, errmsg returns a valid C string
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database: {}", msg),
                source: None,
            }));
        }

        // SAFETY: db is valid
        unsafe {
            ffi::sqlite3_extended_result_codes(db, 1);
            if config.busy_timeout_ms > 0 {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        let mut conn = Self {
            db,
            path: config.path.clone(),
            in_transaction: false,
        };
        if config.foreign_keys {
            conn.execute_raw("PRAGMA foreign_keys = ON")?;
        }

        tracing::debug!(path = %conn.path, "opened sqlite database");
        Ok(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a real transaction is open on this handle.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Execute SQL directly without preparing (for DDL, etc.)
    pub fn execute_raw(&mut self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
        let mut errmsg_ptr: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db,
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg_ptr,
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if errmsg_ptr.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: errmsg_ptr is a valid C string allocated by SQLite
                unsafe {
                    let msg = CStr::from_ptr(errmsg_ptr).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg_ptr.cast());
                    msg
                }
            };
            // SAFETY: db is valid
            let code = unsafe { ffi::sqlite3_extended_errcode(self.db) };
            return Err(Error::Query(
                QueryError::new(error_code_to_kind(code), msg)
                    .with_sql(sql)
                    .with_code(code),
            ));
        }

        Ok(())
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_last_insert_rowid(self.db) }
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> u64 {
        // SAFETY: db is valid
        let changes = unsafe { ffi::sqlite3_changes(self.db) };
        u64::try_from(changes).unwrap_or(0)
    }

    fn prepare_bound(&mut self, sql: &str, params: &[Value]) -> Result<Statement> {
        let stmt = Statement(prepare_stmt(self.db, sql)?);
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based
            let rc = unsafe { types::bind_value(stmt.0, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(bind_error(self.db, sql, i + 1));
            }
        }
        Ok(stmt)
    }

    fn query_rows(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let stmt = self.prepare_bound(sql, params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.0) };
        let col_names = (0..col_count)
            // SAFETY: stmt is valid and i < col_count
            .map(|i| unsafe { types::column_name(stmt.0, i) }.unwrap_or_else(|| format!("col{}", i)))
            .collect();
        let columns = Arc::new(ColumnInfo::new(col_names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.0) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: stmt is valid, we just got SQLITE_ROW
                        .map(|i| unsafe { types::read_column(stmt.0, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(step_error(self.db, sql)),
            }
        }

        Ok(rows)
    }

    fn execute_statement(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let stmt = self.prepare_bound(sql, params)?;
        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.0) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => Ok(self.changes()),
            _ => Err(step_error(self.db, sql)),
        }
    }

    fn sync_transaction_flag(&mut self) {
        // SAFETY: db is valid
        self.in_transaction = unsafe { ffi::sqlite3_get_autocommit(self.db) } == 0;
    }
}

impl Connection for SqliteConnection {
    fn adapter_name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_rows(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.execute_statement(sql, params)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute_statement(sql, params)?;
        Ok(self.last_insert_rowid())
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        let result = self.execute_raw(sql);
        self.sync_transaction_flag();
        result
    }

    /// SQLite has no per-transaction isolation levels. `Serializable` maps
    /// to `BEGIN IMMEDIATE`, which takes the write lock up front; everything
    /// else is a deferred transaction.
    fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        if self.in_transaction {
            return Err(Error::transaction(
                TransactionErrorKind::NestedNotSupported,
                "Already in a transaction",
            ));
        }
        let begin_sql = match isolation {
            Some(IsolationLevel::Serializable) => "BEGIN IMMEDIATE",
            _ => "BEGIN DEFERRED",
        };
        self.execute_raw(begin_sql)?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::transaction(
                TransactionErrorKind::NoActiveTransaction,
                "Not in a transaction",
            ));
        }
        let result = self.execute_raw("COMMIT");
        self.sync_transaction_flag();
        result
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(Error::transaction(
                TransactionErrorKind::NoActiveTransaction,
                "Not in a transaction",
            ));
        }
        let result = self.execute_raw("ROLLBACK");
        self.sync_transaction_flag();
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is valid and not used after this point
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
        }
    }
}

/// Finalizes the prepared statement when dropped.
struct Statement(*mut ffi::sqlite3_stmt);

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: the statement was returned by sqlite3_prepare_v2
        unsafe {
            ffi::sqlite3_finalize(self.0);
        }
    }
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| null_byte_error(sql))?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(step_error(db, sql));
    }
    if stmt.is_null() {
        return Err(Error::Query(
            QueryError::new(QueryErrorKind::Syntax, "empty statement").with_sql(sql),
        ));
    }

    Ok(stmt)
}

fn null_byte_error(sql: &str) -> Error {
    Error::Query(QueryError::new(QueryErrorKind::Syntax, "SQL contains null byte").with_sql(sql))
}

/// # Safety
/// `db` must be a valid connection handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: sqlite3_errmsg returns a valid C string for a valid handle
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)).to_string_lossy().into_owned() }
}

fn bind_error(db: *mut ffi::sqlite3, sql: &str, param_index: usize) -> Error {
    // SAFETY: db is valid
    let msg = unsafe { errmsg(db) };
    Error::Query(
        QueryError::new(
            QueryErrorKind::Database,
            format!("Failed to bind parameter {}: {}", param_index, msg),
        )
        .with_sql(sql),
    )
}

fn step_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (msg, code) = unsafe { (errmsg(db), ffi::sqlite3_extended_errcode(db)) };
    Error::Query(
        QueryError::new(error_code_to_kind(code), msg)
            .with_sql(sql)
            .with_code(code),
    )
}

/// Map an extended result code to a driver-independent error kind.
fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    match code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            QueryErrorKind::UniqueViolation
        }
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => QueryErrorKind::ForeignKeyViolation,
        ffi::SQLITE_CONSTRAINT_NOTNULL => QueryErrorKind::NotNullViolation,
        _ => match code & 0xff {
            ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
            ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Deadlock,
            ffi::SQLITE_PERM | ffi::SQLITE_AUTH => QueryErrorKind::Permission,
            ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
            ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
            ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
            _ => QueryErrorKind::Database,
        },
    }
}
