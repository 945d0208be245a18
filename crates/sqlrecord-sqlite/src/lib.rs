//! SQLite driver for SQLRecord.
//!
//! This crate provides a SQLite database driver using FFI bindings to
//! libsqlite3. It implements the synchronous `Connection` trait from
//! sqlrecord-core and is what the pool hands out by default.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlrecord_core::{Connection, Value};
//! use sqlrecord_sqlite::SqliteConnection;
//!
//! let mut conn = SqliteConnection::open_memory()?;
//! conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?1)", &[Value::from("Alice")])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite Type |
//! |-------|-------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Timestamp` | INTEGER (microseconds) |
//! | `Json` | TEXT |
//!
//! Row-level locking clauses (`FOR UPDATE`) are not supported by SQLite; the
//! query builder leaves them out for this dialect and a real transaction
//! holds the database write lock instead.

// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]

// Links the bundled SQLite build that src/ffi.rs declares against.
use libsqlite3_sys as _;

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}
