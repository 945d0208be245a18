//! SQLRecord - an active-record style ORM for Rust.
//!
//! SQLRecord maps table rows to shared, dirty-tracked [`Record`]s described
//! by runtime [`ModelSchema`]s, and provides:
//!
//! - Nested transactions on savepoints, with `after_commit` and
//!   `after_rollback` callbacks that run once per record
//! - Record state restored when a transaction rolls back
//! - Optimistic locking through a version column, and `FOR UPDATE` reloads
//! - Dynamic includes: reading an association on one of several records
//!   loaded together loads it for all of them in one query
//! - A fixed-size, first-in-first-out connection pool with per-thread
//!   leases and a reaper for connections of exited threads
//! - Immutable, composable [`Relation`]s and a per-connection query cache
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlrecord::prelude::*;
//!
//! let post = ModelSchema::new("Post", "posts")
//!     .column(ColumnDef::new("title", SqlType::Text).not_null())
//!     .column(ColumnDef::new("author_id", SqlType::BigInt))
//!     .locking()
//!     .association(Reflection::belongs_to("author", "Author"));
//! let author = ModelSchema::new("Author", "authors")
//!     .column(ColumnDef::new("name", SqlType::Text))
//!     .association(Reflection::has_many("posts", "Post", "author_id"));
//!
//! let db = Database::open("sqlite://blog.db?pool=5", [post, author])?;
//!
//! db.with_connection(|conn| {
//!     let posts = conn.load(&conn.all("Post")?)?;
//!     for post in &posts {
//!         // The first read loads every post's author with one query.
//!         let author = post.association(conn, "author")?.one();
//!     }
//!     Ok(())
//! })?;
//! ```

pub mod config;
pub mod database;

pub use config::{DatabaseConfig, SQLITE_ADAPTER};
pub use database::{ConnectHook, Database, DatabaseBuilder, HandleManager};

pub use sqlrecord_core::{
    AssociationKind, ColumnDef, Connection, Dependent, Dialect, Error, FromValue, IsolationLevel,
    Reflection, Result, Row, SqlType, StaleObjectError, ValidationError, Value,
};

pub use sqlrecord_query::{Expr, Include, Join, JoinType, OrderBy, Relation};

pub use sqlrecord_pool::{LeasedConnection, Pool, PoolConfig, PoolStat, PooledConnection};

pub use sqlrecord_session::{
    AssociationTarget, CallbackKind, Changes, ConnectionHandle, HandleConfig, LoadTreeNode,
    ModelSchema, N1QueryTracker, QueryCounter, Record, Registry, SqlEvent, TransactionAction,
    TransactionInfo, TransactionOptions,
};

pub use sqlrecord_sqlite::{SqliteConfig, SqliteConnection};

/// The types most programs need.
pub mod prelude {
    pub use crate::{
        AssociationTarget, CallbackKind, ColumnDef, ConnectionHandle, Database, DatabaseConfig,
        Dependent, Error, Expr, ModelSchema, Record, Reflection, Relation, Result, SqlType,
        TransactionAction, TransactionOptions, Value,
    };
}
