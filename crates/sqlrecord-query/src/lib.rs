//! Relation and statement builders for SQLRecord.
//!
//! `sqlrecord-query` is the **SQL construction layer**. It turns
//! relations and row-level statements into SQL text plus bound parameters,
//! and never touches a connection itself.
//!
//! # Role In The Architecture
//!
//! - **Expressions**: `Expr` builds WHERE/HAVING/SET terms with bound values.
//! - **Relations**: `Relation` is an immutable, copy-on-write SELECT
//!   description with `includes` trees for preloading.
//! - **Statements**: `InsertBuilder`, `UpdateBuilder` and `DeleteBuilder`
//!   write single records.
//! - **Caching**: `QueryCache` holds SELECT results between writes.
//!
//! Placeholders are numbered per `Dialect` by position in one shared
//! parameter list, so clauses compose without renumbering.

pub mod builder;
pub mod cache;
pub mod clause;
pub mod expr;
pub mod include;
pub mod join;
pub mod relation;

pub use builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use cache::{CacheStats, QueryCache};
pub use clause::{LockMode, NullsOrder, OrderBy, OrderDirection, Part};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use include::{Include, merge_into};
pub use join::{Join, JoinType};
pub use relation::Relation;
