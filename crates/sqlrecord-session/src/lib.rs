//! Records and per-connection state for SQLRecord.
//!
//! `sqlrecord-session` is the **record layer**. It turns relations into
//! records, writes records back, and keeps the state that belongs to one
//! database connection.
//!
//! # Role In The Architecture
//!
//! - **Connection handles**: a driver connection plus its transaction stack,
//!   query cache and SQL event subscribers.
//! - **Transactions**: nested blocks map to savepoints; commit and rollback
//!   callbacks run once per record; rollback restores record state.
//! - **Dynamic includes**: records loaded together form a sibling group, so
//!   reading an association on one of them loads it for all of them.
//! - **Locking**: optimistic version checks on update/destroy and
//!   `SELECT ... FOR UPDATE` reloads.
//!
//! # Example
//!
//! ```ignore
//! let posts = conn.load(&conn.all("Post")?.filter_eq("published", true))?;
//! for post in &posts {
//!     // One query for every post's comments, on the first iteration.
//!     let comments = post.association(&mut conn, "comments")?.many();
//! }
//!
//! conn.transaction(TransactionOptions::default(), |conn| {
//!     posts[0].set("title", "Edited")?;
//!     posts[0].save(conn)
//! })?;
//! ```

pub mod associations;
pub mod finder;
pub mod handle;
pub mod load_tree;
pub mod locking;
pub mod n1_detection;
pub mod persistence;
pub mod preloader;
pub mod record;
pub mod schema;
pub mod transaction;

pub use associations::AssociationTarget;
pub use handle::{
    ConnectionHandle, HandleConfig, QueryCounter, SCHEMA_EVENT, SqlEvent, Subscriber,
    TRANSACTION_EVENT,
};
pub use load_tree::LoadTreeNode;
pub use n1_detection::{N1QueryTracker, N1Stats};
pub use record::{Changes, Record};
pub use schema::{
    Callback, CallbackKind, DEFAULT_LOCKING_COLUMN, ModelSchema, Registry, TransactionAction,
    Validator,
};
pub use transaction::{TransactionInfo, TransactionOptions};
