//! Connection pooling for SQLRecord.
//!
//! A fixed-size, blocking pool with strict first-in-first-out fairness:
//!
//! - [`Pool::checkout`] hands out an exclusive [`PooledConnection`] and
//!   fails with a timeout error instead of blocking forever.
//! - [`Pool::connection`] leases one connection to the calling thread and
//!   returns the same one on every call from that thread.
//! - [`Pool::reap`] (and an optional background reaper) reclaims leases
//!   held by threads that have exited.
//!
//! Connections are opened lazily by a [`ManageConnection`] implementation.

pub mod config;
pub mod pool;

pub use config::{MAX_DURATION, PoolConfig};
pub use pool::{LeasedConnection, ManageConnection, Pool, PoolStat, PooledConnection};
