//! Pessimistic row locks and optimistic lock accessors.
//!
//! Optimistic locking itself lives in the UPDATE/DELETE statements written
//! by [`persistence`](crate::persistence); this module covers reloading a row
//! under `SELECT ... FOR UPDATE` and the version column accessors.

use crate::handle::ConnectionHandle;
use crate::record::Record;
use crate::transaction::TransactionOptions;
use sqlrecord_core::{Error, Result};
use sqlrecord_query::Relation;

impl Record {
    /// Reload the row with `FOR UPDATE`, holding the lock until the
    /// enclosing transaction ends. A new record is left alone.
    pub fn lock(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let relation = self.schema().all().lock();
        self.lock_relation(conn, &relation)
    }

    /// Reload the row with a custom lock clause such as `FOR SHARE`.
    pub fn lock_with(&self, conn: &mut ConnectionHandle, clause: &str) -> Result<()> {
        let relation = self.schema().all().lock_with(clause);
        self.lock_relation(conn, &relation)
    }

    fn lock_relation(&self, conn: &mut ConnectionHandle, relation: &Relation) -> Result<()> {
        if self.has_changes() {
            return Err(Error::Custom(format!(
                "Locking a {} with unsaved changes is not supported; \
                 save or restore the changes first (changed: {})",
                self.model_name(),
                self.changed().join(", ")
            )));
        }
        if !self.persisted() {
            return Ok(());
        }
        tracing::trace!(model = %self.model_name(), id = %self.id(), "Locking row");
        self.reload_using(conn, relation)
    }

    /// Open a transaction (joining one if open), lock the row and run `f`.
    ///
    /// Returns `Ok(None)` when `f` rolls back with
    /// [`Error::Rollback`](sqlrecord_core::Error::Rollback).
    pub fn with_lock<T, F>(&self, conn: &mut ConnectionHandle, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut ConnectionHandle, &Record) -> Result<T>,
    {
        let record = self.clone();
        conn.transaction(TransactionOptions::default(), |conn| {
            record.lock(conn)?;
            f(conn, &record)
        })
    }

    /// Whether the model declares a version column.
    pub fn locking_enabled(&self) -> bool {
        self.schema().locking_column().is_some()
    }

    /// Current in-memory lock version.
    pub fn lock_version(&self) -> Option<i64> {
        let schema = self.schema();
        schema
            .locking_index()
            .and_then(|i| self.value_at(i).as_i64())
    }
}
