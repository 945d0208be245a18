//! Nested transactions, savepoints and commit/rollback callbacks.
//!
//! Each [`ConnectionHandle`] keeps a stack of open transactions. The bottom
//! frame is a real database transaction; frames above it are savepoints
//! named `active_record_N`, where `N` is the stack depth when the savepoint
//! was created.
//!
//! Records saved or destroyed inside a transaction are enrolled in the
//! innermost frame with a snapshot of their state. Releasing a savepoint
//! hands its records to the parent frame. Rolling back restores every
//! enrolled record and runs its `after_rollback` callbacks; committing the
//! real transaction runs each record's `after_commit` callbacks once.

use crate::handle::ConnectionHandle;
use crate::record::{Record, Snapshot};
use crate::schema::{CallbackKind, TransactionAction};
use sqlrecord_core::{Error, IsolationLevel, Result, TransactionErrorKind};

/// How a `transaction` block relates to an already open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Always open a savepoint, even when an outer transaction is joinable.
    pub requires_new: bool,
    /// Whether blocks nested inside this one may join it.
    pub joinable: bool,
    /// Isolation level for a real transaction.
    pub isolation: Option<IsolationLevel>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            requires_new: false,
            joinable: true,
            isolation: None,
        }
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requires_new(mut self) -> Self {
        self.requires_new = true;
        self
    }

    #[must_use]
    pub fn joinable(mut self, joinable: bool) -> Self {
        self.joinable = joinable;
        self
    }

    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Real,
    Savepoint(String),
}

#[derive(Debug)]
struct Enrolled {
    record: Record,
    snapshot: Snapshot,
    action: TransactionAction,
}

#[derive(Debug)]
pub(crate) struct TransactionFrame {
    kind: FrameKind,
    joinable: bool,
    records: Vec<Enrolled>,
}

/// A read-only view of the innermost open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// 1 for the real transaction, 2 for the first savepoint, ...
    pub depth: usize,
    pub savepoint: Option<String>,
    pub joinable: bool,
    /// Records enrolled in this frame.
    pub records: usize,
}

fn no_active_transaction() -> Error {
    Error::transaction(
        TransactionErrorKind::NoActiveTransaction,
        "no transaction is open",
    )
}

impl ConnectionHandle {
    /// Run `f` inside a transaction.
    ///
    /// Joins the open transaction when it is joinable and `requires_new` is
    /// not set; otherwise begins a real transaction or a savepoint. Returns
    /// `Ok(None)` when `f` returns [`Error::Rollback`]. Any other error rolls
    /// the block back and is returned.
    ///
    /// ```rust,ignore
    /// conn.transaction(TransactionOptions::default(), |conn| {
    ///     post.save(conn)?;
    ///     conn.transaction(TransactionOptions::new().requires_new(), |conn| {
    ///         comment.save(conn)?;
    ///         Err::<(), _>(Error::Rollback) // only the savepoint rolls back
    ///     })?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn transaction<T, F>(&mut self, options: TransactionOptions, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut ConnectionHandle) -> Result<T>,
    {
        let joins = !options.requires_new && self.transactions.last().is_some_and(|t| t.joinable);
        if joins {
            if options.isolation.is_some() {
                return Err(Error::transaction(
                    TransactionErrorKind::IsolationOnSavepoint,
                    "cannot set isolation when joining a transaction",
                ));
            }
            return match f(&mut *self) {
                Ok(value) => Ok(Some(value)),
                Err(Error::Rollback) => {
                    tracing::trace!("Rollback inside a joined transaction ignored");
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }

        self.begin_transaction(&options)?;
        match f(&mut *self) {
            Ok(value) => match self.commit_frame() {
                Ok(callbacks) => callbacks.map(|()| Some(value)),
                Err(e) => {
                    self.rollback_after_error();
                    Err(e)
                }
            },
            Err(Error::Rollback) => {
                self.rollback_transaction()?;
                Ok(None)
            }
            Err(e) => {
                self.rollback_after_error();
                Err(e)
            }
        }
    }

    fn rollback_after_error(&mut self) {
        if let Err(rollback_err) = self.rollback_transaction() {
            tracing::warn!(error = %rollback_err, "Rollback failed after transaction error");
        }
    }

    /// Open a real transaction, or a savepoint if one is already open.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn begin_transaction(&mut self, options: &TransactionOptions) -> Result<()> {
        let kind = if self.transactions.is_empty() {
            let isolation = options.isolation;
            let label = match isolation {
                Some(level) => format!("BEGIN ISOLATION LEVEL {}", level.as_sql()),
                None => "BEGIN".to_string(),
            };
            self.transaction_statement(&label, |c| c.begin(isolation))?;
            FrameKind::Real
        } else {
            if options.isolation.is_some() {
                return Err(Error::transaction(
                    TransactionErrorKind::IsolationOnSavepoint,
                    "cannot set isolation level on a savepoint",
                ));
            }
            if !self.supports_savepoints() {
                return Err(Error::transaction(
                    TransactionErrorKind::NestedNotSupported,
                    format!("{} does not support savepoints", self.adapter_name()),
                ));
            }
            let name = format!("active_record_{}", self.transactions.len());
            self.transaction_statement(&format!("SAVEPOINT {name}"), |c| {
                c.create_savepoint(&name)
            })?;
            FrameKind::Savepoint(name)
        };
        self.transactions.push(TransactionFrame {
            kind,
            joinable: options.joinable,
            records: Vec::new(),
        });
        tracing::trace!(depth = self.transactions.len(), "Transaction opened");
        Ok(())
    }

    /// Commit the innermost transaction.
    ///
    /// If the database refuses the commit, the transaction stays open. An
    /// error from an `after_commit` callback is returned after the commit.
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.commit_frame()?
    }

    /// The outer result carries SQL failures, which leave the frame open; the
    /// inner one carries callback failures after a successful commit.
    fn commit_frame(&mut self) -> Result<Result<()>> {
        let kind = self
            .transactions
            .last()
            .map(|t| t.kind.clone())
            .ok_or_else(no_active_transaction)?;
        match &kind {
            FrameKind::Real => self.transaction_statement("COMMIT", |c| c.commit())?,
            FrameKind::Savepoint(name) => {
                self.transaction_statement(&format!("RELEASE SAVEPOINT {name}"), |c| {
                    c.release_savepoint(name)
                })?;
            }
        }
        let Some(frame) = self.transactions.pop() else {
            return Err(no_active_transaction());
        };
        tracing::trace!(
            depth = self.transactions.len() + 1,
            records = frame.records.len(),
            "Transaction committed"
        );

        if let FrameKind::Savepoint(_) = kind {
            if let Some(parent) = self.transactions.last_mut() {
                for enrolled in frame.records {
                    parent.absorb(enrolled);
                }
                return Ok(Ok(()));
            }
        }
        Ok(self.run_completion_callbacks(frame.records, CallbackKind::AfterCommit))
    }

    /// Roll back the innermost transaction, restoring every record it
    /// touched.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let kind = self
            .transactions
            .last()
            .map(|t| t.kind.clone())
            .ok_or_else(no_active_transaction)?;
        let sql_result = match &kind {
            FrameKind::Real => self.transaction_statement("ROLLBACK", |c| c.rollback()),
            FrameKind::Savepoint(name) => self
                .transaction_statement(&format!("ROLLBACK TO SAVEPOINT {name}"), |c| {
                    c.rollback_to_savepoint(name)
                })
                .and_then(|()| {
                    self.transaction_statement(&format!("RELEASE SAVEPOINT {name}"), |c| {
                        c.release_savepoint(name)
                    })
                }),
        };
        let Some(frame) = self.transactions.pop() else {
            return Err(no_active_transaction());
        };
        tracing::trace!(
            depth = self.transactions.len() + 1,
            records = frame.records.len(),
            "Transaction rolled back"
        );
        self.clear_query_cache();

        for enrolled in &frame.records {
            enrolled.record.restore(&enrolled.snapshot);
        }
        let callbacks = self.run_completion_callbacks(frame.records, CallbackKind::AfterRollback);
        sql_result.and(callbacks)
    }

    /// Roll back every open transaction.
    pub fn rollback_all(&mut self) -> Result<()> {
        while self.transaction_open() {
            self.rollback_transaction()?;
        }
        Ok(())
    }

    /// Run `after_commit`/`after_rollback` once per record. The first error
    /// stops further callbacks and is returned.
    fn run_completion_callbacks(&mut self, records: Vec<Enrolled>, kind: CallbackKind) -> Result<()> {
        for enrolled in records {
            let schema = enrolled.record.schema();
            for callback in schema.callbacks_for(kind, Some(enrolled.action)) {
                if let Err(e) = callback(&mut *self, &enrolled.record) {
                    tracing::debug!(
                        model = schema.name(),
                        callback = ?kind,
                        error = %e,
                        "Completion callback failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Enroll `record` in the innermost transaction. The first enrollment in
    /// a frame snapshots the record so a rollback can restore it.
    pub fn add_transaction_record(&mut self, record: &Record, action: TransactionAction) {
        let Some(frame) = self.transactions.last_mut() else {
            return;
        };
        if let Some(existing) = frame.records.iter_mut().find(|e| e.record.ptr_eq(record)) {
            existing.action = existing.action.merge(action);
            return;
        }
        frame.records.push(Enrolled {
            snapshot: record.snapshot(),
            record: record.clone(),
            action,
        });
    }

    pub fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    pub fn transaction_open(&self) -> bool {
        !self.transactions.is_empty()
    }

    pub fn current_transaction(&self) -> Option<TransactionInfo> {
        self.transactions.last().map(|t| TransactionInfo {
            depth: self.transactions.len(),
            savepoint: match &t.kind {
                FrameKind::Real => None,
                FrameKind::Savepoint(name) => Some(name.clone()),
            },
            joinable: t.joinable,
            records: t.records.len(),
        })
    }
}

impl TransactionFrame {
    /// Take over a record from a released savepoint. A record already
    /// enrolled here keeps this frame's older snapshot.
    fn absorb(&mut self, enrolled: Enrolled) {
        match self.records.iter_mut().find(|e| e.record.ptr_eq(&enrolled.record)) {
            Some(existing) => existing.action = existing.action.merge(enrolled.action),
            None => self.records.push(enrolled),
        }
    }
}
