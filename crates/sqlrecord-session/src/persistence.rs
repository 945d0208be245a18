//! Saving, updating and destroying records.
//!
//! `save` and `destroy` run their callback chains inside a transaction
//! (joining an open one) and enroll the record, so a rollback anywhere up
//! the stack restores it. `update_columns`, `delete` and `increment` write
//! directly and skip callbacks.

use crate::handle::ConnectionHandle;
use crate::record::Record;
use crate::schema::{CallbackKind, ModelSchema, TransactionAction};
use crate::transaction::TransactionOptions;
use sqlrecord_core::{Error, Result, StaleObjectError, TypeError, ValidationError, Value};
use sqlrecord_query::{DeleteBuilder, Expr, InsertBuilder, UpdateBuilder};
use std::sync::Arc;

const CREATED_AT: &str = "created_at";
const UPDATED_AT: &str = "updated_at";

/// Render a key for error messages.
pub(crate) fn display_key(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Record {
    /// Create and save a record in one step.
    pub fn create<I, S>(
        conn: &mut ConnectionHandle,
        schema: &Arc<ModelSchema>,
        attributes: I,
    ) -> Result<Record>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let record = Record::build(schema, attributes)?;
        record.save(conn)?;
        Ok(record)
    }

    /// Run validators, filling [`errors`](Record::errors).
    pub fn valid(&self) -> bool {
        let schema = self.schema();
        let mut errors = ValidationError::new();
        for validator in schema.validators() {
            validator(self, &mut errors);
        }
        let ok = errors.is_empty();
        self.state().errors = errors;
        ok
    }

    /// Insert or update the record.
    ///
    /// Fails with [`Error::RecordInvalid`] when a validator rejects it and
    /// with [`Error::RecordNotSaved`] when a callback halts with
    /// [`Error::Abort`].
    #[tracing::instrument(level = "debug", skip(self, conn), fields(model = %self.model_name()))]
    pub fn save(&self, conn: &mut ConnectionHandle) -> Result<()> {
        self.check_writable()?;
        if self.destroyed() {
            return Err(Error::RecordNotSaved(format!(
                "{} has been destroyed",
                self.model_name()
            )));
        }
        let record = self.clone();
        let result = conn.transaction(TransactionOptions::default(), |conn| {
            let action = if record.new_record() {
                TransactionAction::Create
            } else {
                TransactionAction::Update
            };
            conn.add_transaction_record(&record, action);
            record.save_within(conn, action)
        });
        match result {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(Error::RecordNotSaved(format!(
                "{} save was rolled back",
                self.model_name()
            ))),
            Err(Error::Abort) => Err(Error::RecordNotSaved(format!(
                "Failed to save the {}",
                self.model_name()
            ))),
            Err(e) => Err(e),
        }
    }

    fn save_within(&self, conn: &mut ConnectionHandle, action: TransactionAction) -> Result<()> {
        self.run_callbacks(conn, CallbackKind::BeforeValidation)?;
        if !self.valid() {
            return Err(Error::RecordInvalid(self.errors()));
        }
        self.run_callbacks(conn, CallbackKind::BeforeSave)?;
        self.save_pending_parents(conn)?;
        match action {
            TransactionAction::Create => {
                self.run_callbacks(conn, CallbackKind::BeforeCreate)?;
                self.insert_row(conn)?;
                self.run_callbacks(conn, CallbackKind::AfterCreate)?;
            }
            _ => {
                self.run_callbacks(conn, CallbackKind::BeforeUpdate)?;
                self.update_row(conn)?;
                self.run_callbacks(conn, CallbackKind::AfterUpdate)?;
            }
        }
        self.run_callbacks(conn, CallbackKind::AfterSave)?;
        self.save_pending_associations(conn)
    }

    /// Assign attributes and save.
    pub fn update<I, S>(&self, conn: &mut ConnectionHandle, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        for (name, value) in attributes {
            self.set(name.as_ref(), value)?;
        }
        self.save(conn)
    }

    /// Write attributes straight to the row, skipping validations,
    /// callbacks and the optimistic lock check.
    pub fn update_columns<I, S>(&self, conn: &mut ConnectionHandle, attributes: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        self.check_writable()?;
        self.check_persisted("update columns on")?;
        let schema = self.schema();
        let mut indices = Vec::new();
        for (name, value) in attributes {
            self.set(name.as_ref(), value)?;
            if let Some(i) = schema.column_index(name.as_ref()) {
                indices.push(i);
            }
        }
        if indices.is_empty() {
            return Ok(());
        }
        self.write_columns(conn, &indices, false)?;
        for i in indices {
            self.write_clean(i, self.value_at(i));
        }
        Ok(())
    }

    /// Delete the row, running destroy callbacks and dependent handling.
    #[tracing::instrument(level = "debug", skip(self, conn), fields(model = %self.model_name()))]
    pub fn destroy(&self, conn: &mut ConnectionHandle) -> Result<()> {
        self.check_writable()?;
        let record = self.clone();
        let result = conn.transaction(TransactionOptions::default(), |conn| {
            conn.add_transaction_record(&record, TransactionAction::Destroy);
            record.destroy_within(conn)
        });
        match result {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(Error::RecordNotDestroyed(format!(
                "{} destroy was rolled back",
                self.model_name()
            ))),
            Err(Error::Abort) => Err(Error::RecordNotDestroyed(format!(
                "Failed to destroy the {}",
                self.model_name()
            ))),
            Err(e) => Err(e),
        }
    }

    fn destroy_within(&self, conn: &mut ConnectionHandle) -> Result<()> {
        self.run_callbacks(conn, CallbackKind::BeforeDestroy)?;
        if self.persisted() {
            self.destroy_dependents(conn)?;
            self.delete_row(conn, true)?;
        }
        self.state().destroyed = true;
        self.run_callbacks(conn, CallbackKind::AfterDestroy)
    }

    /// Delete the row with one statement. No callbacks, no dependents.
    pub fn delete(&self, conn: &mut ConnectionHandle) -> Result<()> {
        self.check_writable()?;
        if self.persisted() {
            self.delete_row(conn, false)?;
        }
        self.state().destroyed = true;
        Ok(())
    }

    /// Re-read every attribute from the database.
    pub fn reload(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let schema = self.schema();
        self.reload_using(conn, &schema.all())
    }

    /// Reload through `relation`, which may carry a lock clause.
    pub(crate) fn reload_using(
        &self,
        conn: &mut ConnectionHandle,
        relation: &sqlrecord_query::Relation,
    ) -> Result<()> {
        let schema = self.schema();
        let id = self.original_at(schema.primary_key_index());
        let not_found = || Error::RecordNotFound {
            model: schema.name().to_string(),
            key: display_key(&id),
        };
        if self.new_record() {
            return Err(not_found());
        }
        let (sql, params) = relation
            .filter_eq(schema.primary_key_name(), id.clone())
            .limit(1)
            .to_sql(conn.dialect());
        let rows = conn.select_uncached(&format!("{} Load", schema.name()), &sql, &params)?;
        let row = rows.into_iter().next().ok_or_else(not_found)?;
        self.load_row(row);
        Ok(())
    }

    /// Set `updated_at` to now and save it, bumping the lock version.
    pub fn touch(&self, conn: &mut ConnectionHandle) -> Result<()> {
        self.check_writable()?;
        self.check_persisted("touch")?;
        let schema = self.schema();
        let Some(i) = schema.column_index(UPDATED_AT) else {
            return Ok(());
        };
        self.set_at(i, Value::now());
        let record = self.clone();
        conn.transaction(TransactionOptions::default(), |conn| {
            conn.add_transaction_record(&record, TransactionAction::Update);
            record.write_columns(conn, &[i], true)
        })?;
        self.write_clean(i, self.value_at(i));
        if let Some(li) = schema.locking_index() {
            self.write_clean(li, self.value_at(li));
        }
        Ok(())
    }

    /// Add `by` to a numeric column in the database and in memory.
    /// NULL counts as 0. Skips callbacks and locking.
    pub fn increment(&self, conn: &mut ConnectionHandle, column: &str, by: i64) -> Result<()> {
        self.check_writable()?;
        self.check_persisted("increment")?;
        let schema = self.schema();
        let i = schema
            .column_index(column)
            .ok_or_else(|| Error::UnknownAttribute {
                model: schema.name().to_string(),
                name: column.to_string(),
            })?;
        let current = self.original_at(i).as_i64().unwrap_or(0);
        let next = current.checked_add(by).ok_or_else(|| {
            Error::Type(TypeError {
                expected: "i64",
                actual: format!("{current} + {by} overflows"),
                column: Some(column.to_string()),
                rust_type: Some("i64"),
            })
        })?;
        let pk = schema.primary_key_index();
        let (sql, params) = UpdateBuilder::new(schema.table())
            .set_expr(
                column,
                Expr::coalesce(vec![Expr::col(column), Expr::lit(0_i64)]).add(by),
            )
            .filter(Expr::col(schema.primary_key_name()).eq(self.original_at(pk)))
            .build(conn.dialect());
        conn.exec_update(&format!("{} Update", schema.name()), &sql, &params)?;
        self.write_clean(i, Value::BigInt(next));
        Ok(())
    }

    // ==================== Row Writes ====================

    fn insert_row(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let schema = self.schema();
        let pk = schema.primary_key_index();
        if let Some(li) = schema.locking_index() {
            if self.value_at(li).is_null() {
                self.set_at(li, Value::BigInt(0));
            }
        }
        let now = Value::now();
        for column in [CREATED_AT, UPDATED_AT] {
            if let Some(i) = schema.column_index(column) {
                if self.value_at(i).is_null() {
                    self.set_at(i, now.clone());
                }
            }
        }

        let mut builder = InsertBuilder::new(schema.table());
        for (i, column) in schema.columns().iter().enumerate() {
            let value = self.value_at(i);
            if i == pk && value.is_null() {
                continue;
            }
            builder = builder.value(column.name.as_str(), value);
        }
        let (sql, params) = builder.build(conn.dialect());
        let id = conn.exec_insert(&format!("{} Create", schema.name()), &sql, &params)?;
        if self.value_at(pk).is_null() {
            self.set_at(pk, Value::BigInt(id));
        }
        self.state().new_record = false;
        self.changes_applied();
        tracing::trace!(model = schema.name(), id = id, "Inserted record");
        Ok(())
    }

    /// UPDATE the changed columns. No changes means no statement.
    fn update_row(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let schema = self.schema();
        let lock = schema.locking_index();
        let changed = |record: &Record| -> Vec<usize> {
            (0..schema.columns().len())
                .filter(|&i| Some(i) != lock)
                .filter(|&i| !record.value_at(i).same_as(&record.original_at(i)))
                .collect()
        };
        let mut indices = changed(self);
        if indices.is_empty() {
            return Ok(());
        }
        if let Some(i) = schema.column_index(UPDATED_AT) {
            if !indices.contains(&i) {
                self.set_at(i, Value::now());
                indices = changed(self);
            }
        }
        self.write_columns(conn, &indices, true)?;
        self.changes_applied();
        Ok(())
    }

    /// UPDATE `indices` on this row. With `locking`, the version column is
    /// bumped and checked, and a lost race restores the in-memory version.
    fn write_columns(
        &self,
        conn: &mut ConnectionHandle,
        indices: &[usize],
        locking: bool,
    ) -> Result<u64> {
        let schema = self.schema();
        let columns = schema.columns();
        let mut builder = UpdateBuilder::new(schema.table());
        for &i in indices {
            builder = builder.set(columns[i].name.as_str(), self.value_at(i));
        }
        builder = builder.filter(
            Expr::col(schema.primary_key_name())
                .eq(self.original_at(schema.primary_key_index())),
        );

        let mut previous_version = None;
        if let (true, Some(li)) = (locking, schema.locking_index()) {
            let previous = self.original_at(li);
            let next = Value::BigInt(previous.as_i64().unwrap_or(0) + 1);
            self.set_at(li, next.clone());
            builder = builder
                .set(columns[li].name.as_str(), next)
                .filter(Expr::col(columns[li].name.as_str()).eq(previous.clone()));
            previous_version = Some((li, previous));
        }

        let (sql, params) = builder.build(conn.dialect());
        let result = conn.exec_update(&format!("{} Update", schema.name()), &sql, &params);
        match (result, previous_version) {
            (Err(e), Some((li, previous))) => {
                self.set_at(li, previous);
                Err(e)
            }
            (Ok(affected), Some((li, previous))) if affected != 1 => {
                self.set_at(li, previous);
                Err(self.stale("update"))
            }
            (result, _) => result,
        }
    }

    fn delete_row(&self, conn: &mut ConnectionHandle, locking: bool) -> Result<()> {
        let schema = self.schema();
        let mut builder = DeleteBuilder::new(schema.table()).filter(
            Expr::col(schema.primary_key_name())
                .eq(self.original_at(schema.primary_key_index())),
        );
        let lock = if locking { schema.locking_index() } else { None };
        if let Some(li) = lock {
            builder = builder
                .filter(Expr::col(schema.columns()[li].name.as_str()).eq(self.original_at(li)));
        }
        let (sql, params) = builder.build(conn.dialect());
        let affected = conn.exec_update(&format!("{} Destroy", schema.name()), &sql, &params)?;
        if lock.is_some() && affected != 1 {
            return Err(self.stale("destroy"));
        }
        Ok(())
    }

    // ==================== Helpers ====================

    pub(crate) fn run_callbacks(&self, conn: &mut ConnectionHandle, kind: CallbackKind) -> Result<()> {
        let schema = self.schema();
        for callback in schema.callbacks_for(kind, None) {
            callback(&mut *conn, self)?;
        }
        Ok(())
    }

    fn stale(&self, action: &'static str) -> Error {
        let schema = self.schema();
        Error::StaleObject(StaleObjectError {
            table: schema.table().to_string(),
            id: display_key(&self.original_at(schema.primary_key_index())),
            action,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly() {
            return Err(Error::ReadOnlyRecord(self.model_name()));
        }
        Ok(())
    }

    fn check_persisted(&self, what: &str) -> Result<()> {
        if self.persisted() {
            Ok(())
        } else {
            Err(Error::Custom(format!(
                "cannot {what} a {} that is not persisted",
                self.model_name()
            )))
        }
    }
}
