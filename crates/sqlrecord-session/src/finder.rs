//! Running relations on a connection handle.
//!
//! Relations only describe queries. These methods execute them, turn rows
//! into records of the model registered for the relation's table, and set up
//! dynamic includes and explicit preloads.

use crate::associations::missing_key_error;
use crate::handle::ConnectionHandle;
use crate::load_tree::LoadTreeNode;
use crate::record::Record;
use crate::schema::ModelSchema;
use sqlrecord_core::{Result, Value};
use sqlrecord_query::{Expr, Relation};
use std::sync::Arc;

impl ConnectionHandle {
    /// A relation over every row of a registered model.
    pub fn all(&self, model: &str) -> Result<Relation> {
        Ok(self.model(model)?.all())
    }

    fn model_of(&self, relation: &Relation) -> Result<Arc<ModelSchema>> {
        self.registry().model_for_table(relation.table())
    }

    /// Load every matching record.
    ///
    /// More than one record forms a sibling group for dynamic includes,
    /// unless the handle or the relation turns them off.
    #[tracing::instrument(level = "debug", skip(self, relation), fields(table = relation.table()))]
    pub fn load(&mut self, relation: &Relation) -> Result<Vec<Record>> {
        if relation.is_none() {
            return Ok(Vec::new());
        }
        let schema = self.model_of(relation)?;
        let (sql, params) = relation.to_sql(self.dialect());
        let name = format!("{} Load", schema.name());
        let rows = if relation.lock_value().is_some() {
            self.select_uncached(&name, &sql, &params)?
        } else {
            self.select_all(&name, &sql, &params)?
        };
        let readonly = relation.is_readonly();
        let records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_row(&schema, row, readonly))
            .collect();

        let dynamic = self.dynamic_includes() && relation.dynamic_includes_value().unwrap_or(true);
        if dynamic && records.len() > 1 {
            LoadTreeNode::root(&records);
        }
        for include in relation.include_values() {
            self.preload(&records, include)?;
        }
        Ok(records)
    }

    /// First record by primary key (or by the relation's order).
    pub fn first(&mut self, relation: &Relation) -> Result<Option<Record>> {
        let relation = relation.ordered_by_primary_key().limit(1);
        Ok(self.load(&relation)?.into_iter().next())
    }

    /// Last record by primary key (or by the reversed relation order).
    pub fn last(&mut self, relation: &Relation) -> Result<Option<Record>> {
        let relation = relation.ordered_by_primary_key().reverse_order().limit(1);
        Ok(self.load(&relation)?.into_iter().next())
    }

    /// Any one record, without ordering.
    pub fn take(&mut self, relation: &Relation) -> Result<Option<Record>> {
        Ok(self.load(&relation.limit(1))?.into_iter().next())
    }

    /// The record with primary key `id`, or [`Error::RecordNotFound`].
    ///
    /// [`Error::RecordNotFound`]: sqlrecord_core::Error::RecordNotFound
    pub fn find(&mut self, relation: &Relation, id: impl Into<Value>) -> Result<Record> {
        let id = id.into();
        let schema = self.model_of(relation)?;
        let scoped = relation.filter_eq(relation.primary_key(), id.clone());
        self.take(&scoped)?
            .ok_or_else(|| missing_key_error(&schema, &id))
    }

    /// The first record with `column = value`.
    pub fn find_by(
        &mut self,
        relation: &Relation,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Record>> {
        self.take(&relation.filter_eq(column, value))
    }

    pub fn count(&mut self, relation: &Relation) -> Result<i64> {
        if relation.is_none() {
            return Ok(0);
        }
        let schema = self.model_of(relation)?;
        let (sql, params) = relation.count_sql(self.dialect());
        let rows = self.select_all(&format!("{} Count", schema.name()), &sql, &params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    pub fn exists(&mut self, relation: &Relation) -> Result<bool> {
        if relation.is_none() {
            return Ok(false);
        }
        let schema = self.model_of(relation)?;
        let (sql, params) = relation.exists_sql(self.dialect());
        let rows = self.select_all(&format!("{} Exists", schema.name()), &sql, &params)?;
        Ok(!rows.is_empty())
    }

    /// Selected column values per row, cast to the model's column types.
    pub fn pluck(&mut self, relation: &Relation, columns: &[&str]) -> Result<Vec<Vec<Value>>> {
        if relation.is_none() {
            return Ok(Vec::new());
        }
        let schema = self.model_of(relation)?;
        let (sql, params) = relation.pluck_sql(self.dialect(), columns);
        let rows = self.select_all(&format!("{} Pluck", schema.name()), &sql, &params)?;
        let types: Vec<_> = columns
            .iter()
            .map(|c| schema.column_index(c).map(|i| schema.columns()[i].sql_type))
            .collect();
        Ok(rows
            .into_iter()
            .map(|row| {
                row.values()
                    .zip(&types)
                    .map(|(value, ty)| match ty {
                        Some(ty) => ty.cast(value.clone()),
                        None => value.clone(),
                    })
                    .collect()
            })
            .collect())
    }

    /// Update every matching row with one statement. No callbacks, no
    /// locking.
    pub fn update_all<I, S, E>(&mut self, relation: &Relation, assignments: I) -> Result<u64>
    where
        I: IntoIterator<Item = (S, E)>,
        S: Into<String>,
        E: Into<Expr>,
    {
        if relation.is_none() {
            return Ok(0);
        }
        let schema = self.model_of(relation)?;
        let assignments: Vec<(String, Expr)> = assignments
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect();
        let (sql, params) = relation.update_all_sql(self.dialect(), &assignments);
        self.exec_update(&format!("{} Update All", schema.name()), &sql, &params)
    }

    /// Delete every matching row with one statement. No callbacks.
    pub fn delete_all(&mut self, relation: &Relation) -> Result<u64> {
        if relation.is_none() {
            return Ok(0);
        }
        let schema = self.model_of(relation)?;
        let (sql, params) = relation.delete_all_sql(self.dialect());
        self.exec_update(&format!("{} Delete All", schema.name()), &sql, &params)
    }
}
