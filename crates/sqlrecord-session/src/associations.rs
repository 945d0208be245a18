//! Association readers and writers.
//!
//! Readers resolve in this order: the inverse owner, the record's cache, the
//! unsaved children of a new record, a batch load across the record's
//! siblings (dynamic includes), and finally a query for this record alone.

use crate::handle::ConnectionHandle;
use crate::load_tree::LoadTreeNode;
use crate::persistence::display_key;
use crate::record::Record;
use crate::schema::ModelSchema;
use sqlrecord_core::{AssociationKind, Dependent, Error, Reflection, Result, Value};
use sqlrecord_query::{DeleteBuilder, Expr, InsertBuilder, Join, Relation};
use std::sync::Arc;

/// The loaded side of an association.
#[derive(Debug, Clone)]
pub enum AssociationTarget {
    /// Belongs-to and has-one.
    One(Option<Record>),
    /// Has-many and has-and-belongs-to-many.
    Many(Vec<Record>),
}

impl AssociationTarget {
    pub(crate) fn for_reflection(reflection: &Reflection, records: Vec<Record>) -> Self {
        if reflection.is_collection() {
            AssociationTarget::Many(records)
        } else {
            AssociationTarget::One(records.into_iter().next())
        }
    }

    /// The single record; for a collection, its first member.
    pub fn one(self) -> Option<Record> {
        match self {
            AssociationTarget::One(record) => record,
            AssociationTarget::Many(records) => records.into_iter().next(),
        }
    }

    /// Every record, as a list.
    pub fn many(self) -> Vec<Record> {
        match self {
            AssociationTarget::One(record) => record.into_iter().collect(),
            AssociationTarget::Many(records) => records,
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.clone().many()
    }

    pub fn len(&self) -> usize {
        match self {
            AssociationTarget::One(record) => usize::from(record.is_some()),
            AssociationTarget::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The relation selecting `reflection`'s targets for an owner key value.
pub(crate) fn association_relation(
    target: &ModelSchema,
    reflection: &Reflection,
    owner_key: Value,
) -> Relation {
    let base = target.all();
    match &reflection.join_table {
        Some(join) if reflection.kind == AssociationKind::HasAndBelongsToMany => base
            .joins(Join::inner(
                join.table.as_str(),
                Expr::qualified(join.table.as_str(), join.target_key.as_str()).eq(
                    Expr::qualified(target.table(), target.primary_key_name()),
                ),
            ))
            .filter(Expr::qualified(join.table.as_str(), join.owner_key.as_str()).eq(owner_key)),
        _ => base.filter_eq(reflection.target_key(), owner_key),
    }
}

impl Record {
    /// Read an association, loading it on first access.
    ///
    /// When this record was loaded together with others and dynamic
    /// includes are on, the first read loads the association for every
    /// sibling with one query.
    #[tracing::instrument(level = "trace", skip(self, conn))]
    pub fn association(
        &self,
        conn: &mut ConnectionHandle,
        name: &str,
    ) -> Result<AssociationTarget> {
        let schema = self.schema();
        let reflection = schema.reflection(name)?.clone();

        if let Some(owner) = self.inverse(name) {
            return Ok(AssociationTarget::One(Some(owner)));
        }
        if let Some(cached) = self.cached_association(name) {
            return Ok(cached);
        }
        if self.new_record() && reflection.kind != AssociationKind::BelongsTo {
            let pending = self.pending_for(name);
            return Ok(AssociationTarget::for_reflection(&reflection, pending));
        }
        if self.batch_load(conn, &reflection)? {
            if let Some(cached) = self.cached_association(name) {
                return Ok(cached);
            }
        }
        let target = self.load_association(conn, &reflection)?;
        self.cache_association(name, target.clone());
        Ok(target)
    }

    /// Drop the cached association and load it again.
    pub fn reload_association(
        &self,
        conn: &mut ConnectionHandle,
        name: &str,
    ) -> Result<AssociationTarget> {
        let schema = self.schema();
        let reflection = schema.reflection(name)?.clone();
        self.clear_association(name);
        let target = self.load_association(conn, &reflection)?;
        self.cache_association(name, target.clone());
        Ok(target)
    }

    /// Preload `reflection` for this record's live siblings that lack it.
    fn batch_load(&self, conn: &mut ConnectionHandle, reflection: &Reflection) -> Result<bool> {
        if !conn.dynamic_includes() || !reflection.dynamic_includes {
            return Ok(false);
        }
        let Some(node) = self.load_node() else {
            return Ok(false);
        };
        let siblings = node.siblings();
        if siblings.len() < 2 {
            return Ok(false);
        }
        let owners: Vec<Record> = siblings
            .into_iter()
            .filter(|r| r.persisted() && r.cached_association(&reflection.name).is_none())
            .collect();
        if !owners.iter().any(|o| o.ptr_eq(self)) {
            return Ok(false);
        }
        tracing::debug!(
            model = %self.model_name(),
            association = %reflection.name,
            path = ?node.path(),
            owners = owners.len(),
            "Loading association for sibling records"
        );
        crate::preloader::preload_association(conn, &owners, reflection)?;
        Ok(true)
    }

    /// Query the association for this record alone.
    fn load_association(
        &self,
        conn: &mut ConnectionHandle,
        reflection: &Reflection,
    ) -> Result<AssociationTarget> {
        let key = self.get(reflection.owner_key())?;
        if key.is_null() {
            return Ok(AssociationTarget::for_reflection(reflection, Vec::new()));
        }
        if self.load_node().is_some_and(|n| n.live_count() > 1) {
            conn.n1_tracker_mut()
                .record_load(&self.model_name(), &reflection.name);
        }
        let target_schema = conn.model(&reflection.target)?;
        let relation =
            association_relation(&target_schema, reflection, key).dynamic_includes(false);
        let relation = if reflection.is_collection() {
            relation
        } else {
            relation.limit(1)
        };
        let records = conn.load(&relation)?;

        if conn.dynamic_includes() && !records.is_empty() {
            let node = match self.load_node() {
                Some(node) => node.child(&reflection.name),
                None => LoadTreeNode::root(&[]),
            };
            node.adopt(&records);
        }
        set_inverses(&target_schema, reflection, self, &records);
        Ok(AssociationTarget::for_reflection(reflection, records))
    }

    fn pending_for(&self, name: &str) -> Vec<Record> {
        self.state()
            .pending
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
            .collect()
    }

    // ==================== Writers ====================

    /// Point a belongs-to association at `target`, or clear it with `None`.
    /// An unsaved target is saved before this record.
    pub fn assign_belongs_to(&self, name: &str, target: Option<&Record>) -> Result<()> {
        let schema = self.schema();
        let reflection = schema.reflection(name)?;
        if reflection.kind != AssociationKind::BelongsTo {
            return Err(Error::Custom(format!(
                "{}.{name} is not a belongs-to association",
                schema.name()
            )));
        }
        match target {
            Some(target) => {
                self.set(&reflection.foreign_key, target.get(&reflection.primary_key)?)?;
                if target.new_record() {
                    self.state().pending.push((name.to_string(), target.clone()));
                }
                self.cache_association(name, AssociationTarget::One(Some(target.clone())));
            }
            None => {
                self.set(&reflection.foreign_key, Value::Null)?;
                self.cache_association(name, AssociationTarget::One(None));
            }
        }
        Ok(())
    }

    /// Build an unsaved record on a has-many, has-one or join-table
    /// association. It is saved and linked when this record is saved.
    pub fn build_associated<I, S>(
        &self,
        conn: &ConnectionHandle,
        name: &str,
        attributes: I,
    ) -> Result<Record>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let schema = self.schema();
        let reflection = schema.reflection(name)?.clone();
        if reflection.kind == AssociationKind::BelongsTo {
            return Err(Error::Custom(format!(
                "cannot build through belongs-to association {}.{name}",
                schema.name()
            )));
        }
        let target_schema = conn.model(&reflection.target)?;
        let record = Record::build(&target_schema, attributes)?;
        if reflection.kind != AssociationKind::HasAndBelongsToMany && self.persisted() {
            record.set(&reflection.foreign_key, self.get(reflection.owner_key())?)?;
        }
        self.state().pending.push((name.to_string(), record.clone()));
        self.add_to_cache(&reflection, &record);
        set_inverses(&target_schema, &reflection, self, std::slice::from_ref(&record));
        Ok(record)
    }

    /// Add `target` to a has-many, has-one or join-table association.
    ///
    /// With a persisted owner the child is saved (or the join row written)
    /// immediately; otherwise it is saved along with the owner.
    pub fn push_associated(
        &self,
        conn: &mut ConnectionHandle,
        name: &str,
        target: &Record,
    ) -> Result<()> {
        let schema = self.schema();
        let reflection = schema.reflection(name)?.clone();
        if reflection.kind == AssociationKind::BelongsTo {
            return Err(Error::Custom(format!(
                "use assign_belongs_to for belongs-to association {}.{name}",
                schema.name()
            )));
        }
        if self.persisted() {
            self.link_child(conn, &reflection, target)?;
        } else {
            self.state().pending.push((name.to_string(), target.clone()));
        }
        self.add_to_cache(&reflection, target);
        let target_schema = target.schema();
        set_inverses(&target_schema, &reflection, self, std::slice::from_ref(target));
        Ok(())
    }

    /// Build, save and link a record on a persisted owner.
    pub fn create_associated<I, S>(
        &self,
        conn: &mut ConnectionHandle,
        name: &str,
        attributes: I,
    ) -> Result<Record>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        if !self.persisted() {
            return Err(Error::RecordNotSaved(format!(
                "cannot create {name} unless the {} is saved",
                self.model_name()
            )));
        }
        let schema = self.schema();
        let reflection = schema.reflection(name)?;
        let target_schema = conn.model(&reflection.target)?;
        let record = Record::build(&target_schema, attributes)?;
        self.push_associated(conn, name, &record)?;
        Ok(record)
    }

    /// Remove `target` from a collection.
    ///
    /// Join-table associations delete the join row. Has-many and has-one
    /// apply the association's `dependent` option, nullifying the foreign
    /// key by default.
    pub fn delete_associated(
        &self,
        conn: &mut ConnectionHandle,
        name: &str,
        target: &Record,
    ) -> Result<()> {
        let schema = self.schema();
        let reflection = schema.reflection(name)?.clone();
        match reflection.kind {
            AssociationKind::BelongsTo => {
                return Err(Error::Custom(format!(
                    "use assign_belongs_to for belongs-to association {}.{name}",
                    schema.name()
                )));
            }
            AssociationKind::HasAndBelongsToMany => {
                if let Some(join) = &reflection.join_table {
                    let (sql, params) = DeleteBuilder::new(join.table.as_str())
                        .filter(
                            Expr::col(join.owner_key.as_str())
                                .eq(self.get(reflection.owner_key())?),
                        )
                        .filter(Expr::col(join.target_key.as_str()).eq(target.id()))
                        .build(conn.dialect());
                    conn.exec_update(&format!("{} Delete", join.table), &sql, &params)?;
                }
            }
            AssociationKind::HasMany | AssociationKind::HasOne => match reflection.dependent {
                Dependent::Destroy => target.destroy(conn)?,
                Dependent::DeleteAll => target.delete(conn)?,
                _ if target.persisted() => {
                    target.update_columns(conn, [(reflection.foreign_key.as_str(), Value::Null)])?;
                }
                _ => target.set(&reflection.foreign_key, Value::Null)?,
            },
        }
        self.state().pending.retain(|(n, r)| !(n == name && r.ptr_eq(target)));
        if let Some(cached) = self.cached_association(name) {
            let kept: Vec<Record> = cached
                .many()
                .into_iter()
                .filter(|r| !r.same_row(target))
                .collect();
            self.cache_association(name, AssociationTarget::for_reflection(&reflection, kept));
        }
        Ok(())
    }

    fn add_to_cache(&self, reflection: &Reflection, target: &Record) {
        match self.cached_association(&reflection.name) {
            Some(AssociationTarget::Many(mut records)) => {
                match records.iter().position(|r| r.same_row(target)) {
                    Some(i) => records[i] = target.clone(),
                    None => records.push(target.clone()),
                }
                self.cache_association(&reflection.name, AssociationTarget::Many(records));
            }
            Some(AssociationTarget::One(_)) | None if !reflection.is_collection() => {
                let one = AssociationTarget::One(Some(target.clone()));
                self.cache_association(&reflection.name, one);
            }
            _ => {}
        }
    }

    /// Save `target` against this persisted owner, or write its join row.
    fn link_child(
        &self,
        conn: &mut ConnectionHandle,
        reflection: &Reflection,
        target: &Record,
    ) -> Result<()> {
        let owner_key = self.get(reflection.owner_key())?;
        match &reflection.join_table {
            Some(join) if reflection.kind == AssociationKind::HasAndBelongsToMany => {
                if target.new_record() {
                    target.save(conn)?;
                }
                let (sql, params) = InsertBuilder::new(join.table.as_str())
                    .value(join.owner_key.as_str(), owner_key)
                    .value(join.target_key.as_str(), target.id())
                    .build(conn.dialect());
                conn.exec_insert(&format!("{} Create", join.table), &sql, &params)?;
                Ok(())
            }
            _ => {
                target.set(&reflection.foreign_key, owner_key)?;
                target.save(conn)
            }
        }
    }

    /// Save unsaved belongs-to targets so this record can point at them.
    pub(crate) fn save_pending_parents(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let schema = self.schema();
        let pending = self.state().pending.clone();
        for (name, target) in pending {
            let reflection = schema.reflection(&name)?;
            if reflection.kind != AssociationKind::BelongsTo {
                continue;
            }
            if target.new_record() {
                target.save(conn)?;
            }
            self.set(&reflection.foreign_key, target.get(&reflection.primary_key)?)?;
        }
        self.state().pending.retain(|(name, _)| {
            schema
                .reflection(name)
                .is_ok_and(|r| r.kind != AssociationKind::BelongsTo)
        });
        Ok(())
    }

    /// Save and link children added while this record was unsaved.
    pub(crate) fn save_pending_associations(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let pending = std::mem::take(&mut self.state().pending);
        if pending.is_empty() {
            return Ok(());
        }
        let schema = self.schema();
        for (name, target) in &pending {
            let reflection = schema.reflection(name)?.clone();
            self.link_child(conn, &reflection, target)?;
        }
        tracing::trace!(
            model = %self.model_name(),
            children = pending.len(),
            "Saved pending associations"
        );
        Ok(())
    }

    /// Apply `dependent` options before this record's row is deleted.
    pub(crate) fn destroy_dependents(&self, conn: &mut ConnectionHandle) -> Result<()> {
        let schema = self.schema();
        let dialect = conn.dialect();
        for reflection in schema.reflections() {
            let restricts = reflection.dependent == Dependent::Restrict
                && matches!(
                    reflection.kind,
                    AssociationKind::HasMany | AssociationKind::HasOne
                );
            if !restricts {
                continue;
            }
            let relation = self.dependent_relation(conn, reflection)?;
            let (sql, params) = relation.exists_sql(dialect);
            let target = conn.model(&reflection.target)?;
            if !conn
                .select_uncached(&format!("{} Exists", target.name()), &sql, &params)?
                .is_empty()
            {
                return Err(Error::RecordNotDestroyed(format!(
                    "Cannot delete record because of dependent {}",
                    reflection.name
                )));
            }
        }

        for reflection in schema.reflections() {
            match (reflection.kind, reflection.dependent) {
                (AssociationKind::HasAndBelongsToMany, _) => {
                    if let Some(join) = &reflection.join_table {
                        let (sql, params) = DeleteBuilder::new(join.table.as_str())
                            .filter(
                                Expr::col(join.owner_key.as_str())
                                    .eq(self.get(reflection.owner_key())?),
                            )
                            .build(dialect);
                        conn.exec_update(&format!("{} Delete", join.table), &sql, &params)?;
                    }
                }
                (AssociationKind::BelongsTo, _) => {}
                (_, Dependent::Destroy) => {
                    for child in self.association(conn, &reflection.name)?.many() {
                        child.destroy(conn)?;
                    }
                }
                (_, Dependent::DeleteAll) => {
                    let (sql, params) = self
                        .dependent_relation(conn, reflection)?
                        .delete_all_sql(dialect);
                    let target = conn.model(&reflection.target)?;
                    conn.exec_update(&format!("{} Delete All", target.name()), &sql, &params)?;
                }
                (_, Dependent::Nullify) => {
                    let (sql, params) = self
                        .dependent_relation(conn, reflection)?
                        .update_all_sql(
                            dialect,
                            &[(reflection.foreign_key.clone(), Expr::lit(Value::Null))],
                        );
                    let target = conn.model(&reflection.target)?;
                    conn.exec_update(&format!("{} Update All", target.name()), &sql, &params)?;
                }
                (_, Dependent::None | Dependent::Restrict) => {}
            }
        }
        Ok(())
    }

    fn dependent_relation(
        &self,
        conn: &ConnectionHandle,
        reflection: &Reflection,
    ) -> Result<Relation> {
        let target = conn.model(&reflection.target)?;
        Ok(association_relation(&target, reflection, self.get(reflection.owner_key())?))
    }
}

/// Point loaded has-one/has-many targets back at their owner.
pub(crate) fn set_inverses(
    target_schema: &Arc<ModelSchema>,
    reflection: &Reflection,
    owner: &Record,
    targets: &[Record],
) {
    let Some(inverse) = &reflection.inverse_of else {
        return;
    };
    let singular = target_schema
        .reflection(inverse)
        .is_ok_and(|r| !r.is_collection());
    if !singular || reflection.kind == AssociationKind::BelongsTo {
        return;
    }
    for target in targets {
        target.set_inverse(inverse, owner);
    }
}

pub(crate) fn missing_key_error(schema: &ModelSchema, key: &Value) -> Error {
    Error::RecordNotFound {
        model: schema.name().to_string(),
        key: display_key(key),
    }
}
