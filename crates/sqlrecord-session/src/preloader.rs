//! Batch loading of associations for many owners at once.
//!
//! One query per association (two for join-table associations) fills the
//! association cache of every owner, including owners with no match.

use crate::associations::{AssociationTarget, set_inverses};
use crate::handle::ConnectionHandle;
use crate::load_tree::LoadTreeNode;
use crate::record::Record;
use sqlrecord_core::{AssociationKind, Reflection, Result, Value, ValueKey};
use sqlrecord_query::{Include, Relation};
use std::collections::{HashMap, HashSet};

impl ConnectionHandle {
    /// Preload `include` and its nested includes on `records`.
    ///
    /// Records must share one model. Owners that already have the
    /// association cached are left alone, but their cached targets still
    /// take part in nested preloads.
    pub fn preload(&mut self, records: &[Record], include: &Include) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let schema = first.schema();
        let reflection = schema.reflection(&include.name)?.clone();
        let owners: Vec<Record> = records
            .iter()
            .filter(|r| r.persisted() && r.cached_association(&reflection.name).is_none())
            .cloned()
            .collect();
        preload_association(self, &owners, &reflection)?;

        if include.children.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::new();
        let targets: Vec<Record> = records
            .iter()
            .filter_map(|r| r.cached_association(&reflection.name))
            .flat_map(AssociationTarget::many)
            .filter(|t| seen.insert(std::sync::Arc::as_ptr(&t.inner)))
            .collect();
        for child in &include.children {
            self.preload(&targets, child)?;
        }
        Ok(())
    }
}

/// Load `reflection` for every owner and cache it on each one. Returns the
/// distinct loaded targets.
#[tracing::instrument(
    level = "debug",
    skip(conn, owners, reflection),
    fields(association = %reflection.name, owners = owners.len())
)]
pub(crate) fn preload_association(
    conn: &mut ConnectionHandle,
    owners: &[Record],
    reflection: &Reflection,
) -> Result<Vec<Record>> {
    if owners.is_empty() {
        return Ok(Vec::new());
    }
    let target_schema = conn.model(&reflection.target)?;

    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    for owner in owners {
        let value = owner.get(reflection.owner_key())?;
        if let Some(key) = value.key() {
            if seen.insert(key) {
                keys.push(value);
            }
        }
    }

    let (targets, by_owner_key) = if keys.is_empty() {
        (Vec::new(), HashMap::new())
    } else if reflection.kind == AssociationKind::HasAndBelongsToMany {
        load_through_join_table(conn, reflection, &target_schema.all(), keys)?
    } else {
        let relation = target_schema
            .all()
            .filter_in(reflection.target_key(), keys)
            .dynamic_includes(false);
        let targets = conn.load(&relation)?;
        let mut grouped: HashMap<ValueKey, Vec<Record>> = HashMap::new();
        for target in &targets {
            if let Some(key) = target.get(reflection.target_key())?.key() {
                grouped.entry(key).or_default().push(target.clone());
            }
        }
        (targets, grouped)
    };

    for owner in owners {
        let matched = owner
            .get(reflection.owner_key())?
            .key()
            .and_then(|k| by_owner_key.get(&k).cloned())
            .unwrap_or_default();
        set_inverses(&target_schema, reflection, owner, &matched);
        owner.cache_association(
            &reflection.name,
            AssociationTarget::for_reflection(reflection, matched),
        );
    }

    if conn.dynamic_includes() && !targets.is_empty() {
        let node = match owners[0].load_node() {
            Some(node) => node.child(&reflection.name),
            None => LoadTreeNode::root(&[]),
        };
        node.adopt(&targets);
    }
    tracing::trace!(targets = targets.len(), "Preloaded association");
    Ok(targets)
}

/// Join-table rows first, then the targets they name.
fn load_through_join_table(
    conn: &mut ConnectionHandle,
    reflection: &Reflection,
    targets_relation: &Relation,
    owner_keys: Vec<Value>,
) -> Result<(Vec<Record>, HashMap<ValueKey, Vec<Record>>)> {
    let Some(join) = &reflection.join_table else {
        return Ok((Vec::new(), HashMap::new()));
    };
    let (sql, params) = Relation::new(join.table.as_str())
        .select([join.owner_key.as_str(), join.target_key.as_str()])
        .filter_in(&join.owner_key, owner_keys)
        .to_sql(conn.dialect());
    let rows = conn.select_all(&format!("{} Load", join.table), &sql, &params)?;

    let mut links = Vec::with_capacity(rows.len());
    let mut target_ids = Vec::new();
    let mut seen = HashSet::new();
    for row in rows {
        let owner = row.get(0).cloned().unwrap_or(Value::Null);
        let target = row.get(1).cloned().unwrap_or(Value::Null);
        if let (Some(owner), Some(target_key)) = (owner.key(), target.key()) {
            if seen.insert(target_key.clone()) {
                target_ids.push(target);
            }
            links.push((owner, target_key));
        }
    }
    if target_ids.is_empty() {
        return Ok((Vec::new(), HashMap::new()));
    }

    let relation = targets_relation
        .filter_in(targets_relation.primary_key(), target_ids)
        .dynamic_includes(false);
    let targets = conn.load(&relation)?;
    let mut by_id: HashMap<ValueKey, Record> = HashMap::new();
    for target in &targets {
        if let Some(key) = target.id().key() {
            by_id.insert(key, target.clone());
        }
    }

    let mut grouped: HashMap<ValueKey, Vec<Record>> = HashMap::new();
    for (owner, target_key) in links {
        if let Some(target) = by_id.get(&target_key) {
            grouped.entry(owner).or_default().push(target.clone());
        }
    }
    Ok((targets, grouped))
}
