//! In-memory records and dirty tracking.
//!
//! A [`Record`] is a cheap, cloneable handle to one row's state. Clones share
//! the same state, so a record cached on an association, enrolled in a
//! transaction and held by the caller is one object.

use crate::associations::AssociationTarget;
use crate::load_tree::LoadTreeNode;
use crate::schema::ModelSchema;
use sqlrecord_core::{Error, FromValue, Result, Row, ValidationError, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Attribute changes as `name -> (old, new)`.
pub type Changes = BTreeMap<String, (Value, Value)>;

pub(crate) struct RecordState {
    pub(crate) schema: Arc<ModelSchema>,
    pub(crate) values: Vec<Value>,
    /// Values as last read from or written to the database.
    pub(crate) original: Vec<Value>,
    /// Selected columns the model does not declare (`COUNT(*) AS n`).
    pub(crate) extra: Vec<(String, Value)>,
    pub(crate) previous_changes: Changes,
    pub(crate) new_record: bool,
    pub(crate) destroyed: bool,
    pub(crate) readonly: bool,
    pub(crate) associations: HashMap<String, AssociationTarget>,
    /// Owners reached through `inverse_of`, held weakly so owner and
    /// children do not keep each other alive.
    pub(crate) inverses: HashMap<String, Weak<Mutex<RecordState>>>,
    /// Associated records to save and link once this record is saved.
    pub(crate) pending: Vec<(String, Record)>,
    pub(crate) load_node: Option<Arc<LoadTreeNode>>,
    pub(crate) errors: ValidationError,
}

/// Record state captured when it first joins a transaction.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    new_record: bool,
    destroyed: bool,
    id: Value,
    lock_version: Option<Value>,
    original: Vec<Value>,
    previous_changes: Changes,
}

/// A handle to one row of a model.
#[derive(Clone)]
pub struct Record {
    pub(crate) inner: Arc<Mutex<RecordState>>,
}

impl Record {
    /// A new, unsaved record with column defaults.
    pub fn new(schema: &Arc<ModelSchema>) -> Self {
        let values: Vec<Value> = schema.columns().iter().map(|c| c.default.clone()).collect();
        Self::from_state(RecordState {
            schema: Arc::clone(schema),
            original: values.clone(),
            values,
            extra: Vec::new(),
            previous_changes: Changes::new(),
            new_record: true,
            destroyed: false,
            readonly: false,
            associations: HashMap::new(),
            inverses: HashMap::new(),
            pending: Vec::new(),
            load_node: None,
            errors: ValidationError::new(),
        })
    }

    /// A new record with attributes assigned.
    pub fn build<I, S>(schema: &Arc<ModelSchema>, attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let record = Self::new(schema);
        for (name, value) in attributes {
            record.set(name.as_ref(), value)?;
        }
        Ok(record)
    }

    /// A persisted record read from `row`.
    pub(crate) fn from_row(schema: &Arc<ModelSchema>, row: Row, readonly: bool) -> Self {
        let mut values = vec![Value::Null; schema.columns().len()];
        let mut extra = Vec::new();
        for (name, value) in row.into_pairs() {
            match schema.column_index(&name) {
                Some(i) => values[i] = schema.columns()[i].sql_type.cast(value),
                None => extra.push((name, value)),
            }
        }
        Self::from_state(RecordState {
            schema: Arc::clone(schema),
            original: values.clone(),
            values,
            extra,
            previous_changes: Changes::new(),
            new_record: false,
            destroyed: false,
            readonly,
            associations: HashMap::new(),
            inverses: HashMap::new(),
            pending: Vec::new(),
            load_node: None,
            errors: ValidationError::new(),
        })
    }

    fn from_state(state: RecordState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn from_weak(weak: &Weak<Mutex<RecordState>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<RecordState>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RecordState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether two handles refer to the same record.
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether two handles stand for the same row: the same record, or
    /// saved records of one model with equal primary keys. A destroyed
    /// record still matches the row it was loaded from.
    pub fn same_row(&self, other: &Record) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.row_key(), other.row_key()) {
            (Some((model, id)), Some((other_model, other_id))) => {
                model == other_model && id.same_as(&other_id)
            }
            _ => false,
        }
    }

    /// Model name and primary key of a record that has been saved.
    fn row_key(&self) -> Option<(String, Value)> {
        let state = self.state();
        let id = &state.values[state.schema.primary_key_index()];
        if state.new_record || id.is_null() {
            return None;
        }
        Some((state.schema.name().to_string(), id.clone()))
    }

    pub fn schema(&self) -> Arc<ModelSchema> {
        Arc::clone(&self.state().schema)
    }

    pub fn model_name(&self) -> String {
        self.state().schema.name().to_string()
    }

    // ==================== Attributes ====================

    /// Read an attribute.
    pub fn get(&self, name: &str) -> Result<Value> {
        let state = self.state();
        if let Some(i) = state.schema.column_index(name) {
            return Ok(state.values[i].clone());
        }
        state
            .extra
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| unknown_attribute(&state, name))
    }

    /// Read an attribute as a Rust type.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.get(name)?)
    }

    /// Assign an attribute, casting it to the column type.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut state = self.state();
        let i = state
            .schema
            .column_index(name)
            .ok_or_else(|| unknown_attribute(&state, name))?;
        let cast = state.schema.columns()[i].sql_type.cast(value.into());
        state.values[i] = cast;
        Ok(())
    }

    /// Every attribute as `(name, value)`, declared columns first.
    pub fn attributes(&self) -> Vec<(String, Value)> {
        let state = self.state();
        state
            .schema
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .zip(state.values.iter().cloned())
            .chain(state.extra.iter().cloned())
            .collect()
    }

    /// The primary key value (NULL until saved).
    pub fn id(&self) -> Value {
        let state = self.state();
        state.values[state.schema.primary_key_index()].clone()
    }

    // ==================== Dirty Tracking ====================

    /// Names of attributes changed since the last save or load.
    pub fn changed(&self) -> Vec<String> {
        self.changes().into_keys().collect()
    }

    pub fn has_changes(&self) -> bool {
        let state = self.state();
        state
            .values
            .iter()
            .zip(&state.original)
            .any(|(v, o)| !v.same_as(o))
    }

    /// Changed attributes with their original and current values.
    pub fn changes(&self) -> Changes {
        let state = self.state();
        changes_of(&state)
    }

    pub fn attribute_changed(&self, name: &str) -> bool {
        let state = self.state();
        state
            .schema
            .column_index(name)
            .is_some_and(|i| !state.values[i].same_as(&state.original[i]))
    }

    /// The value an attribute had before unsaved changes.
    pub fn attribute_was(&self, name: &str) -> Result<Value> {
        let state = self.state();
        let i = state
            .schema
            .column_index(name)
            .ok_or_else(|| unknown_attribute(&state, name))?;
        Ok(state.original[i].clone())
    }

    /// Changes persisted by the last save.
    pub fn previous_changes(&self) -> Changes {
        self.state().previous_changes.clone()
    }

    /// Make the current values the new baseline.
    pub fn changes_applied(&self) {
        let mut state = self.state();
        state.previous_changes = changes_of(&state);
        state.original = state.values.clone();
    }

    /// Discard unsaved changes.
    pub fn restore_attributes(&self) {
        let mut state = self.state();
        state.values = state.original.clone();
    }

    // ==================== Flags ====================

    pub fn new_record(&self) -> bool {
        self.state().new_record
    }

    /// Saved and not destroyed.
    pub fn persisted(&self) -> bool {
        let state = self.state();
        !state.new_record && !state.destroyed
    }

    pub fn destroyed(&self) -> bool {
        self.state().destroyed
    }

    pub fn readonly(&self) -> bool {
        self.state().readonly
    }

    /// Refuse further saves and destroys.
    pub fn mark_readonly(&self) {
        self.state().readonly = true;
    }

    /// Validation errors from the last save attempt.
    pub fn errors(&self) -> ValidationError {
        self.state().errors.clone()
    }

    /// The load tree node this record was loaded into, if any.
    pub fn load_node(&self) -> Option<Arc<LoadTreeNode>> {
        self.state().load_node.clone()
    }

    /// Attributes as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .attributes()
            .into_iter()
            .map(|(name, value)| (name, value_to_json(value)))
            .collect();
        serde_json::Value::Object(object)
    }

    // ==================== Crate Internals ====================

    /// Replace every declared attribute with a fresh database read.
    pub(crate) fn load_row(&self, row: Row) {
        let mut state = self.state();
        let schema = Arc::clone(&state.schema);
        state.extra.clear();
        for (name, value) in row.into_pairs() {
            match schema.column_index(&name) {
                Some(i) => {
                    let cast = schema.columns()[i].sql_type.cast(value);
                    state.original[i] = cast.clone();
                    state.values[i] = cast;
                }
                None => state.extra.push((name, value)),
            }
        }
        state.associations.clear();
        state.inverses.clear();
    }

    /// Set a column's value and baseline together, so it does not read as
    /// changed.
    pub(crate) fn write_clean(&self, index: usize, value: Value) {
        let mut state = self.state();
        state.original[index] = value.clone();
        state.values[index] = value;
    }

    pub(crate) fn value_at(&self, index: usize) -> Value {
        self.state().values[index].clone()
    }

    pub(crate) fn original_at(&self, index: usize) -> Value {
        self.state().original[index].clone()
    }

    pub(crate) fn set_at(&self, index: usize, value: Value) {
        self.state().values[index] = value;
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state();
        let schema = &state.schema;
        Snapshot {
            new_record: state.new_record,
            destroyed: state.destroyed,
            id: state.values[schema.primary_key_index()].clone(),
            lock_version: schema.locking_index().map(|i| state.values[i].clone()),
            original: state.original.clone(),
            previous_changes: state.previous_changes.clone(),
        }
    }

    /// Roll in-memory state back to `snapshot`. Attribute values are kept,
    /// so anything saved since reads as an unsaved change again.
    pub(crate) fn restore(&self, snapshot: &Snapshot) {
        let mut state = self.state();
        let schema = Arc::clone(&state.schema);
        state.new_record = snapshot.new_record;
        state.destroyed = snapshot.destroyed;
        state.values[schema.primary_key_index()] = snapshot.id.clone();
        if let (Some(i), Some(version)) = (schema.locking_index(), &snapshot.lock_version) {
            state.values[i] = version.clone();
        }
        state.original = snapshot.original.clone();
        state.previous_changes = snapshot.previous_changes.clone();
    }

    pub(crate) fn cached_association(&self, name: &str) -> Option<AssociationTarget> {
        self.state().associations.get(name).cloned()
    }

    pub(crate) fn cache_association(&self, name: &str, target: AssociationTarget) {
        self.state().associations.insert(name.to_string(), target);
    }

    pub(crate) fn clear_association(&self, name: &str) {
        let mut state = self.state();
        state.associations.remove(name);
        state.inverses.remove(name);
    }

    pub(crate) fn set_inverse(&self, name: &str, owner: &Record) {
        self.state()
            .inverses
            .insert(name.to_string(), owner.downgrade());
    }

    pub(crate) fn inverse(&self, name: &str) -> Option<Record> {
        self.state().inverses.get(name).and_then(Record::from_weak)
    }

    pub(crate) fn set_load_node(&self, node: Arc<LoadTreeNode>) {
        self.state().load_node = Some(node);
    }
}

fn changes_of(state: &RecordState) -> Changes {
    state
        .schema
        .columns()
        .iter()
        .zip(state.values.iter().zip(&state.original))
        .filter(|(_, (v, o))| !v.same_as(o))
        .map(|(c, (v, o))| (c.name.clone(), (o.clone(), v.clone())))
        .collect()
}

fn unknown_attribute(state: &RecordState, name: &str) -> Error {
    Error::UnknownAttribute {
        model: state.schema.name().to_string(),
        name: name.to_string(),
    }
}

pub(crate) fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => b.into(),
        Value::Int(n) => n.into(),
        Value::BigInt(n) | Value::Timestamp(n) => n.into(),
        Value::Double(n) => serde_json::Number::from_f64(n)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => s.into(),
        Value::Bytes(b) => b.into(),
        Value::Json(j) => j,
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        let mut s = f.debug_struct(state.schema.name());
        for (column, value) in state.schema.columns().iter().zip(&state.values) {
            s.field(&column.name, value);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrecord_core::{ColumnDef, SqlType};

    fn schema() -> Arc<ModelSchema> {
        Arc::new(
            ModelSchema::new("Post", "posts")
                .column(ColumnDef::new("title", SqlType::Text))
                .column(ColumnDef::new("views", SqlType::Integer).default_value(0_i64))
                .column(ColumnDef::new("published", SqlType::Boolean))
                .locking(),
        )
    }

    #[test]
    fn test_new_record_defaults() {
        let post = Record::new(&schema());
        assert!(post.new_record());
        assert!(!post.persisted());
        assert_eq!(post.id(), Value::Null);
        assert_eq!(post.get("views").unwrap(), Value::BigInt(0));
        assert_eq!(post.get("lock_version").unwrap(), Value::BigInt(0));
        assert!(!post.has_changes());
    }

    #[test]
    fn test_set_casts_and_tracks_changes() {
        let post = Record::new(&schema());
        post.set("views", "12").unwrap();
        post.set("title", "Hello").unwrap();
        assert_eq!(post.get("views").unwrap(), Value::BigInt(12));
        assert_eq!(post.changed(), vec!["title".to_string(), "views".to_string()]);
        assert!(post.attribute_changed("title"));
        assert_eq!(post.attribute_was("views").unwrap(), Value::BigInt(0));

        let changes = post.changes();
        assert_eq!(
            changes["title"],
            (Value::Null, Value::Text("Hello".into()))
        );
    }

    #[test]
    fn test_setting_original_value_clears_change() {
        let post = Record::new(&schema());
        post.set("views", 5_i64).unwrap();
        assert!(post.attribute_changed("views"));
        post.set("views", 0_i64).unwrap();
        assert!(!post.attribute_changed("views"));
    }

    #[test]
    fn test_unknown_attribute() {
        let post = Record::new(&schema());
        assert!(matches!(
            post.set("nope", 1_i64),
            Err(Error::UnknownAttribute { .. })
        ));
        assert!(post.get("nope").is_err());
    }

    #[test]
    fn test_changes_applied_and_restore() {
        let post = Record::new(&schema());
        post.set("title", "a").unwrap();
        post.changes_applied();
        assert!(!post.has_changes());
        assert!(post.previous_changes().contains_key("title"));

        post.set("title", "b").unwrap();
        post.restore_attributes();
        assert_eq!(post.get("title").unwrap(), Value::Text("a".into()));
    }

    #[test]
    fn test_from_row_keeps_extra_columns() {
        let row = Row::new(
            vec!["id".into(), "published".into(), "comment_count".into()],
            vec![Value::BigInt(3), Value::BigInt(1), Value::BigInt(9)],
        );
        let post = Record::from_row(&schema(), row, true);
        assert!(post.persisted());
        assert!(post.readonly());
        assert_eq!(post.id(), Value::BigInt(3));
        assert_eq!(post.get("published").unwrap(), Value::Bool(true));
        assert_eq!(post.get_as::<i64>("comment_count").unwrap(), 9);
        assert!(!post.has_changes());
    }

    #[test]
    fn test_snapshot_restore() {
        let post = Record::new(&schema());
        post.set("title", "draft").unwrap();
        let snapshot = post.snapshot();

        // Simulate a save.
        let schema = post.schema();
        post.set_at(schema.primary_key_index(), Value::BigInt(1));
        post.changes_applied();
        post.state().new_record = false;

        post.restore(&snapshot);
        assert!(post.new_record());
        assert_eq!(post.id(), Value::Null);
        assert!(post.attribute_changed("title"));
    }

    #[test]
    fn test_clones_share_state() {
        let post = Record::new(&schema());
        let alias = post.clone();
        alias.set("title", "x").unwrap();
        assert_eq!(post.get("title").unwrap(), Value::Text("x".into()));
        assert!(post.ptr_eq(&alias));
    }

    #[test]
    fn test_to_json() {
        let post = Record::build(&schema(), [("title", Value::from("Hi"))]).unwrap();
        let json = post.to_json();
        assert_eq!(json["title"], "Hi");
        assert_eq!(json["views"], 0);
        assert!(json["id"].is_null());
    }
}
