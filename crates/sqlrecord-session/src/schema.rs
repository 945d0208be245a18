//! Model schemas, callbacks and the model registry.
//!
//! A [`ModelSchema`] is everything the session layer knows about one model:
//! its table, columns, optional locking column, associations, lifecycle
//! callbacks and validators. Schemas are registered in a [`Registry`] and
//! shared by every connection handle as `Arc<ModelSchema>`.

use crate::handle::ConnectionHandle;
use crate::record::Record;
use sqlrecord_core::{ColumnDef, Error, Reflection, Result, SqlType, ValidationError, Value};
use sqlrecord_query::Relation;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default name of the optimistic locking column.
pub const DEFAULT_LOCKING_COLUMN: &str = "lock_version";

/// Lifecycle points a callback can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    BeforeValidation,
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDestroy,
    AfterDestroy,
    /// After the outermost transaction commits.
    AfterCommit,
    /// After the transaction that wrote the record rolls back.
    AfterRollback,
}

/// What a record did inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionAction {
    Create,
    Update,
    Destroy,
}

impl TransactionAction {
    /// Combine two actions taken on the same record in one transaction.
    pub(crate) fn merge(self, later: TransactionAction) -> TransactionAction {
        match (self, later) {
            (_, TransactionAction::Destroy) | (TransactionAction::Destroy, _) => {
                TransactionAction::Destroy
            }
            (TransactionAction::Create, _) | (_, TransactionAction::Create) => {
                TransactionAction::Create
            }
            _ => TransactionAction::Update,
        }
    }
}

/// A lifecycle callback. It may read and write the record and run queries
/// on the connection; returning an error from a `before_*` callback halts
/// the operation.
pub type Callback = Arc<dyn Fn(&mut ConnectionHandle, &Record) -> Result<()> + Send + Sync>;

/// A validator adds messages to `errors` for an invalid record.
pub type Validator = Arc<dyn Fn(&Record, &mut ValidationError) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct CallbackEntry {
    pub(crate) kind: CallbackKind,
    /// Transaction actions an after-commit/rollback callback fires for;
    /// empty means all.
    pub(crate) on: Vec<TransactionAction>,
    pub(crate) callback: Callback,
}

impl CallbackEntry {
    fn applies(&self, kind: CallbackKind, action: Option<TransactionAction>) -> bool {
        self.kind == kind
            && (self.on.is_empty() || action.is_some_and(|a| self.on.contains(&a)))
    }
}

/// Everything the session layer knows about one model.
///
/// # Example
///
/// ```
/// use sqlrecord_core::{ColumnDef, Reflection, SqlType};
/// use sqlrecord_session::ModelSchema;
///
/// let post = ModelSchema::new("Post", "posts")
///     .column(ColumnDef::new("title", SqlType::Text).not_null())
///     .column(ColumnDef::new("author_id", SqlType::BigInt))
///     .locking()
///     .association(Reflection::belongs_to("author", "Author"))
///     .validates_presence_of("title");
///
/// assert_eq!(post.column_names(), vec!["id", "title", "author_id", "lock_version"]);
/// assert_eq!(post.locking_column(), Some("lock_version"));
/// ```
#[derive(Clone)]
pub struct ModelSchema {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    locking_column: Option<String>,
    reflections: Vec<Reflection>,
    callbacks: Vec<CallbackEntry>,
    validators: Vec<Validator>,
}

impl ModelSchema {
    /// A model on `table` with an integer `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            columns: vec![ColumnDef::new("id", SqlType::BigInt)],
            locking_column: None,
            reflections: Vec::new(),
            callbacks: Vec::new(),
            validators: Vec::new(),
        }
    }

    // ==================== Builders ====================

    /// Rename the primary key column.
    #[must_use]
    pub fn primary_key(mut self, column: &str) -> Self {
        if let Some(pk) = self.columns.iter_mut().find(|c| c.name == self.primary_key) {
            pk.name = column.to_string();
        }
        self.primary_key = column.to_string();
        self
    }

    /// Declare a column. Redeclaring a column replaces it.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Enable optimistic locking on `lock_version`.
    #[must_use]
    pub fn locking(self) -> Self {
        self.with_locking_column(DEFAULT_LOCKING_COLUMN)
    }

    /// Enable optimistic locking on `column`, declaring it if needed.
    #[must_use]
    pub fn with_locking_column(mut self, column: &str) -> Self {
        if self.column_index(column).is_none() {
            self.columns.push(
                ColumnDef::new(column, SqlType::Integer)
                    .not_null()
                    .default_value(0_i64),
            );
        }
        self.locking_column = Some(column.to_string());
        self
    }

    /// Declare an association.
    #[must_use]
    pub fn association(mut self, reflection: Reflection) -> Self {
        self.reflections.retain(|r| r.name != reflection.name);
        self.reflections.push(reflection);
        self
    }

    /// Register a lifecycle callback. Callbacks of one kind run in the order
    /// they were declared.
    #[must_use]
    pub fn callback<F>(mut self, kind: CallbackKind, f: F) -> Self
    where
        F: Fn(&mut ConnectionHandle, &Record) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(CallbackEntry {
            kind,
            on: Vec::new(),
            callback: Arc::new(f),
        });
        self
    }

    /// Register an after-commit callback that fires only for `on` actions.
    #[must_use]
    pub fn after_commit_on<F>(mut self, on: &[TransactionAction], f: F) -> Self
    where
        F: Fn(&mut ConnectionHandle, &Record) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(CallbackEntry {
            kind: CallbackKind::AfterCommit,
            on: on.to_vec(),
            callback: Arc::new(f),
        });
        self
    }

    #[must_use]
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Record, &mut ValidationError) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(f));
        self
    }

    /// Fail validation when `column` is NULL or blank text.
    #[must_use]
    pub fn validates_presence_of(self, column: &str) -> Self {
        let column = column.to_string();
        self.validate(move |record, errors| {
            let blank = match record.get(&column) {
                Ok(Value::Null) | Err(_) => true,
                Ok(Value::Text(s)) => s.trim().is_empty(),
                Ok(_) => false,
            };
            if blank {
                errors.add(column.as_str(), "can't be blank");
            }
        })
    }

    // ==================== Accessors ====================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key_name(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub(crate) fn primary_key_index(&self) -> usize {
        self.column_index(&self.primary_key).unwrap_or(0)
    }

    pub fn locking_column(&self) -> Option<&str> {
        self.locking_column.as_deref()
    }

    pub(crate) fn locking_index(&self) -> Option<usize> {
        self.locking_column
            .as_deref()
            .and_then(|c| self.column_index(c))
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    pub fn reflection(&self, name: &str) -> Result<&Reflection> {
        self.reflections
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::AssociationNotFound {
                model: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// A relation over every row of this model's table.
    pub fn all(&self) -> Relation {
        Relation::new(self.table.as_str()).with_primary_key(self.primary_key.as_str())
    }

    pub(crate) fn callbacks_for(
        &self,
        kind: CallbackKind,
        action: Option<TransactionAction>,
    ) -> Vec<Callback> {
        self.callbacks
            .iter()
            .filter(|c| c.applies(kind, action))
            .map(|c| Arc::clone(&c.callback))
            .collect()
    }

    pub(crate) fn has_callbacks(&self, kind: CallbackKind) -> bool {
        self.callbacks.iter().any(|c| c.kind == kind)
    }

    pub(crate) fn validators(&self) -> &[Validator] {
        &self.validators
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("columns", &self.column_names())
            .field("locking_column", &self.locking_column)
            .field("reflections", &self.reflections.len())
            .field("callbacks", &self.callbacks.len())
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// Registered models, keyed by model name and by table.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    models: HashMap<String, Arc<ModelSchema>>,
    tables: HashMap<String, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any model with the same name.
    pub fn register(&mut self, schema: ModelSchema) -> Arc<ModelSchema> {
        let schema = Arc::new(schema);
        self.tables
            .insert(schema.table().to_string(), schema.name().to_string());
        self.models
            .insert(schema.name().to_string(), Arc::clone(&schema));
        schema
    }

    pub fn model(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown model '{name}'")))
    }

    pub fn model_for_table(&self, table: &str) -> Result<Arc<ModelSchema>> {
        self.tables
            .get(table)
            .and_then(|name| self.models.get(name))
            .cloned()
            .ok_or_else(|| Error::config(format!("no model registered for table '{table}'")))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Check that every association points at a registered model.
    pub fn validate(&self) -> Result<()> {
        for schema in self.models.values() {
            for reflection in schema.reflections() {
                if !self.models.contains_key(&reflection.target) {
                    return Err(Error::config(format!(
                        "{}.{} points at unknown model '{}'",
                        schema.name(),
                        reflection.name,
                        reflection.target
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrecord_core::Dialect;

    fn post() -> ModelSchema {
        ModelSchema::new("Post", "posts")
            .column(ColumnDef::new("title", SqlType::Text))
            .association(Reflection::belongs_to("author", "Author"))
    }

    #[test]
    fn test_primary_key_rename() {
        let schema = ModelSchema::new("Tag", "tags").primary_key("tag_id");
        assert_eq!(schema.column_names(), vec!["tag_id"]);
        assert_eq!(schema.primary_key_name(), "tag_id");
        assert_eq!(
            schema.all().to_sql(Dialect::Sqlite).0,
            "SELECT \"tags\".* FROM \"tags\""
        );
    }

    #[test]
    fn test_locking_declares_column_once() {
        let schema = ModelSchema::new("Person", "people")
            .column(ColumnDef::new("lock_version", SqlType::BigInt))
            .locking();
        assert_eq!(schema.column_names(), vec!["id", "lock_version"]);
        assert_eq!(schema.locking_index(), Some(1));
    }

    #[test]
    fn test_custom_locking_column() {
        let schema = ModelSchema::new("Invoice", "invoices").with_locking_column("revision");
        assert_eq!(schema.locking_column(), Some("revision"));
        assert_eq!(schema.column_names(), vec!["id", "revision"]);
        assert_eq!(ModelSchema::new("Tag", "tags").locking_column(), None);
    }

    #[test]
    fn test_reflection_lookup() {
        let schema = post();
        assert!(schema.reflection("author").is_ok());
        let err = schema.reflection("comments").unwrap_err();
        assert!(matches!(err, Error::AssociationNotFound { .. }));
    }

    #[test]
    fn test_callback_filters() {
        let schema = post()
            .callback(CallbackKind::BeforeSave, |_, _| Ok(()))
            .after_commit_on(&[TransactionAction::Create], |_, _| Ok(()))
            .callback(CallbackKind::AfterCommit, |_, _| Ok(()));

        assert_eq!(schema.callbacks_for(CallbackKind::BeforeSave, None).len(), 1);
        assert_eq!(
            schema
                .callbacks_for(CallbackKind::AfterCommit, Some(TransactionAction::Create))
                .len(),
            2
        );
        assert_eq!(
            schema
                .callbacks_for(CallbackKind::AfterCommit, Some(TransactionAction::Update))
                .len(),
            1
        );
        assert!(schema.has_callbacks(CallbackKind::AfterCommit));
        assert!(!schema.has_callbacks(CallbackKind::AfterRollback));
    }

    #[test]
    fn test_action_merge() {
        use TransactionAction::{Create, Destroy, Update};
        assert_eq!(Create.merge(Update), Create);
        assert_eq!(Update.merge(Destroy), Destroy);
        assert_eq!(Update.merge(Update), Update);
        assert_eq!(Update.merge(Create), Create);
    }

    #[test]
    fn test_registry() {
        let mut registry = Registry::new();
        registry.register(post());
        assert!(registry.model("Post").is_ok());
        assert_eq!(registry.model_for_table("posts").unwrap().name(), "Post");
        assert!(registry.model_for_table("comments").is_err());

        // Post.author points at an unregistered model.
        assert!(registry.validate().is_err());
        registry.register(ModelSchema::new("Author", "authors"));
        assert!(registry.validate().is_ok());
        assert_eq!(registry.len(), 2);
    }
}
