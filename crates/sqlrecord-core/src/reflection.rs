//! Association and column metadata.
//!
//! A [`Reflection`] describes one association edge: which model it points
//! at, which keys join the two tables and what happens to dependents when the
//! owner is destroyed. The session layer reads reflections to build reader
//! queries, preload batches and writer statements.

use crate::types::SqlType;
use crate::value::Value;

/// The kind of association between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    /// The foreign key lives on this model's table.
    BelongsTo,
    /// One row on the target table points back at this model.
    HasOne,
    /// Many rows on the target table point back at this model.
    HasMany,
    /// Rows are linked through a join table.
    HasAndBelongsToMany,
}

impl AssociationKind {
    /// Whether the reader returns a collection.
    pub const fn is_collection(self) -> bool {
        matches!(
            self,
            AssociationKind::HasMany | AssociationKind::HasAndBelongsToMany
        )
    }
}

/// What to do with associated rows when the owner is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dependent {
    /// Leave associated rows alone.
    #[default]
    None,
    /// Load and destroy each associated record, running its callbacks.
    Destroy,
    /// Delete associated rows with one statement, skipping callbacks.
    DeleteAll,
    /// Set the foreign key of associated rows to NULL.
    Nullify,
    /// Refuse to destroy the owner while associated rows exist.
    Restrict,
}

/// Join-table description for has-and-belongs-to-many associations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    /// Join table name (e.g. `"posts_tags"`).
    pub table: String,
    /// Column pointing at the owner (e.g. `"post_id"`).
    pub owner_key: String,
    /// Column pointing at the target (e.g. `"tag_id"`).
    pub target_key: String,
}

/// Metadata for one association declared on a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    /// Association name as used by readers (`"comments"`, `"author"`).
    pub name: String,
    pub kind: AssociationKind,
    /// Name of the target model in the registry.
    pub target: String,
    /// Foreign key column. For belongs-to it lives on the owner; for
    /// has-one/has-many it lives on the target.
    pub foreign_key: String,
    /// Key the foreign key refers to (`"id"` by default).
    pub primary_key: String,
    pub join_table: Option<JoinTable>,
    pub dependent: Dependent,
    /// Name of the association on the target pointing back at the owner.
    pub inverse_of: Option<String>,
    /// Whether readers may batch-load this association for sibling records.
    pub dynamic_includes: bool,
}

impl Reflection {
    fn base(name: &str, kind: AssociationKind, target: &str, foreign_key: String) -> Self {
        Self {
            name: name.to_string(),
            kind,
            target: target.to_string(),
            foreign_key,
            primary_key: "id".to_string(),
            join_table: None,
            dependent: Dependent::None,
            inverse_of: None,
            dynamic_includes: true,
        }
    }

    /// `belongs_to :author` → foreign key `author_id` on the owner.
    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self::base(name, AssociationKind::BelongsTo, target, format!("{name}_id"))
    }

    /// `has_many :comments` with an explicit foreign key on the target.
    pub fn has_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self::base(
            name,
            AssociationKind::HasMany,
            target,
            foreign_key.to_string(),
        )
    }

    /// `has_one :profile` with an explicit foreign key on the target.
    pub fn has_one(name: &str, target: &str, foreign_key: &str) -> Self {
        Self::base(name, AssociationKind::HasOne, target, foreign_key.to_string())
    }

    /// `has_and_belongs_to_many :tags` through `join_table`.
    pub fn has_and_belongs_to_many(
        name: &str,
        target: &str,
        join_table: &str,
        owner_key: &str,
        target_key: &str,
    ) -> Self {
        let mut reflection = Self::base(
            name,
            AssociationKind::HasAndBelongsToMany,
            target,
            owner_key.to_string(),
        );
        reflection.join_table = Some(JoinTable {
            table: join_table.to_string(),
            owner_key: owner_key.to_string(),
            target_key: target_key.to_string(),
        });
        reflection
    }

    #[must_use]
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = column.to_string();
        if let Some(join) = self.join_table.as_mut() {
            join.owner_key = column.to_string();
        }
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    #[must_use]
    pub fn dependent(mut self, dependent: Dependent) -> Self {
        self.dependent = dependent;
        self
    }

    #[must_use]
    pub fn inverse_of(mut self, name: &str) -> Self {
        self.inverse_of = Some(name.to_string());
        self
    }

    /// Opt this association out of sibling batch loading.
    #[must_use]
    pub fn without_dynamic_includes(mut self) -> Self {
        self.dynamic_includes = false;
        self
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Column on the owner whose value selects the associated rows.
    pub fn owner_key(&self) -> &str {
        match self.kind {
            AssociationKind::BelongsTo => &self.foreign_key,
            _ => &self.primary_key,
        }
    }

    /// Column on the target matched against [`owner_key`](Self::owner_key).
    /// For join-table associations this is the target's primary key.
    pub fn target_key(&self) -> &str {
        match self.kind {
            AssociationKind::BelongsTo | AssociationKind::HasAndBelongsToMany => {
                &self.primary_key
            }
            AssociationKind::HasOne | AssociationKind::HasMany => &self.foreign_key,
        }
    }
}

/// A column declared on a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub default: Value,
}

impl ColumnDef {
    pub fn new(name: &str, sql_type: SqlType) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            nullable: true,
            default: Value::Null,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }
}
