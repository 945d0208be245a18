//! JOIN clause types.

use crate::expr::Expr;
use sqlrecord_core::{Dialect, Value};

/// A JOIN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: String,
    /// Optional table alias
    pub alias: Option<String>,
    /// ON condition
    pub on: Expr,
}

/// Types of SQL joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

impl Join {
    /// Create an INNER JOIN.
    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self {
            join_type: JoinType::Left,
            table: table.into(),
            alias: None,
            on,
        }
    }

    /// Set an alias for the joined table.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Generate the JOIN clause SQL, with a leading space.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let mut sql = format!(
            " {} {}",
            self.join_type.as_str(),
            dialect.quote_identifier(&self.table)
        );
        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(&dialect.quote_identifier(alias));
        }
        sql.push_str(" ON ");
        sql.push_str(&self.on.build(dialect, params));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_join() {
        let join = Join::inner(
            "authors",
            Expr::qualified("authors", "id").eq(Expr::qualified("posts", "author_id")),
        );
        let mut params = Vec::new();
        assert_eq!(
            join.build(Dialect::Sqlite, &mut params),
            " INNER JOIN \"authors\" ON \"authors\".\"id\" = \"posts\".\"author_id\""
        );
    }

    #[test]
    fn test_left_join_with_alias_binds_params() {
        let join = Join::left(
            "comments",
            Expr::qualified("c", "post_id")
                .eq(Expr::qualified("posts", "id"))
                .and(Expr::qualified("c", "approved").eq(true)),
        )
        .alias("c");
        let mut params = Vec::new();
        let sql = join.build(Dialect::Postgres, &mut params);
        assert!(sql.starts_with(" LEFT JOIN \"comments\" AS \"c\" ON"));
        assert!(sql.ends_with("\"c\".\"approved\" = $1"));
        assert_eq!(params, vec![Value::Bool(true)]);
    }
}
