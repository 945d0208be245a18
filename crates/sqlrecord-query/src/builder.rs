//! Statement builders for INSERT, UPDATE and DELETE against one row set.
//!
//! Records persist through these: the session layer fills in columns from a
//! record's attributes and adds the primary key (and lock version) predicates.

use crate::expr::Expr;
use sqlrecord_core::{Dialect, Value};

/// INSERT statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBuilder {
    table: String,
    values: Vec<(String, Value)>,
    returning: Option<String>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
            returning: None,
        }
    }

    /// Insert `value` into `column`.
    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }

    /// Insert every `(column, value)` pair.
    #[must_use]
    pub fn values<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        self.values
            .extend(pairs.into_iter().map(|(c, v)| (c.into(), v)));
        self
    }

    /// Append `RETURNING column` on dialects that support it.
    #[must_use]
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    /// Build the INSERT SQL and parameters.
    ///
    /// With no columns this inserts a row of defaults.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote_identifier(&self.table);
        let mut sql = if self.values.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<String> = self
                .values
                .iter()
                .map(|(c, _)| dialect.quote_identifier(c))
                .collect();
            let placeholders: Vec<String> = (1..=self.values.len())
                .map(|i| dialect.placeholder(i))
                .collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        if let Some(column) = &self.returning {
            if dialect == Dialect::Postgres {
                sql.push_str(" RETURNING ");
                sql.push_str(&dialect.quote_identifier(column));
            }
        }

        let params = self.values.iter().map(|(_, v)| v.clone()).collect();
        (sql, params)
    }
}

/// UPDATE statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, Expr)>,
    wheres: Vec<Expr>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            wheres: Vec::new(),
        }
    }

    /// `column = value`
    #[must_use]
    pub fn set(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_expr(column, Expr::Literal(value.into()))
    }

    /// `column = expr`, e.g. `views = views + 1`.
    #[must_use]
    pub fn set_expr(mut self, column: impl Into<String>, expr: Expr) -> Self {
        self.sets.push((column.into(), expr));
        self
    }

    /// Add a WHERE condition, ANDed with the others.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.wheres.push(expr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Build the UPDATE SQL and parameters. SET values bind before WHERE
    /// values.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sets: Vec<String> = self
            .sets
            .iter()
            .map(|(column, expr)| {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(column),
                    expr.build(dialect, &mut params)
                )
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            sets.join(", ")
        );
        push_where(&mut sql, &self.wheres, dialect, &mut params);
        (sql, params)
    }
}

/// DELETE statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteBuilder {
    table: String,
    wheres: Vec<Expr>,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            wheres: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.wheres.push(expr);
        self
    }

    /// Build the DELETE SQL and parameters.
    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));
        push_where(&mut sql, &self.wheres, dialect, &mut params);
        (sql, params)
    }
}

fn push_where(sql: &mut String, wheres: &[Expr], dialect: Dialect, params: &mut Vec<Value>) {
    if wheres.is_empty() {
        return;
    }
    let conditions: Vec<String> = wheres.iter().map(|w| w.build(dialect, params)).collect();
    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert() {
        let (sql, params) = InsertBuilder::new("posts")
            .value("title", "Hello")
            .value("author_id", 3_i64)
            .build(Dialect::Sqlite);
        assert_eq!(
            sql,
            "INSERT INTO \"posts\" (\"title\", \"author_id\") VALUES (?1, ?2)"
        );
        assert_eq!(
            params,
            vec![Value::Text("Hello".into()), Value::BigInt(3)]
        );
    }

    #[test]
    fn test_insert_default_values() {
        let (sql, params) = InsertBuilder::new("tags").build(Dialect::Sqlite);
        assert_eq!(sql, "INSERT INTO \"tags\" DEFAULT VALUES");
        assert!(params.is_empty());
    }

    #[test]
    fn test_insert_returning_only_on_postgres() {
        let insert = InsertBuilder::new("tags").value("name", "a").returning("id");
        assert!(insert.build(Dialect::Postgres).0.ends_with(" RETURNING \"id\""));
        assert!(!insert.build(Dialect::Sqlite).0.contains("RETURNING"));
    }

    #[test]
    fn test_update_with_lock_predicate() {
        let (sql, params) = UpdateBuilder::new("people")
            .set("name", "Ann")
            .set("lock_version", 2_i64)
            .filter(Expr::col("id").eq(Value::BigInt(1)))
            .filter(Expr::col("lock_version").eq(Value::BigInt(1)))
            .build(Dialect::Postgres);
        assert_eq!(
            sql,
            "UPDATE \"people\" SET \"name\" = $1, \"lock_version\" = $2 WHERE \"id\" = $3 AND \"lock_version\" = $4"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_update_expression() {
        let (sql, _) = UpdateBuilder::new("posts")
            .set_expr("views", Expr::col("views").add(5))
            .build(Dialect::Mysql);
        assert_eq!(sql, "UPDATE `posts` SET `views` = `views` + ?");
    }

    #[test]
    fn test_delete() {
        let (sql, params) = DeleteBuilder::new("comments")
            .filter(Expr::col("post_id").in_list(vec![1_i64, 2]))
            .build(Dialect::Sqlite);
        assert_eq!(sql, "DELETE FROM \"comments\" WHERE \"post_id\" IN (?1, ?2)");
        assert_eq!(params.len(), 2);
    }
}
