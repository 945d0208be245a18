//! Immutable, copy-on-write query descriptors.
//!
//! A [`Relation`] records the clauses of a SELECT against one table. Every
//! builder method returns a new relation and leaves the receiver untouched;
//! clause storage is shared behind an `Arc` and only copied when a derived
//! relation changes it, so chaining off a base scope is cheap.
//!
//! Relations only build SQL. Executing them (load, count, pluck, ...) is the
//! session layer's job, because it needs a connection and model metadata.

use crate::clause::{LockMode, OrderBy, OrderDirection, Part};
use crate::expr::{BinaryOp, Expr};
use crate::include::{Include, merge_into};
use crate::join::Join;
use sqlrecord_core::{Dialect, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
struct Parts {
    select: Vec<String>,
    distinct: bool,
    wheres: Vec<Expr>,
    joins: Vec<Join>,
    order: Vec<OrderBy>,
    reverse_order: bool,
    group: Vec<String>,
    having: Vec<Expr>,
    limit: Option<u64>,
    offset: Option<u64>,
    lock: Option<LockMode>,
    includes: Vec<Include>,
    readonly: bool,
    none: bool,
    dynamic_includes: Option<bool>,
}

/// A lazily built SELECT over one table.
///
/// # Example
///
/// ```
/// use sqlrecord_core::Dialect;
/// use sqlrecord_query::{OrderBy, Relation};
///
/// let base = Relation::new("posts").filter_eq("published", true);
/// let recent = base.order(OrderBy::desc("created_at")).limit(10);
///
/// let (sql, params) = recent.to_sql(Dialect::Sqlite);
/// assert_eq!(
///     sql,
///     "SELECT \"posts\".* FROM \"posts\" WHERE \"posts\".\"published\" = ?1 \
///      ORDER BY \"created_at\" DESC LIMIT 10"
/// );
/// assert_eq!(params.len(), 1);
///
/// // The base relation is unchanged.
/// assert!(base.order_values().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    table: String,
    primary_key: String,
    parts: Arc<Parts>,
}

impl Relation {
    /// A relation selecting every row of `table`, keyed by `id`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            parts: Arc::new(Parts::default()),
        }
    }

    /// Use a primary key other than `id` for default ordering and
    /// `update_all`/`delete_all` subqueries.
    #[must_use]
    pub fn with_primary_key(&self, column: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.primary_key = column.into();
        next
    }

    fn derive(&self, f: impl FnOnce(&mut Parts)) -> Self {
        let mut next = self.clone();
        f(Arc::make_mut(&mut next.parts));
        next
    }

    // ==================== Builders ====================

    /// Select specific columns or expressions. Plain identifiers are quoted
    /// and qualified with the table; anything else is passed through.
    #[must_use]
    pub fn select<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.derive(|p| p.select.extend(columns))
    }

    #[must_use]
    pub fn distinct(&self) -> Self {
        self.derive(|p| p.distinct = true)
    }

    /// Add a condition, ANDed with existing ones.
    #[must_use]
    pub fn filter(&self, expr: Expr) -> Self {
        self.derive(|p| p.wheres.push(expr))
    }

    /// OR a condition with everything filtered so far.
    #[must_use]
    pub fn or_filter(&self, expr: Expr) -> Self {
        self.derive(|p| {
            if p.wheres.is_empty() {
                p.wheres.push(expr);
            } else {
                let existing = Expr::all(std::mem::take(&mut p.wheres).into_iter().map(wrap_or)).paren();
                p.wheres.push(existing.or(expr.paren()));
            }
        })
    }

    /// `table.column = value`, or `IS NULL` when `value` is NULL.
    #[must_use]
    pub fn filter_eq(&self, column: &str, value: impl Into<Value>) -> Self {
        let expr = Expr::qualified(self.table.as_str(), column).eq(Expr::Literal(value.into()));
        self.filter(expr)
    }

    /// `table.column IN (values...)`; an empty list matches nothing.
    #[must_use]
    pub fn filter_in(&self, column: &str, values: Vec<Value>) -> Self {
        let expr = Expr::qualified(self.table.as_str(), column).in_list(values);
        self.filter(expr)
    }

    #[must_use]
    pub fn joins(&self, join: Join) -> Self {
        self.derive(|p| p.joins.push(join))
    }

    /// Append an ORDER BY term.
    #[must_use]
    pub fn order(&self, order: OrderBy) -> Self {
        self.derive(|p| p.order.push(order))
    }

    /// Replace every ORDER BY term.
    #[must_use]
    pub fn reorder(&self, order: OrderBy) -> Self {
        self.derive(|p| {
            p.order = vec![order];
            p.reverse_order = false;
        })
    }

    /// Flip every ORDER BY term; with no order, sort by primary key
    /// descending.
    #[must_use]
    pub fn reverse_order(&self) -> Self {
        self.derive(|p| p.reverse_order = !p.reverse_order)
    }

    #[must_use]
    pub fn group(&self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.derive(|p| p.group.push(column))
    }

    #[must_use]
    pub fn having(&self, expr: Expr) -> Self {
        self.derive(|p| p.having.push(expr))
    }

    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        self.derive(|p| p.limit = Some(n))
    }

    #[must_use]
    pub fn offset(&self, n: u64) -> Self {
        self.derive(|p| p.offset = Some(n))
    }

    /// Lock selected rows with `FOR UPDATE` where the dialect supports it.
    #[must_use]
    pub fn lock(&self) -> Self {
        self.derive(|p| p.lock = Some(LockMode::Update))
    }

    /// Lock with a custom clause (`"FOR SHARE"`, `"FOR UPDATE NOWAIT"`).
    #[must_use]
    pub fn lock_with(&self, clause: impl Into<String>) -> Self {
        let clause = clause.into();
        self.derive(|p| p.lock = Some(LockMode::Custom(clause)))
    }

    /// Preload an association (dotted paths nest) when records load.
    #[must_use]
    pub fn includes(&self, include: impl Into<Include>) -> Self {
        let include = include.into();
        self.derive(|p| merge_into(&mut p.includes, include))
    }

    /// Mark loaded records readonly.
    #[must_use]
    pub fn readonly(&self) -> Self {
        self.derive(|p| p.readonly = true)
    }

    /// A relation that returns no rows without querying.
    #[must_use]
    pub fn none(&self) -> Self {
        self.derive(|p| p.none = true)
    }

    /// Override the connection's dynamic-includes setting for records this
    /// relation loads.
    #[must_use]
    pub fn dynamic_includes(&self, enabled: bool) -> Self {
        self.derive(|p| p.dynamic_includes = Some(enabled))
    }

    /// Remove one kind of clause.
    #[must_use]
    pub fn unscope(&self, part: Part) -> Self {
        self.derive(|p| match part {
            Part::Select => {
                p.select.clear();
                p.distinct = false;
            }
            Part::Where => p.wheres.clear(),
            Part::Joins => p.joins.clear(),
            Part::Order => {
                p.order.clear();
                p.reverse_order = false;
            }
            Part::Group => p.group.clear(),
            Part::Having => p.having.clear(),
            Part::Limit => p.limit = None,
            Part::Offset => p.offset = None,
            Part::Lock => p.lock = None,
            Part::Includes => p.includes.clear(),
        })
    }

    /// Combine with another relation: list clauses are appended, single
    /// valued clauses from `other` win when set.
    #[must_use]
    pub fn merge(&self, other: &Relation) -> Self {
        let o = &other.parts;
        self.derive(|p| {
            p.select.extend(o.select.iter().cloned());
            p.distinct |= o.distinct;
            p.wheres.extend(o.wheres.iter().cloned());
            p.joins.extend(o.joins.iter().cloned());
            p.order.extend(o.order.iter().cloned());
            p.reverse_order ^= o.reverse_order;
            p.group.extend(o.group.iter().cloned());
            p.having.extend(o.having.iter().cloned());
            p.limit = o.limit.or(p.limit);
            p.offset = o.offset.or(p.offset);
            p.lock = o.lock.clone().or_else(|| p.lock.take());
            for include in &o.includes {
                merge_into(&mut p.includes, include.clone());
            }
            p.readonly |= o.readonly;
            p.none |= o.none;
            p.dynamic_includes = o.dynamic_includes.or(p.dynamic_includes);
        })
    }

    /// Order by primary key ascending unless an order is already set.
    #[must_use]
    pub fn ordered_by_primary_key(&self) -> Self {
        if self.parts.order.is_empty() {
            self.order(OrderBy::new(
                Expr::qualified(self.table.as_str(), self.primary_key.as_str()),
                OrderDirection::Asc,
            ))
        } else {
            self.clone()
        }
    }

    // ==================== Accessors ====================

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn where_values(&self) -> &[Expr] {
        &self.parts.wheres
    }

    pub fn order_values(&self) -> &[OrderBy] {
        &self.parts.order
    }

    pub fn include_values(&self) -> &[Include] {
        &self.parts.includes
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.parts.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.parts.offset
    }

    pub fn lock_value(&self) -> Option<&LockMode> {
        self.parts.lock.as_ref()
    }

    pub fn is_readonly(&self) -> bool {
        self.parts.readonly
    }

    pub fn is_none(&self) -> bool {
        self.parts.none
    }

    pub fn dynamic_includes_value(&self) -> Option<bool> {
        self.parts.dynamic_includes
    }

    /// Whether two relations share clause storage (no copy happened).
    pub fn shares_parts_with(&self, other: &Relation) -> bool {
        Arc::ptr_eq(&self.parts, &other.parts)
    }

    // ==================== SQL Generation ====================

    fn quoted_table(&self, dialect: Dialect) -> String {
        dialect.quote_identifier(&self.table)
    }

    fn select_list(&self, dialect: Dialect) -> String {
        if self.parts.select.is_empty() {
            return format!("{}.*", self.quoted_table(dialect));
        }
        self.parts
            .select
            .iter()
            .map(|c| self.column_sql(dialect, c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn column_sql(&self, dialect: Dialect, column: &str) -> String {
        if is_plain_identifier(column) {
            format!(
                "{}.{}",
                self.quoted_table(dialect),
                dialect.quote_identifier(column)
            )
        } else {
            column.to_string()
        }
    }

    fn effective_order(&self) -> Vec<OrderBy> {
        let p = &self.parts;
        if !p.reverse_order {
            return p.order.clone();
        }
        if p.order.is_empty() {
            vec![OrderBy::new(
                Expr::qualified(self.table.as_str(), self.primary_key.as_str()),
                OrderDirection::Desc,
            )]
        } else {
            p.order.iter().map(OrderBy::reversed).collect()
        }
    }

    /// FROM, JOIN and WHERE, with a leading space.
    fn from_where(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let p = &self.parts;
        let mut sql = format!(" FROM {}", self.quoted_table(dialect));
        for join in &p.joins {
            sql.push_str(&join.build(dialect, params));
        }
        sql.push_str(&self.where_sql(dialect, params));
        sql
    }

    fn where_sql(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let p = &self.parts;
        if p.none {
            return " WHERE 1 = 0".to_string();
        }
        if p.wheres.is_empty() {
            return String::new();
        }
        let conditions: Vec<String> = p
            .wheres
            .iter()
            .map(|w| wrap_or(w.clone()).build(dialect, params))
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }

    fn group_having(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let p = &self.parts;
        let mut sql = String::new();
        if !p.group.is_empty() {
            let cols: Vec<String> = p.group.iter().map(|c| self.column_sql(dialect, c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&cols.join(", "));
        }
        if !p.having.is_empty() {
            let conds: Vec<String> = p.having.iter().map(|h| h.build(dialect, params)).collect();
            sql.push_str(" HAVING ");
            sql.push_str(&conds.join(" AND "));
        }
        sql
    }

    fn limit_offset(&self) -> String {
        let p = &self.parts;
        let mut sql = String::new();
        if let Some(n) = p.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = p.offset {
            if p.limit.is_none() {
                // SQLite requires LIMIT before OFFSET
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {}", n));
        }
        sql
    }

    fn select_with(&self, dialect: Dialect, list: &str, params: &mut Vec<Value>) -> String {
        let p = &self.parts;
        let mut sql = String::from("SELECT ");
        if p.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(list);
        sql.push_str(&self.from_where(dialect, params));
        sql.push_str(&self.group_having(dialect, params));

        let order = self.effective_order();
        if !order.is_empty() {
            let terms: Vec<String> = order.iter().map(|o| o.build(dialect, params)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        sql.push_str(&self.limit_offset());

        if let Some(lock) = &p.lock {
            if dialect.supports_lock_clause() {
                sql.push(' ');
                sql.push_str(lock.as_sql());
            }
        }
        sql
    }

    /// Build the SELECT statement and its bound parameters.
    pub fn to_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let list = self.select_list(dialect);
        let sql = self.select_with(dialect, &list, &mut params);
        (sql, params)
    }

    /// `SELECT col, ...` for plucking values; ignores any `select` clause.
    pub fn pluck_sql(&self, dialect: Dialect, columns: &[&str]) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let list = columns
            .iter()
            .map(|c| self.column_sql(dialect, c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = self.select_with(dialect, &list, &mut params);
        (sql, params)
    }

    /// `SELECT COUNT(*)` honoring DISTINCT, GROUP BY, LIMIT and OFFSET by
    /// counting a subquery when any of them is present.
    pub fn count_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let p = &self.parts;
        let mut params = Vec::new();
        let needs_subquery = p.distinct
            || !p.group.is_empty()
            || p.limit.is_some()
            || p.offset.is_some();
        let sql = if needs_subquery {
            let inner = self.unscope(Part::Order).unscope(Part::Lock);
            let list = inner.select_list(dialect);
            let inner_sql = inner.select_with(dialect, &list, &mut params);
            format!("SELECT COUNT(*) FROM ({}) subquery_for_count", inner_sql)
        } else {
            format!("SELECT COUNT(*){}", self.from_where(dialect, &mut params))
        };
        (sql, params)
    }

    /// `SELECT 1 AS one ... LIMIT 1`.
    pub fn exists_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let probe = self.unscope(Part::Order).unscope(Part::Lock).limit(1);
        let sql = probe.select_with(dialect, "1 AS one", &mut params);
        (sql, params)
    }

    fn needs_key_subquery(&self) -> bool {
        let p = &self.parts;
        !p.joins.is_empty()
            || p.limit.is_some()
            || p.offset.is_some()
            || !p.order.is_empty()
            || !p.group.is_empty()
    }

    fn key_subquery_where(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let inner = self.unscope(Part::Select).unscope(Part::Lock);
        let list = inner.column_sql(dialect, &self.primary_key);
        let inner_sql = inner.select_with(dialect, &list, params);
        format!(
            " WHERE {}.{} IN ({})",
            self.quoted_table(dialect),
            dialect.quote_identifier(&self.primary_key),
            inner_sql
        )
    }

    /// `UPDATE ... SET` every matched row in one statement.
    ///
    /// Assignments are `(column, expression)` so callers can write
    /// `counter = counter + 1` as well as plain values.
    pub fn update_all_sql(
        &self,
        dialect: Dialect,
        assignments: &[(String, Expr)],
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sets: Vec<String> = assignments
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
            self.quoted_table(dialect),
            sets.join(", ")
        );
        if self.needs_key_subquery() {
            sql.push_str(&self.key_subquery_where(dialect, &mut params));
        } else {
            sql.push_str(&self.where_sql(dialect, &mut params));
        }
        (sql, params)
    }

    /// `DELETE` every matched row in one statement.
    pub fn delete_all_sql(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quoted_table(dialect));
        if self.needs_key_subquery() {
            sql.push_str(&self.key_subquery_where(dialect, &mut params));
        } else {
            sql.push_str(&self.where_sql(dialect, &mut params));
        }
        (sql, params)
    }
}

/// OR terms need parentheses once they are ANDed with anything else.
fn wrap_or(expr: Expr) -> Expr {
    match expr {
        Expr::Binary {
            op: BinaryOp::Or, ..
        } => expr.paren(),
        other => other,
    }
}

fn is_plain_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Join;

    fn posts() -> Relation {
        Relation::new("posts")
    }

    #[test]
    fn test_default_select() {
        let (sql, params) = posts().to_sql(Dialect::Sqlite);
        assert_eq!(sql, "SELECT \"posts\".* FROM \"posts\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_builders_never_mutate_receiver() {
        let base = posts().filter_eq("author_id", 1_i64);
        let limited = base.limit(5);
        assert_eq!(base.limit_value(), None);
        assert_eq!(limited.limit_value(), Some(5));
        assert_eq!(base.where_values().len(), 1);

        let copy = base.clone();
        assert!(copy.shares_parts_with(&base));
        assert!(!limited.shares_parts_with(&base));
    }

    #[test]
    fn test_full_select() {
        let rel = posts()
            .select(["id", "title", "COUNT(*) AS n"])
            .distinct()
            .joins(Join::inner(
                "authors",
                Expr::qualified("authors", "id").eq(Expr::qualified("posts", "author_id")),
            ))
            .filter(Expr::qualified("authors", "name").eq("ann"))
            .group("id")
            .having(Expr::count_star().gt(1))
            .order(OrderBy::desc("title"))
            .limit(3)
            .offset(6);
        let (sql, params) = rel.to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT DISTINCT \"posts\".\"id\", \"posts\".\"title\", COUNT(*) AS n \
             FROM \"posts\" INNER JOIN \"authors\" ON \"authors\".\"id\" = \"posts\".\"author_id\" \
             WHERE \"authors\".\"name\" = ?1 GROUP BY \"posts\".\"id\" HAVING COUNT(*) > ?2 \
             ORDER BY \"title\" DESC LIMIT 3 OFFSET 6"
        );
        assert_eq!(params, vec![Value::Text("ann".into()), Value::Int(1)]);
    }

    #[test]
    fn test_or_filter_wraps_existing_conditions() {
        let rel = posts()
            .filter_eq("a", 1_i64)
            .filter_eq("b", 2_i64)
            .or_filter(Expr::col("c").eq(3));
        let (sql, _) = rel.to_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT \"posts\".* FROM \"posts\" WHERE ((\"posts\".\"a\" = ?1 AND \"posts\".\"b\" = ?2) OR (\"c\" = ?3))"
        );
    }

    #[test]
    fn test_filter_eq_null_and_in() {
        let (sql, params) = posts()
            .filter_eq("deleted_at", Value::Null)
            .filter_in("id", vec![Value::BigInt(1), Value::BigInt(2)])
            .to_sql(Dialect::Postgres);
        assert_eq!(
            sql,
            "SELECT \"posts\".* FROM \"posts\" WHERE \"posts\".\"deleted_at\" IS NULL AND \"posts\".\"id\" IN ($1, $2)"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_reverse_order() {
        let (sql, _) = posts().reverse_order().to_sql(Dialect::Sqlite);
        assert!(sql.ends_with("ORDER BY \"posts\".\"id\" DESC"));

        let (sql, _) = posts()
            .order(OrderBy::asc("title"))
            .reverse_order()
            .to_sql(Dialect::Sqlite);
        assert!(sql.ends_with("ORDER BY \"title\" DESC"));

        let (sql, _) = posts()
            .order(OrderBy::asc("title"))
            .reorder(OrderBy::asc("id"))
            .to_sql(Dialect::Sqlite);
        assert!(sql.ends_with("ORDER BY \"id\" ASC"));
    }

    #[test]
    fn test_lock_clause_per_dialect() {
        let rel = posts().filter_eq("id", 1_i64).lock();
        assert!(!rel.to_sql(Dialect::Sqlite).0.contains("FOR UPDATE"));
        assert!(rel.to_sql(Dialect::Postgres).0.ends_with(" FOR UPDATE"));
        let custom = posts().lock_with("FOR SHARE");
        assert!(custom.to_sql(Dialect::Mysql).0.ends_with(" FOR SHARE"));
    }

    #[test]
    fn test_none_matches_nothing() {
        let rel = posts().filter_eq("a", 1_i64).none();
        assert!(rel.is_none());
        assert_eq!(
            rel.to_sql(Dialect::Sqlite).0,
            "SELECT \"posts\".* FROM \"posts\" WHERE 1 = 0"
        );
    }

    #[test]
    fn test_unscope() {
        let rel = posts()
            .filter_eq("a", 1_i64)
            .order(OrderBy::asc("a"))
            .limit(1)
            .unscope(Part::Where)
            .unscope(Part::Order)
            .unscope(Part::Limit);
        assert_eq!(rel.to_sql(Dialect::Sqlite).0, "SELECT \"posts\".* FROM \"posts\"");
    }

    #[test]
    fn test_merge() {
        let a = posts().filter_eq("a", 1_i64).limit(10).includes("comments");
        let b = posts()
            .filter_eq("b", 2_i64)
            .limit(2)
            .includes("comments.author")
            .readonly();
        let merged = a.merge(&b);
        assert_eq!(merged.where_values().len(), 2);
        assert_eq!(merged.limit_value(), Some(2));
        assert!(merged.is_readonly());
        assert_eq!(merged.include_values().len(), 1);
        assert_eq!(merged.include_values()[0].children.len(), 1);
    }

    #[test]
    fn test_count_sql() {
        let (sql, params) = posts().filter_eq("a", 1_i64).order(OrderBy::asc("a")).count_sql(Dialect::Sqlite);
        assert_eq!(sql, "SELECT COUNT(*) FROM \"posts\" WHERE \"posts\".\"a\" = ?1");
        assert_eq!(params.len(), 1);

        let (sql, _) = posts().limit(5).count_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM (SELECT \"posts\".* FROM \"posts\" LIMIT 5) subquery_for_count"
        );
    }

    #[test]
    fn test_exists_sql() {
        let (sql, _) = posts().filter_eq("a", 1_i64).exists_sql(Dialect::Sqlite);
        assert_eq!(
            sql,
            "SELECT 1 AS one FROM \"posts\" WHERE \"posts\".\"a\" = ?1 LIMIT 1"
        );
    }

    #[test]
    fn test_update_all_sql() {
        let (sql, params) = posts().filter_eq("author_id", 7_i64).update_all_sql(
            Dialect::Sqlite,
            &[
                ("title".to_string(), Expr::lit("x")),
                ("views".to_string(), Expr::col("views").add(1)),
            ],
        );
        assert_eq!(
            sql,
            "UPDATE \"posts\" SET \"title\" = ?1, \"views\" = \"views\" + ?2 WHERE \"posts\".\"author_id\" = ?3"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_update_all_with_limit_uses_key_subquery() {
        let (sql, _) = posts()
            .order(OrderBy::asc("id"))
            .limit(2)
            .update_all_sql(Dialect::Sqlite, &[("a".to_string(), Expr::lit(1))]);
        assert_eq!(
            sql,
            "UPDATE \"posts\" SET \"a\" = ?1 WHERE \"posts\".\"id\" IN \
             (SELECT \"posts\".\"id\" FROM \"posts\" ORDER BY \"id\" ASC LIMIT 2)"
        );
    }

    #[test]
    fn test_delete_all_sql() {
        let (sql, params) = posts().filter_eq("a", 1_i64).delete_all_sql(Dialect::Sqlite);
        assert_eq!(sql, "DELETE FROM \"posts\" WHERE \"posts\".\"a\" = ?1");
        assert_eq!(params, vec![Value::BigInt(1)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let (sql, _) = posts().offset(3).to_sql(Dialect::Sqlite);
        assert!(sql.ends_with(" LIMIT -1 OFFSET 3"));
    }

    #[test]
    fn test_pluck_sql() {
        let (sql, _) = posts().pluck_sql(Dialect::Sqlite, &["id", "title"]);
        assert_eq!(sql, "SELECT \"posts\".\"id\", \"posts\".\"title\" FROM \"posts\"");
    }

    #[test]
    fn test_ordered_by_primary_key() {
        let rel = posts().with_primary_key("uid").ordered_by_primary_key();
        assert!(rel.to_sql(Dialect::Sqlite).0.ends_with("ORDER BY \"posts\".\"uid\" ASC"));
        let already = posts().order(OrderBy::desc("x")).ordered_by_primary_key();
        assert_eq!(already.order_values().len(), 1);
    }
}
