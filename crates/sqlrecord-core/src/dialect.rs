//! SQL dialect differences that matter to generated SQL.

use serde::{Deserialize, Serialize};

/// SQL dialect for generating dialect-specific SQL.
///
/// Drivers report their dialect through
/// [`Connection::dialect`](crate::Connection::dialect); the query layer only
/// varies placeholder style, identifier quoting and row-lock support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite dialect (uses ?1, ?2 placeholders, no row locks)
    #[default]
    Sqlite,
    /// PostgreSQL dialect (uses $1, $2 placeholders)
    Postgres,
    /// MySQL dialect (uses ? placeholders)
    Mysql,
}

impl Dialect {
    /// Generate a placeholder for the given parameter index (1-based).
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// Quote an identifier for this dialect, doubling embedded quotes.
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres | Dialect::Sqlite => crate::quote_ident(name),
            Dialect::Mysql => crate::quote_ident_mysql(name),
        }
    }

    /// Whether `SELECT ... FOR UPDATE` style row locks are understood.
    ///
    /// SQLite locks the whole database on write, so lock clauses are dropped.
    pub const fn supports_lock_clause(self) -> bool {
        !matches!(self, Dialect::Sqlite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::Postgres.placeholder(2), "$2");
        assert_eq!(Dialect::Sqlite.placeholder(2), "?2");
        assert_eq!(Dialect::Mysql.placeholder(2), "?");
    }

    #[test]
    fn quoting_per_dialect() {
        assert_eq!(Dialect::Sqlite.quote_identifier("order"), "\"order\"");
        assert_eq!(Dialect::Mysql.quote_identifier("a`b"), "`a``b`");
    }

    #[test]
    fn lock_support() {
        assert!(!Dialect::Sqlite.supports_lock_clause());
        assert!(Dialect::Postgres.supports_lock_clause());
        assert!(Dialect::Mysql.supports_lock_clause());
    }

    #[test]
    fn deserializes_lowercase() {
        let d: Dialect = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(d, Dialect::Postgres);
    }
}
