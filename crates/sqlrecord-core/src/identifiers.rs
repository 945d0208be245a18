//! SQL identifier quoting and sanitization utilities.
//!
//! This module provides functions for safely quoting SQL identifiers
//! (table names, column names, etc.) to prevent SQL injection and
//! handle special characters.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
/// This function is safe against SQL injection for any input string.
///
/// # Examples
///
/// ```
/// use sqlrecord_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// assert_eq!(quote_ident("select"), "\"select\""); // SQL keyword
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// Embedded backticks are escaped by doubling them (`` ` `` → ``` `` ```).
/// This function is safe against SQL injection for any input string.
///
/// # Examples
///
/// ```
/// use sqlrecord_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("users"), "`users`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Sanitize a SQL identifier by removing non-alphanumeric/underscore characters.
///
/// Use this when quoting is not possible (e.g., PRAGMA commands, savepoint names).
/// This is a more restrictive approach that only allows safe characters.
///
/// **Note:** This function strips characters rather than erroring. If the input
/// contains only invalid characters, the result will be an empty string.
///
/// # Examples
///
/// ```
/// use sqlrecord_core::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("users"), "users");
/// assert_eq!(sanitize_identifier("user_name"), "user_name");
/// assert_eq!(sanitize_identifier("user\"name"), "username");
/// assert_eq!(sanitize_identifier("user;DROP TABLE--"), "userDROPTABLE");
/// ```
#[inline]
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
