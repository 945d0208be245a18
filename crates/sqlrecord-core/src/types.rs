//! Column types and attribute casting.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// SQL data types a record attribute can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    BigInt,
    Double,
    Boolean,
    Text,
    VarChar(u32),
    Blob,
    Timestamp,
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt | SqlType::Double)
    }

    /// Cast an assigned value to this column's representation.
    ///
    /// Values that cannot be cast are kept as given so the database can
    /// reject them; blank strings assigned to numeric columns become NULL.
    pub fn cast(&self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (SqlType::Integer | SqlType::BigInt, Value::Text(s)) if s.trim().is_empty() => {
                Value::Null
            }
            (SqlType::Integer | SqlType::BigInt, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(n) => Value::BigInt(n),
                Err(_) => Value::Text(s),
            },
            (SqlType::Integer | SqlType::BigInt, Value::Int(n)) => Value::BigInt(i64::from(n)),
            (SqlType::Integer | SqlType::BigInt, Value::Bool(b)) => Value::BigInt(i64::from(b)),
            (SqlType::Double, Value::Text(s)) if s.trim().is_empty() => Value::Null,
            (SqlType::Double, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Value::Double(n),
                Err(_) => Value::Text(s),
            },
            (SqlType::Double, Value::Int(n)) => Value::Double(f64::from(n)),
            (SqlType::Double, Value::BigInt(n)) => Value::Double(n as f64),
            (SqlType::Boolean, Value::Int(n)) => Value::Bool(n != 0),
            (SqlType::Boolean, Value::BigInt(n)) => Value::Bool(n != 0),
            (SqlType::Boolean, Value::Text(s)) => match s.as_str() {
                "t" | "true" | "1" | "TRUE" => Value::Bool(true),
                "f" | "false" | "0" | "FALSE" => Value::Bool(false),
                _ => Value::Text(s),
            },
            (SqlType::Text | SqlType::VarChar(_), Value::Int(n)) => Value::Text(n.to_string()),
            (SqlType::Text | SqlType::VarChar(_), Value::BigInt(n)) => Value::Text(n.to_string()),
            (SqlType::Timestamp, Value::BigInt(n)) => Value::Timestamp(n),
            (SqlType::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(s),
            },
            (_, other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_casting() {
        assert_eq!(SqlType::Integer.cast(Value::Text("42".into())), Value::BigInt(42));
        assert_eq!(SqlType::Integer.cast(Value::Text(" ".into())), Value::Null);
        assert_eq!(SqlType::BigInt.cast(Value::Int(3)), Value::BigInt(3));
        assert_eq!(
            SqlType::Integer.cast(Value::Text("abc".into())),
            Value::Text("abc".into())
        );
    }

    #[test]
    fn boolean_casting() {
        assert_eq!(SqlType::Boolean.cast(Value::BigInt(0)), Value::Bool(false));
        assert_eq!(SqlType::Boolean.cast(Value::Text("t".into())), Value::Bool(true));
    }

    #[test]
    fn sqlite_reads_of_booleans_compare_equal_after_cast() {
        let read_back = SqlType::Boolean.cast(Value::BigInt(1));
        assert_eq!(read_back, Value::Bool(true));
    }

    #[test]
    fn sql_names() {
        assert_eq!(SqlType::VarChar(255).sql_name(), "VARCHAR(255)");
        assert!(SqlType::Double.is_numeric());
        assert!(!SqlType::Text.is_numeric());
    }
}
