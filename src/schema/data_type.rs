//! Column data types and runtime value checks
//!
//! The normalizer never coerces values. `DataType::accepts` only decides whether a
//! value looks like the declared type so a mismatch can be reported, and
//! `DataType::infer` types columns discovered at normalization time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$").unwrap()
});

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap()
});

static ISO_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d+)?$").unwrap()
});

static DECIMAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?\d+(\.\d+)?$").unwrap()
});

static INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?\d+$").unwrap()
});

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Double,
    Bool,
    Timestamp,
    Date,
    Time,
    Bigint,
    Binary,
    Decimal,
    /// Large unsigned integers (token amounts), carried as numbers or numeric strings
    Wei,
    /// Nested value stored whole, never exploded into columns or tables
    #[serde(alias = "complex")]
    Json,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::Timestamp => "timestamp",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::Bigint => "bigint",
            DataType::Binary => "binary",
            DataType::Decimal => "decimal",
            DataType::Wei => "wei",
            DataType::Json => "json",
        }
    }

    /// Check whether a runtime value is plausible for this type. Null is always accepted.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Json, _) => true,
            (DataType::Text, Value::String(_)) => true,
            (DataType::Binary, Value::String(_)) => true,
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Double, Value::Number(_)) => true,
            (DataType::Bigint, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Decimal, Value::Number(_)) => true,
            (DataType::Decimal, Value::String(s)) => DECIMAL_REGEX.is_match(s),
            (DataType::Wei, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Wei, Value::String(s)) => INTEGER_REGEX.is_match(s),
            (DataType::Timestamp, Value::String(s)) => {
                ISO_DATETIME_REGEX.is_match(s) || ISO_DATE_REGEX.is_match(s)
            }
            // epoch seconds
            (DataType::Timestamp, Value::Number(_)) => true,
            (DataType::Date, Value::String(s)) => ISO_DATE_REGEX.is_match(s),
            (DataType::Time, Value::String(s)) => ISO_TIME_REGEX.is_match(s),
            _ => false,
        }
    }

    /// Infer a column type from the first value seen for it
    pub fn infer(value: &Value) -> Option<DataType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(DataType::Bigint)
                } else {
                    Some(DataType::Double)
                }
            }
            Value::String(s) => {
                if ISO_DATETIME_REGEX.is_match(s) {
                    Some(DataType::Timestamp)
                } else if ISO_DATE_REGEX.is_match(s) {
                    Some(DataType::Date)
                } else if ISO_TIME_REGEX.is_match(s) {
                    Some(DataType::Time)
                } else {
                    Some(DataType::Text)
                }
            }
            Value::Array(_) | Value::Object(_) => Some(DataType::Json),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short name of a JSON value's runtime type, used in anomaly reports
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
