//! Application values - what a model attribute holds before it is stored
//!
//! `Value` is deliberately wider than the storage encodings: booleans and
//! timestamps are first-class here and only collapse into integers/reals
//! when a [`ValueType`](crate::types::ValueType) converts them.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;

/// A typed value held by a model attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Short name of the variant, used in conversion errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
            Value::DateTime(_) => "datetime",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

/// Truncates to microseconds, the finest precision storage keeps.
impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v.trunc_subsecs(6))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Extraction of a concrete Rust type out of a [`Value`].
///
/// Used by [`Record::get_as`](crate::model::Record::get_as) and by
/// hand-written [`Model::from_record`](crate::model::Model::from_record)
/// implementations.
pub trait FromValue: Sized {
    /// Name of the target type, for error messages
    const TARGET: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const TARGET: &'static str = "i64";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(v) => Some(*v),
            Value::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    const TARGET: &'static str = "i32";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|v| i32::try_from(v).ok())
    }
}

impl FromValue for f64 {
    const TARGET: &'static str = "f64";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const TARGET: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Boolean(v) => Some(*v),
            Value::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TARGET: &'static str = "String";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const TARGET: &'static str = "Vec<u8>";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for DateTime<Utc> {
    const TARGET: &'static str = "DateTime<Utc>";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_from_value_widening() {
        assert_eq!(f64::from_value(&Value::Integer(3)), Some(3.0));
        assert_eq!(bool::from_value(&Value::Integer(0)), Some(false));
        assert_eq!(i32::from_value(&Value::Integer(i64::MAX)), None);
        assert_eq!(String::from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn test_optional_extraction() {
        assert_eq!(Option::<i64>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(&Value::Integer(7)), Some(Some(7)));
        assert_eq!(Option::<i64>::from_value(&Value::Text("7".into())), None);
    }
}
