//! Type conversion between application values and SQLite storage values
//!
//! Storage encodings:
//! - integers and booleans as INTEGER (booleans as 0/1)
//! - floating point as REAL
//! - text and blobs passed through
//! - timestamps as REAL seconds since the UTC epoch, microsecond precision
//!
//! Anything typed [`ValueType::Any`] falls back to a text conversion.

use crate::value::Value;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

/// Column value types understood by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    DateTime,
    /// Untyped column; values are stored as their text form
    Any,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Real => "real",
            ValueType::Text => "text",
            ValueType::Blob => "blob",
            ValueType::Boolean => "boolean",
            ValueType::DateTime => "datetime",
            ValueType::Any => "any",
        }
    }

    pub fn all() -> &'static [ValueType] {
        &[
            ValueType::Integer,
            ValueType::Real,
            ValueType::Text,
            ValueType::Blob,
            ValueType::Boolean,
            ValueType::DateTime,
            ValueType::Any,
        ]
    }

    /// Column type used in `CREATE TABLE`
    pub fn storage_type(&self) -> &'static str {
        match self {
            ValueType::Integer | ValueType::Boolean => "INTEGER",
            ValueType::Real | ValueType::DateTime => "REAL",
            ValueType::Text | ValueType::Any => "TEXT",
            ValueType::Blob => "BLOB",
        }
    }

    /// Convert an application value into its storage encoding.
    ///
    /// `Null` always passes through; nullability is the field's concern.
    pub fn to_storage(&self, value: &Value) -> Result<SqlValue> {
        let fail = || Error::conversion(value, self.storage_type());

        let converted = match (self, value) {
            (_, Value::Null) => SqlValue::Null,

            (ValueType::Integer, Value::Integer(v)) => SqlValue::Integer(*v),
            (ValueType::Integer, Value::Boolean(v)) => SqlValue::Integer(i64::from(*v)),
            (ValueType::Integer, Value::Real(v)) => SqlValue::Integer(integral(*v).ok_or_else(fail)?),
            (ValueType::Integer, Value::Text(s)) => {
                SqlValue::Integer(s.trim().parse().map_err(|_| fail())?)
            }

            (ValueType::Real, Value::Real(v)) => SqlValue::Real(finite(*v).ok_or_else(fail)?),
            (ValueType::Real, Value::Integer(v)) => SqlValue::Real(*v as f64),
            (ValueType::Real, Value::Text(s)) => {
                let parsed: f64 = s.trim().parse().map_err(|_| fail())?;
                SqlValue::Real(finite(parsed).ok_or_else(fail)?)
            }

            (ValueType::Text, Value::Text(s)) => SqlValue::Text(s.clone()),

            (ValueType::Blob, Value::Blob(b)) => SqlValue::Blob(b.clone()),

            (ValueType::Boolean, Value::Boolean(v)) => SqlValue::Integer(i64::from(*v)),
            (ValueType::Boolean, Value::Integer(v @ (0 | 1))) => SqlValue::Integer(*v),

            (ValueType::DateTime, Value::DateTime(dt)) => SqlValue::Real(epoch_seconds(dt).ok_or_else(fail)?),
            (ValueType::DateTime, Value::Integer(secs)) => {
                let dt = DateTime::from_timestamp(*secs, 0).ok_or_else(fail)?;
                SqlValue::Real(epoch_seconds(&dt).ok_or_else(fail)?)
            }
            (ValueType::DateTime, Value::Real(secs)) => {
                let dt = datetime_from_seconds(*secs).ok_or_else(fail)?;
                SqlValue::Real(epoch_seconds(&dt).ok_or_else(fail)?)
            }
            (ValueType::DateTime, Value::Text(s)) => {
                let dt = DateTime::parse_from_rfc3339(s.trim()).map_err(|_| fail())?;
                SqlValue::Real(epoch_seconds(&dt.with_timezone(&Utc)).ok_or_else(fail)?)
            }

            (ValueType::Any, Value::Blob(b)) => SqlValue::Blob(b.clone()),
            (ValueType::Any, other) => SqlValue::Text(other.to_string()),

            _ => return Err(fail()),
        };

        Ok(converted)
    }

    /// Convert a raw storage value back into an application value.
    pub fn from_storage(&self, raw: SqlValue) -> Result<Value> {
        let fail = |raw: &SqlValue| Error::Conversion {
            value: describe_raw(raw),
            target: self.as_str().to_string(),
        };

        let value = match (self, raw) {
            (_, SqlValue::Null) => Value::Null,

            (ValueType::Integer, SqlValue::Integer(v)) => Value::Integer(v),
            (ValueType::Integer, SqlValue::Real(v)) => match integral(v) {
                Some(v) => Value::Integer(v),
                None => return Err(fail(&SqlValue::Real(v))),
            },
            (ValueType::Integer, SqlValue::Text(s)) => match s.trim().parse() {
                Ok(v) => Value::Integer(v),
                Err(_) => return Err(fail(&SqlValue::Text(s))),
            },

            (ValueType::Real, SqlValue::Real(v)) => Value::Real(v),
            (ValueType::Real, SqlValue::Integer(v)) => Value::Real(v as f64),

            (ValueType::Text, SqlValue::Text(s)) => Value::Text(s),

            (ValueType::Blob, SqlValue::Blob(b)) => Value::Blob(b),
            (ValueType::Blob, SqlValue::Text(s)) => Value::Blob(s.into_bytes()),

            (ValueType::Boolean, SqlValue::Integer(v)) => Value::Boolean(v != 0),

            (ValueType::DateTime, SqlValue::Real(secs)) => match datetime_from_seconds(secs) {
                Some(dt) => Value::DateTime(dt),
                None => return Err(fail(&SqlValue::Real(secs))),
            },
            (ValueType::DateTime, SqlValue::Integer(secs)) => match DateTime::from_timestamp(secs, 0) {
                Some(dt) => Value::DateTime(dt),
                None => return Err(fail(&SqlValue::Integer(secs))),
            },
            // Rows written by older tooling may hold ISO-8601 text
            (ValueType::DateTime, SqlValue::Text(s)) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(dt) => Value::DateTime(dt.with_timezone(&Utc)),
                Err(_) => return Err(fail(&SqlValue::Text(s))),
            },

            (ValueType::Any, SqlValue::Text(s)) => Value::Text(s),
            (ValueType::Any, SqlValue::Blob(b)) => Value::Blob(b),
            (ValueType::Any, SqlValue::Integer(v)) => Value::Text(v.to_string()),
            (ValueType::Any, SqlValue::Real(v)) => Value::Text(v.to_string()),

            (_, other) => return Err(fail(&other)),
        };

        Ok(value)
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "integer" | "int" => Ok(ValueType::Integer),
            "real" | "float" => Ok(ValueType::Real),
            "text" | "str" | "string" => Ok(ValueType::Text),
            "blob" | "bytes" => Ok(ValueType::Blob),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "datetime" | "timestamp" => Ok(ValueType::DateTime),
            "any" => Ok(ValueType::Any),
            _ => Err(Error::InvalidSchema(format!("Unknown value type: {}", s))),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Render a storage value as an inline SQL literal.
///
/// Text is single-quoted with embedded quotes doubled, blobs use `X'..'`.
pub fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => format!("{:?}", v),
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlValue::Blob(b) => {
            let mut out = String::with_capacity(b.len() * 2 + 3);
            out.push_str("X'");
            for byte in b {
                let _ = write!(out, "{:02X}", byte);
            }
            out.push('\'');
            out
        }
    }
}

fn describe_raw(raw: &SqlValue) -> String {
    match raw {
        SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
        other => render_literal(other),
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Seconds since the epoch. Timestamps finer than a microsecond have no
/// exact encoding and are rejected.
fn epoch_seconds(dt: &DateTime<Utc>) -> Option<f64> {
    if dt.timestamp_subsec_nanos() % 1_000 != 0 {
        return None;
    }
    Some(dt.timestamp_micros() as f64 / 1_000_000.0)
}

fn datetime_from_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}
