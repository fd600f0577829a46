//! Model instances
//!
//! A [`Record`] is a dynamic instance of a [`Schema`]: attribute name to
//! value, validated against the schema's fields on every assignment.
//! The [`Model`] trait maps a plain Rust struct onto a record so callers get
//! compile-time accessors instead of string lookups.

use crate::schema::Schema;
use crate::value::{FromValue, Value};
use crate::{Error, Result};
use indexmap::IndexMap;
use std::sync::Arc;

/// One row's worth of typed values for a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<Schema>,
    values: IndexMap<String, Value>,
}

impl Record {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: IndexMap::new(),
        }
    }

    /// Build a record from `(attribute, value)` pairs, validating each one
    pub fn from_values<K, V>(schema: &Arc<Schema>, values: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Self::new(schema);
        for (attribute, value) in values {
            record.set(attribute, value)?;
        }
        Ok(record)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    /// Assign an attribute. Unknown attributes and values the field cannot
    /// store are rejected with an error; the record is left unchanged.
    ///
    /// The value is held in the field's normalized form, the same value a
    /// read of the stored row yields (`"42"` on an integer field holds 42).
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let attribute = attribute.into();
        let field = self.schema.field(&attribute)?;
        let normalized = field.from_storage(field.to_storage(&value.into())?)?;
        self.values.insert(attribute, normalized);
        Ok(())
    }

    /// Chaining form of [`set`](Self::set)
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        self.set(attribute, value)?;
        Ok(self)
    }

    pub(crate) fn insert_unchecked(&mut self, attribute: &str, value: Value) {
        self.values.insert(attribute.to_string(), value);
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    /// Extract an attribute as a concrete type. An unset attribute reads as
    /// NULL, so `Option<T>` targets accept it.
    pub fn get_as<T: FromValue>(&self, attribute: &str) -> Result<T> {
        self.schema.field(attribute)?;
        let null = Value::Null;
        let value = self.values.get(attribute).unwrap_or(&null);
        T::from_value(value).ok_or_else(|| Error::conversion(value, T::TARGET))
    }

    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.values.shift_remove(attribute)
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.values.contains_key(attribute)
    }

    /// True when every field of the schema has been assigned
    pub fn is_complete(&self) -> bool {
        self.schema.fields().all(|(attribute, _)| self.values.contains_key(attribute))
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Typed mapping between a Rust struct and a schema.
///
/// ```ignore
/// impl Model for User {
///     fn schema() -> Arc<Schema> {
///         static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
///         SCHEMA.get_or_init(|| /* Schema::builder("users")...build() */).clone()
///     }
///     fn to_record(&self) -> Result<Record> { ... }
///     fn from_record(record: &Record) -> Result<Self> { ... }
/// }
/// ```
pub trait Model: Sized {
    /// The schema for this type. Built once and shared.
    fn schema() -> Arc<Schema>;

    fn to_record(&self) -> Result<Record>;

    fn from_record(record: &Record) -> Result<Self>;
}
