//! # Litemodel - typed models over an embedded SQLite store
//!
//! Litemodel provides:
//! - Typed schema descriptors built from field declarations
//! - A composable statement builder for WHERE / ORDER BY / LIMIT clauses
//! - Value conversion between application types and storage encodings
//! - A serialized single-writer proxy in front of the write connection
//! - A manager tying it together: create tables, insert, get, delete

pub mod value;
pub mod types;
pub mod field;
pub mod statement;
pub mod schema;
pub mod model;
pub mod storage;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{FromValue, Value};
pub use types::ValueType;
pub use field::{Constraints, Field, ForeignKey};
pub use statement::{Comparator, Expr, Limit, Operator, Order, OrderBy, Query};
pub use schema::{InsertMode, RawRow, Schema, SchemaBuilder};
pub use model::{Model, Record};
pub use storage::{BatchOutcome, PendingTask, SqliteDb, WriteProxy};
pub use config::DbConfig;

/// Result type alias for Litemodel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Litemodel operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot convert {value} to {target}")]
    Conversion { value: String, target: String },

    #[error("Field {field} is not null")]
    NullValue { field: String },

    #[error("{table}.{field} is required but was not provided")]
    MissingRequiredField { table: String, field: String },

    #[error("Refusing unconditional DELETE FROM {table}")]
    UnconditionalDeleteRefused { table: String },

    #[error("Write task #{task} failed: {message}")]
    WorkerTaskFailure {
        task: u64,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("Write task #{task} did not finish within {timeout:?}")]
    TaskTimeout { task: u64, timeout: std::time::Duration },

    #[error("Bulk insert failed for {} group(s) ({inserted} rows inserted)", .failures.len())]
    InsertMany {
        inserted: usize,
        failures: Vec<(String, Error)>,
    },

    #[error("Unknown field {field} in {table}")]
    UnknownField { table: String, field: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Table {table} is already registered with a different schema")]
    SchemaConflict { table: String },

    #[error("Invalid order direction {0:?}, expected ASC or DESC")]
    InvalidOrder(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Conversion failure naming the offending value and the target type
    pub(crate) fn conversion(value: &Value, target: &str) -> Self {
        let value = match value {
            Value::Text(s) => format!("'{}'", s),
            other => other.to_string(),
        };
        Error::Conversion {
            value,
            target: target.to_string(),
        }
    }

    pub(crate) fn task_failure(task: u64, source: Error) -> Self {
        Error::WorkerTaskFailure {
            task,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}
