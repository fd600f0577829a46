//! Schema descriptors - a named, ordered set of fields describing one table
//!
//! Schemas are assembled once through [`SchemaBuilder`] and are immutable
//! afterwards, so every statement that does not depend on a caller's input
//! (CREATE and the three INSERT variants) is rendered eagerly at build time.

use crate::field::Field;
use crate::model::Record;
use crate::statement::{Expr, Limit, OrderBy};
use crate::types::ValueType;
use crate::value::Value;
use crate::{Error, Result};
use indexmap::IndexMap;
use rusqlite::types::{ToSql, Value as SqlValue};
use std::sync::Arc;

/// A raw result row: column name to storage value, in column order.
pub type RawRow = IndexMap<String, SqlValue>;

/// Conflict handling for INSERT statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InsertMode {
    #[default]
    Insert,
    Replace,
    Ignore,
}

impl InsertMode {
    /// `replace` takes precedence over `ignore` when both are set.
    pub fn from_flags(replace: bool, ignore: bool) -> Self {
        if replace {
            InsertMode::Replace
        } else if ignore {
            InsertMode::Ignore
        } else {
            InsertMode::Insert
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            InsertMode::Insert => "INSERT INTO",
            InsertMode::Replace => "INSERT OR REPLACE INTO",
            InsertMode::Ignore => "INSERT OR IGNORE INTO",
        }
    }

    fn index(&self) -> usize {
        match self {
            InsertMode::Insert => 0,
            InsertMode::Replace => 1,
            InsertMode::Ignore => 2,
        }
    }
}

/// Named parameters (`:column` to storage value) for one INSERT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams(Vec<(String, SqlValue)>);

impl NamedParams {
    pub fn push(&mut self, column: &str, value: SqlValue) {
        self.0.push((format!(":{}", column), value));
    }

    /// Look up a bound value by column name (without the leading `:`)
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0
            .iter()
            .find(|(name, _)| name.strip_prefix(':') == Some(column))
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow as the pair list rusqlite binds by name
    pub fn as_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

/// Immutable table descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    table_name: String,
    fields: IndexMap<String, Field>,
    create_statement: String,
    insert_statements: [String; 3],
}

impl Schema {
    pub fn builder(table_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Field registered under `attribute`
    pub fn field(&self, attribute: &str) -> Result<&Field> {
        self.fields.get(attribute).ok_or_else(|| Error::UnknownField {
            table: self.table_name.clone(),
            field: attribute.to_string(),
        })
    }

    /// Attribute name and field, in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn has_column(&self, column: &str) -> bool {
        self.fields.values().any(|f| f.column_name() == column)
    }

    fn check_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(Error::UnknownField {
                table: self.table_name.clone(),
                field: column.to_string(),
            })
        }
    }

    // ========== Statements ==========

    pub fn make_create_statement(&self) -> &str {
        &self.create_statement
    }

    pub fn make_insert_statement(&self, replace: bool, ignore: bool) -> &str {
        self.insert_statement(InsertMode::from_flags(replace, ignore))
    }

    pub fn insert_statement(&self, mode: InsertMode) -> &str {
        &self.insert_statements[mode.index()]
    }

    /// Bind every field of `record` for an INSERT.
    ///
    /// An absent attribute takes the field's default when one is set, NULL
    /// when the column is nullable or auto-increment, and is otherwise a
    /// [`Error::MissingRequiredField`].
    pub fn make_insert_values(&self, record: &Record) -> Result<NamedParams> {
        let mut params = NamedParams::default();

        for (attribute, field) in &self.fields {
            let value = match record.get(attribute) {
                Some(value) => field.to_storage(value)?,
                None => match field.default_storage()? {
                    Some(default) => default,
                    None if field.is_nullable() || field.is_auto_increment() => SqlValue::Null,
                    None => {
                        return Err(Error::MissingRequiredField {
                            table: self.table_name.clone(),
                            field: field.column_name().to_string(),
                        })
                    }
                },
            };
            params.push(field.column_name(), value);
        }

        Ok(params)
    }

    /// `SELECT * FROM <table> [WHERE ..] [ORDER BY ..] [LIMIT offset,count]`
    pub fn make_select_statement(
        &self,
        filter: Option<&Expr>,
        order_by: &[OrderBy],
        limit: Option<Limit>,
    ) -> Result<String> {
        let mut sql = format!("SELECT * FROM {}", self.table_name);

        if let Some(expr) = filter {
            for column in expr.columns() {
                self.check_column(column)?;
            }
            sql.push_str(" WHERE ");
            sql.push_str(&expr.render());
        }

        if !order_by.is_empty() {
            let mut clauses = Vec::with_capacity(order_by.len());
            for ob in order_by {
                self.check_column(&ob.column)?;
                clauses.push(ob.render());
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        if let Some(limit) = limit {
            sql.push(' ');
            sql.push_str(&limit.render());
        }

        Ok(sql)
    }

    /// `DELETE FROM <table> [WHERE ..]`. Without a filter the statement is
    /// refused unless `allow_unconditional` is set.
    pub fn make_delete_statement(&self, filter: Option<&Expr>, allow_unconditional: bool) -> Result<String> {
        match filter {
            Some(expr) => {
                for column in expr.columns() {
                    self.check_column(column)?;
                }
                Ok(format!("DELETE FROM {} WHERE {}", self.table_name, expr.render()))
            }
            None if allow_unconditional => Ok(format!("DELETE FROM {}", self.table_name)),
            None => Err(Error::UnconditionalDeleteRefused {
                table: self.table_name.clone(),
            }),
        }
    }

    // ========== Marshaling ==========

    /// Rebuild a typed record from a raw row. Columns missing from the row
    /// leave the attribute unset.
    pub fn parse_row(self: &Arc<Self>, row: &RawRow) -> Result<Record> {
        let mut record = Record::new(self);
        for (attribute, field) in &self.fields {
            if let Some(raw) = row.get(field.column_name()) {
                let value: Value = field.from_storage(raw.clone())?;
                record.insert_unchecked(attribute, value);
            }
        }
        Ok(record)
    }
}

/// Builder for [`Schema`]. Validation happens once, in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    table_name: String,
    fields: IndexMap<String, Field>,
}

impl SchemaBuilder {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            fields: IndexMap::new(),
        }
    }

    /// Merge in every field of `base`. Fields declared afterwards under the
    /// same attribute name override the inherited ones in place.
    pub fn inherit(mut self, base: &Schema) -> Self {
        for (attribute, field) in &base.fields {
            self.fields.insert(attribute.clone(), field.clone());
        }
        self
    }

    pub fn field(mut self, attribute: impl Into<String>, field: Field) -> Self {
        let attribute = attribute.into();
        let field = field.bind(&attribute);
        self.fields.insert(attribute, field);
        self
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        check_identifier(&self.table_name)?;
        if self.fields.is_empty() {
            return Err(Error::InvalidSchema(format!("table {} has no fields", self.table_name)));
        }

        let mut columns: Vec<&str> = Vec::with_capacity(self.fields.len());
        let mut primary_keys = 0;
        for field in self.fields.values() {
            let column = field.column_name();
            check_identifier(column)?;
            if columns.contains(&column) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column {} in table {}",
                    column, self.table_name
                )));
            }
            columns.push(column);

            let constraints = field.constraints();
            if constraints.primary_key {
                primary_keys += 1;
            }
            if constraints.auto_increment
                && (!constraints.primary_key || field.value_type() != ValueType::Integer)
            {
                return Err(Error::InvalidSchema(format!(
                    "{}.{}: auto_increment requires an integer primary key",
                    self.table_name, column
                )));
            }
            if let Some(fk) = field.foreign_key_relation() {
                check_identifier(&fk.column)?;
                check_identifier(&fk.referenced_table)?;
                check_identifier(&fk.referenced_column)?;
            }
        }
        if primary_keys > 1 {
            return Err(Error::InvalidSchema(format!(
                "table {} declares {} primary keys, at most one is supported",
                self.table_name, primary_keys
            )));
        }

        let create_statement = render_create(&self.table_name, &self.fields)?;
        let insert_statements = [
            render_insert(InsertMode::Insert, &self.table_name, &columns),
            render_insert(InsertMode::Replace, &self.table_name, &columns),
            render_insert(InsertMode::Ignore, &self.table_name, &columns),
        ];

        Ok(Arc::new(Schema {
            table_name: self.table_name,
            fields: self.fields,
            create_statement,
            insert_statements,
        }))
    }
}

fn render_create(table_name: &str, fields: &IndexMap<String, Field>) -> Result<String> {
    let mut definitions = Vec::with_capacity(fields.len());
    let mut trailing = Vec::new();
    for field in fields.values() {
        let clause = field.column_clause()?;
        definitions.push(clause.definition);
        trailing.extend(clause.trailing);
    }
    definitions.extend(trailing);
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{}\"({})",
        table_name,
        definitions.join(", ")
    ))
}

fn render_insert(mode: InsertMode, table_name: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = columns.iter().map(|c| format!(":{}", c)).collect();
    format!(
        "{} {} ({}) VALUES ({})",
        mode.command(),
        table_name,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// SQLite keywords. Identifiers are rendered unquoted, so none may be used
/// as a table or column name.
const SQLITE_KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let well_formed = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !well_formed {
        return Err(Error::InvalidSchema(format!("invalid identifier: {:?}", name)));
    }
    if SQLITE_KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(name)) {
        return Err(Error::InvalidSchema(format!("{:?} is an SQLite keyword", name)));
    }
    Ok(())
}
