//! Field descriptors - one column's type, constraints, default and relation
//!
//! A `Field` never holds row data. It validates and converts values for its
//! column, renders the column's DDL and builds comparator expressions.

use crate::statement::{Comparator, Expr, Operator};
use crate::types::{render_literal, ValueType};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;

/// Column constraints. Rendered in a fixed order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Constraints {
    pub not_null: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
}

/// `FOREIGN KEY(column) REFERENCES referenced_table(referenced_column)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "FOREIGN KEY({}) REFERENCES {}({})",
            self.column, self.referenced_table, self.referenced_column
        )
    }
}

/// DDL pieces produced by one field: the column definition and the
/// table-level constraints that must trail all column definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnClause {
    pub definition: String,
    pub trailing: Vec<String>,
}

/// Descriptor for a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    value_type: ValueType,
    column_name: String,
    constraints: Constraints,
    default: Option<Value>,
    foreign_key: Option<ForeignKey>,
}

impl Field {
    /// Create a field of the given type. The column name defaults to the
    /// attribute name it is registered under in a schema.
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            column_name: String::new(),
            constraints: Constraints::default(),
            default: None,
            foreign_key: None,
        }
    }

    pub fn integer() -> Self {
        Self::new(ValueType::Integer)
    }

    pub fn real() -> Self {
        Self::new(ValueType::Real)
    }

    pub fn text() -> Self {
        Self::new(ValueType::Text)
    }

    pub fn blob() -> Self {
        Self::new(ValueType::Blob)
    }

    pub fn boolean() -> Self {
        Self::new(ValueType::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(ValueType::DateTime)
    }

    pub fn any() -> Self {
        Self::new(ValueType::Any)
    }

    // ========== Builder ==========

    /// Override the column name
    pub fn named(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.constraints.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.constraints.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.constraints.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.constraints.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Reference `referenced_table(referenced_column)` from this column
    pub fn references(
        mut self,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        self.foreign_key = Some(ForeignKey::new(
            self.column_name.clone(),
            referenced_table,
            referenced_column,
        ));
        self
    }

    /// Set a foreign key whose local column may differ from this field's
    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }

    /// Bind the column name when the field is registered under `attribute`.
    pub(crate) fn bind(mut self, attribute: &str) -> Self {
        if self.column_name.is_empty() {
            self.column_name = attribute.to_string();
        }
        if let Some(fk) = self.foreign_key.as_mut() {
            if fk.column.is_empty() {
                fk.column = self.column_name.clone();
            }
        }
        self
    }

    // ========== Accessors ==========

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn foreign_key_relation(&self) -> Option<&ForeignKey> {
        self.foreign_key.as_ref()
    }

    pub fn is_nullable(&self) -> bool {
        !self.constraints.not_null
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints.primary_key
    }

    pub fn is_auto_increment(&self) -> bool {
        self.constraints.auto_increment
    }

    // ========== Conversion ==========

    /// Check that `value` can be stored in this column.
    ///
    /// NULL is accepted by nullable and auto-increment columns only.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.to_storage(value).map(|_| ())
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }

    pub fn to_storage(&self, value: &Value) -> Result<SqlValue> {
        if value.is_null() && !self.is_nullable() && !self.is_auto_increment() {
            return Err(Error::NullValue {
                field: self.column_name.clone(),
            });
        }
        self.value_type.to_storage(value)
    }

    pub fn from_storage(&self, raw: SqlValue) -> Result<Value> {
        self.value_type.from_storage(raw)
    }

    /// The default converted to storage encoding, if one is set
    pub fn default_storage(&self) -> Result<Option<SqlValue>> {
        self.default
            .as_ref()
            .map(|v| self.value_type.to_storage(v))
            .transpose()
    }

    // ========== DDL ==========

    /// Render the column definition and trailing constraints.
    ///
    /// Inline: `NOT NULL`, `UNIQUE`, `DEFAULT`. A primary key trails as
    /// `PRIMARY KEY(name)`, except an auto-increment key which SQLite only
    /// accepts inline as `PRIMARY KEY AUTOINCREMENT`.
    pub fn column_clause(&self) -> Result<ColumnClause> {
        let mut parts = vec![
            self.column_name.clone(),
            self.value_type.storage_type().to_string(),
        ];
        let mut trailing = Vec::new();

        if self.constraints.primary_key {
            if self.constraints.auto_increment {
                parts.push("PRIMARY KEY AUTOINCREMENT".to_string());
            } else {
                trailing.push(format!("PRIMARY KEY({})", self.column_name));
            }
        }
        if self.constraints.not_null {
            parts.push("NOT NULL".to_string());
        }
        if self.constraints.unique {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default) = self.default_storage()? {
            parts.push(format!("DEFAULT {}", render_literal(&default)));
        }
        if let Some(fk) = &self.foreign_key {
            trailing.push(fk.render());
        }

        Ok(ColumnClause {
            definition: parts.join(" "),
            trailing,
        })
    }

    // ========== Comparators ==========

    fn compare(&self, op: Operator, value: impl Into<Value>) -> Result<Expr> {
        let literal = self.value_type.to_storage(&value.into())?;
        Ok(Comparator::new(self.column_name.clone(), op, literal).into())
    }

    pub fn eq(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Eq, value)
    }

    pub fn ne(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Ne, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Lt, value)
    }

    pub fn le(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Le, value)
    }

    pub fn gt(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Gt, value)
    }

    pub fn ge(&self, value: impl Into<Value>) -> Result<Expr> {
        self.compare(Operator::Ge, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_clause_order() {
        let field = Field::text().named("email").unique().not_null();
        let clause = field.column_clause().unwrap();
        assert_eq!(clause.definition, "email TEXT NOT NULL UNIQUE");
        assert!(clause.trailing.is_empty());
    }

    #[test]
    fn test_primary_key_trails() {
        let field = Field::integer().named("id").primary_key().not_null().unique();
        let clause = field.column_clause().unwrap();
        assert_eq!(clause.definition, "id INTEGER NOT NULL UNIQUE");
        assert_eq!(clause.trailing, vec!["PRIMARY KEY(id)".to_string()]);
    }

    #[test]
    fn test_auto_increment_inline() {
        let field = Field::integer().named("id").primary_key().auto_increment();
        let clause = field.column_clause().unwrap();
        assert_eq!(clause.definition, "id INTEGER PRIMARY KEY AUTOINCREMENT");
        assert!(clause.trailing.is_empty());
    }

    #[test]
    fn test_default_and_foreign_key() {
        let field = Field::text()
            .named("role")
            .not_null()
            .default_value("member")
            .references("roles", "name");
        let clause = field.column_clause().unwrap();
        assert_eq!(clause.definition, "role TEXT NOT NULL DEFAULT 'member'");
        assert_eq!(clause.trailing, vec!["FOREIGN KEY(role) REFERENCES roles(name)".to_string()]);
    }

    #[test]
    fn test_bind_fills_names() {
        let field = Field::integer().references("users", "id").bind("owner_id");
        assert_eq!(field.column_name(), "owner_id");
        assert_eq!(field.foreign_key_relation().unwrap().column, "owner_id");

        let named = Field::integer().named("uid").bind("user");
        assert_eq!(named.column_name(), "uid");
    }

    #[test]
    fn test_validate_raises() {
        let age = Field::integer().named("age").not_null();
        assert!(age.validate(&Value::Integer(3)).is_ok());
        assert!(matches!(age.validate(&Value::Null), Err(Error::NullValue { .. })));
        assert!(matches!(
            age.validate(&Value::Text("old".into())),
            Err(Error::Conversion { .. })
        ));
        assert!(!age.is_valid(&Value::Text("old".into())));

        let nickname = Field::text().named("nickname");
        assert!(nickname.is_valid(&Value::Null));

        let id = Field::integer().named("id").primary_key().auto_increment().not_null();
        assert!(id.is_valid(&Value::Null));
    }

    #[test]
    fn test_comparators_convert_literal() {
        let active = Field::boolean().named("active");
        assert_eq!(active.eq(true).unwrap().render(), "active == 1");

        let name = Field::text().named("name");
        assert_eq!(name.ne("bob").unwrap().render(), "name != 'bob'");
        assert_eq!(name.eq(Value::Null).unwrap().render(), "name IS NULL");

        let age = Field::integer().named("age");
        assert_eq!(age.ge(18).unwrap().render(), "age >= 18");
        assert_eq!(age.lt(65).unwrap().render(), "age < 65");
        assert!(age.gt("many").is_err());
    }
}
