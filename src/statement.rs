//! Statement builder - boolean expression trees and SELECT clauses
//!
//! An [`Expr`] is an immutable tree:
//! - leaf [`Comparator`]: `column operator literal`
//! - `Not`: unary prefix
//! - `And` / `Or`: n-ary joins, rendered in insertion order
//!
//! Rendering is purely structural and never touches a connection. Two trees
//! for the same logical condition only render identically when their
//! comparators were added in the same order.

use crate::schema::Schema;
use crate::types::render_literal;
use crate::{Error, Result};
use rusqlite::types::Value as SqlValue;
use std::fmt;
use std::ops;
use std::str::FromStr;

/// Comparison operators available on a [`Field`](crate::field::Field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Leaf condition. The literal is already in storage encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    pub column: String,
    pub op: Operator,
    pub literal: SqlValue,
}

impl Comparator {
    pub fn new(column: impl Into<String>, op: Operator, literal: SqlValue) -> Self {
        Self {
            column: column.into(),
            op,
            literal,
        }
    }

    pub fn render(&self) -> String {
        match (&self.literal, self.op) {
            (SqlValue::Null, Operator::Eq) => format!("{} IS NULL", self.column),
            (SqlValue::Null, Operator::Ne) => format!("{} IS NOT NULL", self.column),
            (literal, op) => format!("{} {} {}", self.column, op, render_literal(literal)),
        }
    }
}

/// Boolean expression tree used for WHERE clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare(Comparator),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Join any number of expressions with AND. An empty join is true.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Join any number of expressions with OR. An empty join is false.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn negate(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    pub fn render(&self) -> String {
        match self {
            Expr::Compare(cmp) => cmp.render(),
            Expr::Not(inner) => format!("NOT {}", inner.render_nested()),
            Expr::And(children) => Self::render_join(children, "AND", "1"),
            Expr::Or(children) => Self::render_join(children, "OR", "0"),
        }
    }

    /// Column names referenced by the leaves, in tree order
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Compare(cmp) => out.push(cmp.column.as_str()),
            Expr::Not(inner) => inner.collect_columns(out),
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }

    fn render_join(children: &[Expr], keyword: &str, empty: &str) -> String {
        match children {
            [] => empty.to_string(),
            [only] => only.render(),
            _ => children
                .iter()
                .map(Expr::render_nested)
                .collect::<Vec<_>>()
                .join(&format!(" {} ", keyword)),
        }
    }

    /// Render as an operand of another join or of NOT. A single-child join
    /// is transparent, so grouping is decided by what it wraps.
    fn render_nested(&self) -> String {
        match self {
            Expr::And(children) | Expr::Or(children) => match children.as_slice() {
                [only] => only.render_nested(),
                [] => self.render(),
                _ => format!("({})", self.render()),
            },
            _ => self.render(),
        }
    }
}

impl From<Comparator> for Expr {
    fn from(cmp: Comparator) -> Self {
        Expr::Compare(cmp)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        match self {
            Expr::And(mut children) => {
                children.push(rhs);
                Expr::And(children)
            }
            lhs => Expr::And(vec![lhs, rhs]),
        }
    }
}

impl ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        match self {
            Expr::Or(mut children) => {
                children.push(rhs);
                Expr::Or(children)
            }
            lhs => Expr::Or(vec![lhs, rhs]),
        }
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::negate(self)
    }
}

/// Sort direction for ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

impl FromStr for Order {
    type Err = Error;

    /// Only the exact keywords `ASC` and `DESC` are accepted.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ASC" => Ok(Order::Asc),
            "DESC" => Ok(Order::Desc),
            _ => Err(Error::InvalidOrder(s.to_string())),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub order: Order,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, order: Order) -> Self {
        Self {
            column: column.into(),
            order,
        }
    }

    pub fn render(&self) -> String {
        format!("{} {}", self.column, self.order)
    }
}

impl<S: Into<String>> From<(S, Order)> for OrderBy {
    fn from((column, order): (S, Order)) -> Self {
        OrderBy::new(column, order)
    }
}

/// `LIMIT offset,count`. A negative count means no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub count: i64,
    pub offset: i64,
}

impl Limit {
    pub fn new(count: i64) -> Self {
        Self { count, offset: 0 }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn render(&self) -> String {
        format!("LIMIT {},{}", self.offset, self.count)
    }
}

/// `(count, offset)`
impl From<(i64, i64)> for Limit {
    fn from((count, offset): (i64, i64)) -> Self {
        Limit { count, offset }
    }
}

/// Fluent SELECT builder, rendered against a [`Schema`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the WHERE expression, AND-ing with any filter already present
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing & expr,
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push(OrderBy::new(column, order));
        self
    }

    pub fn limit(mut self, count: i64) -> Self {
        let offset = self.limit.map(|l| l.offset).unwrap_or(0);
        self.limit = Some(Limit { count, offset });
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        let count = self.limit.map(|l| l.count).unwrap_or(-1);
        self.limit = Some(Limit { count, offset });
        self
    }

    pub fn to_sql(&self, schema: &Schema) -> Result<String> {
        schema.make_select_statement(self.filter.as_ref(), &self.order_by, self.limit)
    }
}
