use crate::RawRow;
use rusqlite::types::Value as SqlValue;
use tabled::{builder::Builder, settings::Style};

/// Render query rows as a table, header taken from the first row
pub fn rows_table(rows: &[RawRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };

    let mut builder = Builder::default();
    builder.push_record(first.keys().cloned());
    for row in rows {
        builder.push_record(row.values().map(cell));
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

pub fn cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
    }
}
