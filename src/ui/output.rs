use crate::ui::{theme, Icons};
use crate::RawRow;
use owo_colors::OwoColorize;
use rusqlite::types::Value as SqlValue;

pub fn header(text: &str) {
    let style = theme().database;
    println!("{} {}", Icons::DATABASE.style(style), text.style(style));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::OK.style(theme().ok), label);
}

pub fn error(label: &str) {
    let style = theme().failed;
    eprintln!("{} {}", Icons::FAILED.style(style), label.style(style));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN.style(theme().warn), label.style(theme().warn));
}

pub fn info(label: &str, value: &str) {
    let style = theme().field;
    println!("{} {}: {}", Icons::FIELD.style(style), label.style(style), value);
}

pub fn dim(text: &str) -> String {
    text.style(theme().muted).to_string()
}

/// Rows as a JSON array of objects, column order preserved
pub fn rows_json(rows: &[RawRow]) -> serde_json::Value {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|(name, value)| (name.clone(), value_json(value)))
                .collect::<serde_json::Map<_, _>>()
                .into()
        })
        .collect::<Vec<serde_json::Value>>()
        .into()
}

fn value_json(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(v) => (*v).into(),
        SqlValue::Real(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        SqlValue::Text(s) => s.clone().into(),
        SqlValue::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect::<String>().into(),
    }
}
