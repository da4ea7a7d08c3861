//! Conversions between JSON rows and SQLite values.
//!
//! Rows cross every boundary of the crate (query facade, remote store) as
//! JSON objects. BLOB columns travel as base64 text and are stored as bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use super::schema::ColumnType;

/// A table row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Convert a JSON value into a bindable SQLite value.
///
/// `column` is the declared type when known; it only changes how strings
/// bound to BLOB columns are treated.
pub fn to_sql(value: &Value, column: Option<ColumnType>) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => match column {
            Some(ColumnType::Blob) => match BASE64.decode(s) {
                Ok(bytes) => SqlValue::Blob(bytes),
                Err(_) => SqlValue::Text(s.clone()),
            },
            _ => SqlValue::Text(s.clone()),
        },
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert a column read from SQLite into JSON.
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(BASE64.encode(bytes)),
    }
}

/// Read the current row of a statement into a [`Row`].
pub fn read_row(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (idx, name) in names.iter().enumerate() {
        out.insert(name.clone(), from_sql(row.get_ref(idx)?));
    }
    Ok(out)
}

/// String form of a row identity, used for remote filters and tombstones.
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
