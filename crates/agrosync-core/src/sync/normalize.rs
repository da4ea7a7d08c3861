//! Shape remote rows so they fit the local table.

use std::collections::HashMap;

use serde_json::Value;

use crate::storage::query::ColumnInfo;
use crate::storage::schema::{
    self, ColumnType, CREATED_AT_COLUMN, ID_COLUMN, LAST_SYNC_COLUMN, UPDATED_AT_COLUMN,
};
use crate::storage::{timestamp, Row};

/// Per-table normalizer built from the local column catalog.
#[derive(Debug, Clone)]
pub struct Normalizer {
    kinds: HashMap<String, ColumnType>,
}

impl Normalizer {
    pub fn new(table: &str, columns: &[ColumnInfo]) -> Self {
        let registered = schema::table(table);
        let kinds = columns
            .iter()
            .map(|col| {
                let kind = registered
                    .and_then(|def| def.column(&col.name))
                    .map(|def| def.ty)
                    .unwrap_or_else(|| infer_kind(&col.name, &col.decl_type));
                (col.name.clone(), kind)
            })
            .collect();
        Self { kinds }
    }

    /// Normalize one row.
    ///
    /// - columns unknown locally and the remote `last_sync` are dropped
    /// - relation objects carrying an `id` collapse to that id
    /// - timestamps become canonical strings, dates `YYYY-MM-DD`
    pub fn normalize(&self, row: Row) -> Row {
        row.into_iter()
            .filter(|(key, _)| key != LAST_SYNC_COLUMN)
            .filter_map(|(key, value)| {
                let kind = *self.kinds.get(&key)?;
                Some((key, normalize_value(value, kind)))
            })
            .collect()
    }
}

fn infer_kind(name: &str, decl_type: &str) -> ColumnType {
    if name == CREATED_AT_COLUMN || name == UPDATED_AT_COLUMN || name == LAST_SYNC_COLUMN {
        return ColumnType::Timestamp;
    }
    let decl = decl_type.to_ascii_uppercase();
    if decl.contains("INT") {
        ColumnType::Integer
    } else if decl.contains("REAL") || decl.contains("FLOA") || decl.contains("DOUB") {
        ColumnType::Real
    } else if decl.contains("BLOB") {
        ColumnType::Blob
    } else if decl == "DATE" {
        ColumnType::Date
    } else if decl.contains("TIME") {
        ColumnType::Timestamp
    } else {
        ColumnType::Text
    }
}

fn normalize_value(value: Value, kind: ColumnType) -> Value {
    let value = match value {
        Value::Object(mut map) if map.contains_key(ID_COLUMN) => {
            map.remove(ID_COLUMN).unwrap_or(Value::Null)
        }
        other => other,
    };

    match (kind, value) {
        (ColumnType::Timestamp, Value::String(s)) => {
            Value::String(timestamp::canonicalize(&s).unwrap_or(s))
        }
        (ColumnType::Timestamp, Value::Number(n)) => match n.as_i64() {
            Some(millis) => timestamp::from_epoch_millis(millis)
                .map(Value::String)
                .unwrap_or(Value::Number(n)),
            None => Value::Number(n),
        },
        (ColumnType::Date, Value::String(s)) if s.len() > 10 => match timestamp::parse(&s) {
            Some(ts) => Value::String(ts.format("%Y-%m-%d").to_string()),
            None => Value::String(s),
        },
        (_, other) => other,
    }
}
