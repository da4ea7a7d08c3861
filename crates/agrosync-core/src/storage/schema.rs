//! Static table registry for the embedded store.
//!
//! Each syncable table is declared once as a [`TableDef`]. The same
//! declaration emits the DDL at bootstrap and validates record shapes in the
//! query facade, so the two can never drift apart.

use indoc::formatdoc;

use super::timestamp::SQL_NOW;
use super::value::Row;
use crate::error::StoreError;

/// Table probed at bootstrap to decide whether the schema already exists.
pub const SENTINEL_TABLE: &str = "producer";

/// Internal table holding locally deleted rows awaiting remote deletion.
pub const TOMBSTONE_TABLE: &str = "_sync_tombstone";

/// Identity column shared by every table.
pub const ID_COLUMN: &str = "id";
pub const LAST_SYNC_COLUMN: &str = "last_sync";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// Canonical timestamp, see [`super::timestamp`].
    Timestamp,
    Blob,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// How a table's `id` is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// `INTEGER PRIMARY KEY AUTOINCREMENT`, assigned by the embedded store.
    AutoIncrement,
    /// `TEXT PRIMARY KEY` holding a client-generated UUID v4.
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    /// SQL default expression.
    pub default: Option<&'static str>,
    /// SQL boolean expression for a CHECK constraint.
    pub check: Option<&'static str>,
    /// Referenced table (always by `id`).
    pub references: Option<&'static str>,
}

impl ColumnDef {
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
            check: None,
            references: None,
        }
    }

    pub const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, ty)
        }
    }

    pub const fn default_sql(self, expr: &'static str) -> Self {
        Self {
            default: Some(expr),
            ..self
        }
    }

    pub const fn check(self, expr: &'static str) -> Self {
        Self {
            check: Some(expr),
            ..self
        }
    }

    pub const fn references(self, table: &'static str) -> Self {
        Self {
            references: Some(table),
            ..self
        }
    }

    /// Whether an insert must supply this column.
    pub fn is_mandatory(&self) -> bool {
        !self.nullable && self.default.is_none()
    }

    fn ddl(&self) -> String {
        let mut out = format!("{} {}", self.name, self.ty.sql());
        if !self.nullable {
            out.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            out.push_str(&format!(" DEFAULT ({default})"));
        }
        if let Some(check) = self.check {
            out.push_str(&format!(" CHECK ({check})"));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub identity: IdentityKind,
    /// Declared attribute columns, excluding `id`, timestamps and `last_sync`.
    pub columns: &'static [ColumnDef],
    /// Whether the table carries `created_at`/`updated_at` maintained by a trigger.
    pub tracks_updates: bool,
}

impl TableDef {
    fn id_column(&self) -> ColumnDef {
        match self.identity {
            IdentityKind::AutoIncrement => ColumnDef::optional(ID_COLUMN, ColumnType::Integer),
            IdentityKind::Generated => ColumnDef::required(ID_COLUMN, ColumnType::Text),
        }
    }

    /// Every physical column in DDL order.
    pub fn all_columns(&self) -> Vec<ColumnDef> {
        let mut cols = Vec::with_capacity(self.columns.len() + 4);
        cols.push(self.id_column());
        cols.extend_from_slice(self.columns);
        if self.tracks_updates {
            cols.push(
                ColumnDef::required(CREATED_AT_COLUMN, ColumnType::Timestamp).default_sql(SQL_NOW),
            );
            cols.push(
                ColumnDef::required(UPDATED_AT_COLUMN, ColumnType::Timestamp).default_sql(SQL_NOW),
            );
        }
        cols.push(ColumnDef::optional(LAST_SYNC_COLUMN, ColumnType::Timestamp));
        cols
    }

    pub fn column(&self, name: &str) -> Option<ColumnDef> {
        self.all_columns().into_iter().find(|c| c.name == name)
    }

    pub fn create_table_sql(&self) -> String {
        let mut lines = Vec::new();
        lines.push(match self.identity {
            IdentityKind::AutoIncrement => format!("{ID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT"),
            IdentityKind::Generated => format!("{ID_COLUMN} TEXT PRIMARY KEY NOT NULL"),
        });
        for col in self.all_columns().iter().skip(1) {
            lines.push(col.ddl());
        }
        for col in self.columns {
            if let Some(parent) = col.references {
                lines.push(format!(
                    "FOREIGN KEY ({}) REFERENCES {parent}({ID_COLUMN})",
                    col.name
                ));
            }
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.name,
            lines.join(",\n    ")
        )
    }

    /// Trigger refreshing `updated_at` on user edits.
    ///
    /// Only updates of attribute columns fire it. Writes to `last_sync` or
    /// the timestamps themselves never re-dirty the row.
    pub fn touch_trigger_sql(&self) -> Option<String> {
        if !self.tracks_updates || self.columns.is_empty() {
            return None;
        }
        let table = self.name;
        let watched = self
            .columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");
        Some(formatdoc! {"
            CREATE TRIGGER IF NOT EXISTS {table}_touch_updated_at
            AFTER UPDATE OF {watched} ON {table}
            FOR EACH ROW
            BEGIN
                UPDATE {table} SET {UPDATED_AT_COLUMN} = {SQL_NOW} WHERE {ID_COLUMN} = NEW.{ID_COLUMN};
            END;"
        })
    }

    /// Check a record against the declaration.
    ///
    /// Unknown columns are always rejected. For inserts, every mandatory
    /// column must be present and non-null.
    pub fn validate(&self, record: &Row, inserting: bool) -> Result<(), StoreError> {
        let columns = self.all_columns();
        for key in record.keys() {
            if !columns.iter().any(|c| c.name == key) {
                return Err(StoreError::validation(
                    self.name,
                    format!("unknown column '{key}'"),
                ));
            }
        }
        if inserting {
            for col in columns.iter().filter(|c| c.is_mandatory()) {
                match record.get(col.name) {
                    Some(v) if !v.is_null() => {}
                    _ => {
                        return Err(StoreError::validation(
                            self.name,
                            format!("missing required column '{}'", col.name),
                        ))
                    }
                }
            }
        }
        Ok(())
    }
}

use ColumnType::{Blob, Date, Integer, Real, Text};

const ADDRESS_COLUMNS: &[ColumnDef] = &[
    ColumnDef::optional("neighborhood", Text),
    ColumnDef::optional("city", Text),
    ColumnDef::required("house_number", Text),
    ColumnDef::optional("complement", Text),
    ColumnDef::optional("postal_code", Text),
    ColumnDef::required("state_code", Text).check("length(state_code) = 2"),
    ColumnDef::optional("reference_note", Text),
];

const PRODUCER_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("name", Text),
    ColumnDef::optional("tax_id", Text),
    ColumnDef::optional("email", Text),
    ColumnDef::optional("phone", Text),
    ColumnDef::optional("referral", Text),
    ColumnDef::optional("address_id", Integer).references("address"),
];

const EXPENSE_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("employee", Text),
    ColumnDef::optional("maintenance_cost", Real),
    ColumnDef::optional("input_supply", Real),
    ColumnDef::optional("transport_cost", Real),
    ColumnDef::optional("other_cost", Real),
    ColumnDef::optional("electricity_cost", Real),
    ColumnDef::optional("fuel_cost", Real),
    ColumnDef::optional("storage_cost", Real),
    ColumnDef::required("occurred_on", Date).default_sql("date('now')"),
    ColumnDef::required("producer_id", Integer).references("producer"),
];

const PROPERTY_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("field_description", Text),
    ColumnDef::required("area", Real),
    ColumnDef::optional("variety", Text),
    ColumnDef::optional("expected_yield", Text),
    ColumnDef::optional("soil_code", Integer),
    ColumnDef::optional("characteristics", Text),
    ColumnDef::optional("notes", Text),
    ColumnDef::optional("photo", Blob),
    ColumnDef::optional("address_id", Integer).references("address"),
    ColumnDef::optional("boundaries", Text),
    ColumnDef::optional("crop_type", Text),
    ColumnDef::optional("cultivar_id", Integer).references("cultivar"),
    ColumnDef::optional("dispatch_type", Text),
    ColumnDef::required("producer_id", Integer).references("producer"),
];

const CULTIVAR_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("description", Text),
    ColumnDef::required("planted_on", Date),
    ColumnDef::optional("expected_harvest_on", Date),
    ColumnDef::optional("input_supply", Text),
    ColumnDef::optional("soil_correction", Text),
    ColumnDef::optional("expected_product", Text),
    ColumnDef::optional("photo", Blob),
    ColumnDef::required("property_id", Integer).references("property"),
];

const CULTIVATION_COLUMNS: &[ColumnDef] = &[
    ColumnDef::required("producer_id", Integer).references("producer"),
    ColumnDef::required("property_id", Integer).references("property"),
    ColumnDef::optional("expense_id", Text).references("expense"),
    ColumnDef::required("started_on", Date).default_sql("date('now')"),
    ColumnDef::optional("ended_on", Date),
    ColumnDef::optional("status", Text)
        .check("status IN ('active', 'inactive', 'suspended')"),
];

/// Registered tables, parents before children.
pub static TABLES: &[TableDef] = &[
    TableDef {
        name: "address",
        identity: IdentityKind::AutoIncrement,
        columns: ADDRESS_COLUMNS,
        tracks_updates: false,
    },
    TableDef {
        name: "producer",
        identity: IdentityKind::AutoIncrement,
        columns: PRODUCER_COLUMNS,
        tracks_updates: true,
    },
    TableDef {
        name: "expense",
        identity: IdentityKind::Generated,
        columns: EXPENSE_COLUMNS,
        tracks_updates: false,
    },
    TableDef {
        name: "property",
        identity: IdentityKind::AutoIncrement,
        columns: PROPERTY_COLUMNS,
        tracks_updates: true,
    },
    TableDef {
        name: "cultivar",
        identity: IdentityKind::AutoIncrement,
        columns: CULTIVAR_COLUMNS,
        tracks_updates: false,
    },
    TableDef {
        name: "cultivation",
        identity: IdentityKind::Generated,
        columns: CULTIVATION_COLUMNS,
        tracks_updates: false,
    },
];

/// Look up a registered table.
pub fn table(name: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| t.name == name)
}

/// Registered table names in sync order.
pub fn table_names() -> Vec<&'static str> {
    TABLES.iter().map(|t| t.name).collect()
}

/// The complete bootstrap DDL script.
pub fn schema_sql() -> String {
    let mut script = String::new();
    for table in TABLES {
        script.push_str(&table.create_table_sql());
        script.push('\n');
    }
    script.push_str(&formatdoc! {"
        CREATE TABLE IF NOT EXISTS {TOMBSTONE_TABLE} (
            table_name TEXT NOT NULL,
            row_id TEXT NOT NULL,
            deleted_at TEXT NOT NULL,
            PRIMARY KEY (table_name, row_id)
        );
    "});
    for table in TABLES {
        if let Some(trigger) = table.touch_trigger_sql() {
            script.push_str(&trigger);
            script.push('\n');
        }
    }
    script
}

/// Whether `name` is safe to interpolate as a quoted SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reject anything that is not a plain identifier.
pub fn check_identifier(table: &str, name: &str) -> Result<(), StoreError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(StoreError::validation(
            table,
            format!("'{name}' is not a valid identifier"),
        ))
    }
}

/// Quote an identifier already vetted by [`check_identifier`].
pub fn quote(name: &str) -> String {
    format!("\"{name}\"")
}
