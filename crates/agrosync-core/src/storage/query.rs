//! Query facade: table-agnostic CRUD and sync bookkeeping over [`LocalStore`].
//!
//! Every operation returns a `Result`; nothing here panics or swallows a
//! failure except the two lookups documented as infallible
//! ([`LocalStore::last_sync_marker`]).

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::local_store::{run_transaction, table_exists, LocalStore, Statement, StatementOutcome};
use super::schema::{
    self, check_identifier, quote, ColumnType, IdentityKind, ID_COLUMN, LAST_SYNC_COLUMN,
    TOMBSTONE_TABLE, UPDATED_AT_COLUMN,
};
use super::timestamp;
use super::value::{id_key, read_row, to_sql, Row};
use crate::error::StoreError;

/// Options for [`LocalStore::select`].
///
/// `filter` and `order_by` are SQL fragments supplied by the caller; values
/// must go through `params` as `?` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub filter: Option<String>,
    pub params: Vec<Value>,
    pub order_by: Option<String>,
    pub limit: Option<u32>,
}

impl SelectQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: impl Into<String>, params: Vec<Value>) -> Self {
        self.filter = Some(predicate.into());
        self.params = params;
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One entry of `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

/// Result of [`LocalStore::insert_with_generated_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedInsert {
    pub id: String,
    pub row_id: i64,
}

/// A locally deleted row waiting to be deleted remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub table: String,
    pub row_id: String,
    pub deleted_at: String,
}

/// Result of [`LocalStore::apply_replicated`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Rows written.
    pub applied: usize,
    /// Rows the local schema refused; they were skipped.
    pub rejected: usize,
}

/// Generate a UUID v4 identity.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn column_type(table: &str, column: &str) -> Option<ColumnType> {
    schema::table(table)
        .and_then(|def| def.column(column))
        .map(|col| col.ty)
}

fn insert_statement(verb: &str, table: &str, record: &Row) -> Statement {
    if record.is_empty() {
        return Statement::with_values(format!("{verb} INTO {} DEFAULT VALUES", quote(table)), vec![]);
    }
    let columns: Vec<String> = record.keys().map(|k| quote(k)).collect();
    let placeholders = vec!["?"; record.len()].join(", ");
    let params = record
        .iter()
        .map(|(k, v)| to_sql(v, column_type(table, k)))
        .collect();
    Statement::with_values(
        format!(
            "{verb} INTO {} ({}) VALUES ({placeholders})",
            quote(table),
            columns.join(", ")
        ),
        params,
    )
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::statement(sql, e))?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| read_row(row, &names))
        .map_err(|e| StoreError::statement(sql, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::statement(sql, e))?;
    Ok(rows)
}

fn execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<usize, StoreError> {
    conn.execute(sql, params_from_iter(params.iter()))
        .map_err(|e| StoreError::statement(sql, e))
}

/// Run replicated inserts in one transaction, skipping rows that fail.
///
/// A constraint failure aborts only its own statement in SQLite, so the
/// transaction stays usable for the remaining rows.
fn apply_rows(
    conn: &mut Connection,
    table: &str,
    statements: &[(String, Statement)],
) -> Result<(usize, usize), StoreError> {
    let tx = conn
        .transaction()
        .map_err(|e| StoreError::statement("BEGIN", e))?;
    let (mut applied, mut rejected) = (0, 0);
    for (id, statement) in statements {
        match execute(&tx, &statement.sql, &statement.params) {
            Ok(_) => applied += 1,
            Err(err) => {
                warn!(table, id = %id, error = %err, "replicated row rejected");
                rejected += 1;
            }
        }
    }
    tx.commit()
        .map_err(|e| StoreError::statement("COMMIT", e))?;
    Ok((applied, rejected))
}

impl LocalStore {
    fn validate_record(&self, table: &str, record: &Row, inserting: bool) -> Result<(), StoreError> {
        check_identifier(table, table)?;
        match schema::table(table) {
            Some(def) => def.validate(record, inserting),
            None => record.keys().try_for_each(|key| check_identifier(table, key)),
        }
    }

    /// Insert a record and return the generated rowid.
    ///
    /// # Errors
    /// `Validation` if the record does not fit the table declaration,
    /// `Statement` if SQLite rejects the insert.
    pub fn insert(&self, table: &str, record: &Row) -> Result<i64, StoreError> {
        self.validate_record(table, record, true)?;
        let statement = insert_statement("INSERT", table, record);
        self.with_conn(|conn| {
            execute(conn, &statement.sql, &statement.params)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert with a client-generated UUID v4 `id`.
    ///
    /// Only valid for tables declared with [`IdentityKind::Generated`].
    pub fn insert_with_generated_id(
        &self,
        table: &str,
        record: &Row,
    ) -> Result<GeneratedInsert, StoreError> {
        let def = schema::table(table)
            .ok_or_else(|| StoreError::validation(table, "not a registered table"))?;
        if def.identity != IdentityKind::Generated {
            return Err(StoreError::validation(
                table,
                "table uses auto-increment identities",
            ));
        }
        if record.contains_key(ID_COLUMN) {
            return Err(StoreError::validation(table, "record already carries an id"));
        }

        let id = generate_id();
        let mut record = record.clone();
        record.insert(ID_COLUMN.to_string(), json!(id));
        let row_id = self.insert(table, &record)?;
        Ok(GeneratedInsert { id, row_id })
    }

    /// Select rows. Never returns `None`; an empty result is an empty vec.
    pub fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        check_identifier(table, table)?;
        let mut sql = format!("SELECT * FROM {}", quote(table));
        if let Some(filter) = query.filter.as_deref().filter(|f| !f.trim().is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let Some(order) = query.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let params: Vec<SqlValue> = query.params.iter().map(|v| to_sql(v, None)).collect();
        self.with_conn(|conn| query_rows(conn, &sql, &params))
    }

    /// Update rows matching `filter`; returns the number of affected rows.
    pub fn update(
        &self,
        table: &str,
        changes: &Row,
        filter: &str,
        params: &[Value],
    ) -> Result<usize, StoreError> {
        self.validate_record(table, changes, false)?;
        if changes.is_empty() {
            return Err(StoreError::validation(table, "update without changes"));
        }
        if filter.trim().is_empty() {
            return Err(StoreError::validation(table, "update requires a filter"));
        }

        let assignments: Vec<String> = changes.keys().map(|k| format!("{} = ?", quote(k))).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {filter}",
            quote(table),
            assignments.join(", ")
        );
        let mut values: Vec<SqlValue> = changes
            .iter()
            .map(|(k, v)| to_sql(v, column_type(table, k)))
            .collect();
        values.extend(params.iter().map(|v| to_sql(v, None)));

        self.with_conn(|conn| execute(conn, &sql, &values))
    }

    /// Delete rows matching `filter`. Local only; see [`LocalStore::delete_tracked`].
    pub fn delete(&self, table: &str, filter: &str, params: &[Value]) -> Result<usize, StoreError> {
        check_identifier(table, table)?;
        if filter.trim().is_empty() {
            return Err(StoreError::validation(table, "delete requires a filter"));
        }
        let sql = format!("DELETE FROM {} WHERE {filter}", quote(table));
        let values: Vec<SqlValue> = params.iter().map(|v| to_sql(v, None)).collect();
        self.with_conn(|conn| execute(conn, &sql, &values))
    }

    /// Run statements atomically.
    ///
    /// # Errors
    /// The first failing statement's error, after an explicit rollback. No
    /// statement of the batch is applied in that case.
    pub fn run_in_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<StatementOutcome>, StoreError> {
        self.with_conn(|conn| run_transaction(conn, statements))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| table_exists(conn, table))
    }

    /// Column catalog of `table`; empty if the table does not exist.
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        const SQL: &str =
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)";
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(SQL)
                .map_err(|e| StoreError::statement(SQL, e))?;
            let columns = stmt
                .query_map([table], |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        decl_type: row.get(1)?,
                        not_null: row.get::<_, i64>(2)? != 0,
                        default: row.get(3)?,
                        primary_key: row.get::<_, i64>(4)? != 0,
                    })
                })
                .map_err(|e| StoreError::statement(SQL, e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::statement(SQL, e))?;
            Ok(columns)
        })
    }

    pub fn has_column(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        Ok(self.columns(table)?.iter().any(|c| c.name == column))
    }

    /// User tables in catalog order, excluding SQLite internals and
    /// `_`-prefixed bookkeeping tables.
    pub fn list_user_tables(&self) -> Result<Vec<String>, StoreError> {
        const SQL: &str = "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             AND name NOT LIKE '\\_%' ESCAPE '\\'";
        self.with_conn(|conn| {
            let rows = query_rows(conn, SQL, &[])?;
            Ok(rows
                .into_iter()
                .filter_map(|row| row.get("name").and_then(Value::as_str).map(String::from))
                .collect())
        })
    }

    /// Most recent `last_sync` of the table.
    ///
    /// `None` when the table or column is missing, no row has been synced,
    /// or the lookup fails.
    pub fn last_sync_marker(&self, table: &str) -> Option<String> {
        let lookup = || -> Result<Option<String>, StoreError> {
            check_identifier(table, table)?;
            if !self.table_exists(table)? {
                warn!(table, "table does not exist");
                return Ok(None);
            }
            if !self.has_column(table, LAST_SYNC_COLUMN)? {
                warn!(table, "table has no last_sync column");
                return Ok(None);
            }
            let sql = format!(
                "SELECT MAX({LAST_SYNC_COLUMN}) FROM {} WHERE {LAST_SYNC_COLUMN} IS NOT NULL",
                quote(table)
            );
            self.with_conn(|conn| {
                conn.query_row(&sql, [], |row| row.get::<_, Option<String>>(0))
                    .map_err(|e| StoreError::statement(&sql, e))
            })
        };

        match lookup() {
            Ok(marker) => marker,
            Err(err) => {
                warn!(table, error = %err, "could not read last sync marker");
                None
            }
        }
    }

    /// Write `timestamp` into every row's `last_sync`.
    ///
    /// Returns `Ok(false)` without touching anything if the column is absent.
    pub fn set_last_sync_marker(&self, table: &str, timestamp: &str) -> Result<bool, StoreError> {
        check_identifier(table, table)?;
        if !self.has_column(table, LAST_SYNC_COLUMN)? {
            warn!(table, "table has no last_sync column");
            return Ok(false);
        }
        let sql = format!("UPDATE {} SET {LAST_SYNC_COLUMN} = ?", quote(table));
        self.with_conn(|conn| execute(conn, &sql, &[SqlValue::Text(timestamp.to_string())]))?;
        Ok(true)
    }

    /// Rows never synced or modified after their last sync.
    pub fn unsynced_rows(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        check_identifier(table, table)?;
        let columns = self.columns(table)?;
        let has = |name: &str| columns.iter().any(|c| c.name == name);
        if !has(LAST_SYNC_COLUMN) {
            return Err(StoreError::validation(table, "table has no last_sync column"));
        }
        let predicate = if has(UPDATED_AT_COLUMN) {
            format!(
                "{LAST_SYNC_COLUMN} IS NULL OR {UPDATED_AT_COLUMN} > {LAST_SYNC_COLUMN}"
            )
        } else {
            format!("{LAST_SYNC_COLUMN} IS NULL")
        };
        let sql = format!("SELECT * FROM {} WHERE {predicate} ORDER BY rowid", quote(table));
        self.with_conn(|conn| query_rows(conn, &sql, &[]))
    }

    /// Stamp `last_sync` on the rows with the given ids, in one transaction.
    ///
    /// Returns the number of rows stamped.
    pub fn mark_synced(&self, table: &str, ids: &[Value], stamp: &str) -> Result<usize, StoreError> {
        check_identifier(table, table)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {} SET {LAST_SYNC_COLUMN} = ? WHERE {ID_COLUMN} = ?",
            quote(table)
        );
        let statements: Vec<Statement> = ids
            .iter()
            .map(|id| {
                Statement::with_values(
                    sql.clone(),
                    vec![SqlValue::Text(stamp.to_string()), to_sql(id, None)],
                )
            })
            .collect();
        let outcomes = self.run_in_transaction(&statements)?;
        Ok(outcomes.iter().map(StatementOutcome::changes).sum())
    }

    /// Insert-or-replace rows pulled from the remote store, stamping each
    /// with `stamp` as its `last_sync`.
    ///
    /// The batch commits as one transaction, but each row stands alone: a
    /// row the local schema rejects is logged and counted in
    /// [`ApplyOutcome::rejected`] while the rest of the batch is kept.
    /// Foreign-key enforcement is suspended for the batch: pulled rows may
    /// reference parents that arrive in a later table or batch.
    pub fn apply_replicated(
        &self,
        table: &str,
        rows: &[Row],
        stamp: &str,
    ) -> Result<ApplyOutcome, StoreError> {
        check_identifier(table, table)?;
        let stamps_updates = self.has_column(table, UPDATED_AT_COLUMN)?;
        let mut outcome = ApplyOutcome::default();
        let mut statements = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.get(ID_COLUMN).and_then(id_key).unwrap_or_default();
            if let Err(err) = row.keys().try_for_each(|key| check_identifier(table, key)) {
                warn!(table, id = %id, error = %err, "replicated row rejected");
                outcome.rejected += 1;
                continue;
            }
            let mut row = row.clone();
            row.insert(LAST_SYNC_COLUMN.to_string(), json!(stamp));
            // A missing updated_at would default to now and look dirty.
            if stamps_updates && row.get(UPDATED_AT_COLUMN).map_or(true, Value::is_null) {
                row.insert(UPDATED_AT_COLUMN.to_string(), json!(stamp));
            }
            statements.push((id, insert_statement("INSERT OR REPLACE", table, &row)));
        }

        let enforce = self.options().enforce_foreign_keys;
        self.with_conn(|conn| {
            if enforce {
                conn.pragma_update(None, "foreign_keys", false)
                    .map_err(|e| StoreError::statement("PRAGMA foreign_keys", e))?;
            }
            let result = apply_rows(conn, table, &statements);
            if enforce {
                conn.pragma_update(None, "foreign_keys", true)
                    .map_err(|e| StoreError::statement("PRAGMA foreign_keys", e))?;
            }
            let (applied, rejected) = result?;
            outcome.applied = applied;
            outcome.rejected += rejected;
            debug!(table, applied, rejected = outcome.rejected, "applied replicated rows");
            Ok(outcome)
        })
    }

    /// Clear `last_sync` on rows carrying `stamp`, undoing a partial pull.
    ///
    /// The cleared rows read as dirty and the table's marker falls back to
    /// the previous sync, so the next pull starts over from there.
    pub fn revert_stamp(&self, table: &str, stamp: &str) -> Result<usize, StoreError> {
        check_identifier(table, table)?;
        let sql = format!(
            "UPDATE {} SET {LAST_SYNC_COLUMN} = NULL WHERE {LAST_SYNC_COLUMN} = ?",
            quote(table)
        );
        self.with_conn(|conn| execute(conn, &sql, &[SqlValue::Text(stamp.to_string())]))
    }

    /// Delete a row by id and remember it for remote deletion.
    ///
    /// Returns the number of local rows deleted; no tombstone is written when
    /// nothing matched.
    pub fn delete_tracked(&self, table: &str, id: &Value) -> Result<usize, StoreError> {
        check_identifier(table, table)?;
        let key = id_key(id)
            .ok_or_else(|| StoreError::validation(table, "id must be a string or a number"))?;
        let delete_sql = format!("DELETE FROM {} WHERE {ID_COLUMN} = ?", quote(table));
        let tombstone_sql = format!(
            "INSERT OR REPLACE INTO {TOMBSTONE_TABLE} (table_name, row_id, deleted_at) VALUES (?1, ?2, ?3)"
        );

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::statement("BEGIN", e))?;
            let deleted = execute(&tx, &delete_sql, &[to_sql(id, None)])?;
            if deleted > 0 {
                execute(
                    &tx,
                    &tombstone_sql,
                    &[
                        SqlValue::Text(table.to_string()),
                        SqlValue::Text(key),
                        SqlValue::Text(timestamp::now()),
                    ],
                )?;
            }
            tx.commit()
                .map_err(|e| StoreError::statement("COMMIT", e))?;
            Ok(deleted)
        })
    }

    pub fn pending_tombstones(&self, table: &str) -> Result<Vec<Tombstone>, StoreError> {
        let sql = format!(
            "SELECT table_name, row_id, deleted_at FROM {TOMBSTONE_TABLE} \
             WHERE table_name = ?1 ORDER BY deleted_at"
        );
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::statement(&sql, e))?;
            let tombstones = stmt
                .query_map([table], |row| {
                    Ok(Tombstone {
                        table: row.get(0)?,
                        row_id: row.get(1)?,
                        deleted_at: row.get(2)?,
                    })
                })
                .map_err(|e| StoreError::statement(&sql, e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::statement(&sql, e))?;
            Ok(tombstones)
        })
    }

    pub fn clear_tombstone(&self, table: &str, row_id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {TOMBSTONE_TABLE} WHERE table_name = ?1 AND row_id = ?2");
        let removed = self.with_conn(|conn| {
            execute(
                conn,
                &sql,
                &[
                    SqlValue::Text(table.to_string()),
                    SqlValue::Text(row_id.to_string()),
                ],
            )
        })?;
        Ok(removed > 0)
    }
}
