//! Port to the remote relational store.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;
use crate::storage::Row;

/// Every remote backend implements this trait.
///
/// Rows are JSON objects keyed by column name; identities are passed in their
/// string form.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Trivial bounded read used to decide reachability.
    async fn probe(&self) -> Result<(), RemoteError>;

    /// Rows of `table`, optionally only those with `updated_at >= since`.
    async fn select_since(&self, table: &str, since: Option<&str>) -> Result<Vec<Row>, RemoteError>;

    /// One row by `id`; `Ok(None)` when it does not exist.
    async fn fetch_by_id(&self, table: &str, id: &str) -> Result<Option<Row>, RemoteError>;

    /// Insert or update one row keyed by `id`.
    async fn upsert(&self, table: &str, row: &Row) -> Result<(), RemoteError>;

    /// Delete one row by `id`. Deleting a missing row is not an error.
    async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), RemoteError>;
}

/// `id` of a row in string form.
pub fn row_id(row: &Row) -> Option<String> {
    row.get(crate::storage::schema::ID_COLUMN)
        .and_then(crate::storage::value::id_key)
}

/// Convenience for building a JSON row in tests and callers.
pub fn row_from(value: Value) -> Option<Row> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
