//! Core types for table synchronization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a table sync currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    ProbingConnectivity,
    Offline,
    Online,
    DeletingRemote,
    Pulling,
    Transforming,
    ApplyingLocal,
    CollectingDirty,
    Pushing,
    Resolved,
}

/// Outcome of syncing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSyncResult {
    pub table: String,
    pub success: bool,
    /// The remote store was unreachable; nothing was touched.
    pub offline: bool,
    /// Remote rows written locally.
    pub pulled: usize,
    /// Pulled rows the local schema refused; they were skipped.
    pub rejected_pulls: usize,
    /// Local rows upserted remotely.
    pub pushed: usize,
    /// Pushes that failed; those rows stay dirty.
    pub failed_pushes: usize,
    /// Local deletions propagated to the remote store.
    pub deleted_remote: usize,
    /// Pulled rows skipped because the local copy is newer or deleted.
    pub kept_local: usize,
    /// Sync timestamp stamped into `last_sync`.
    pub last_sync: Option<String>,
    pub error: Option<String>,
}

impl TableSyncResult {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn offline(table: &str) -> Self {
        Self {
            offline: true,
            error: Some("remote store unreachable".into()),
            ..Self::new(table)
        }
    }

    pub fn failed(table: &str, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(table)
        }
    }

    pub fn missing(table: &str) -> Self {
        Self::failed(table, "table missing locally")
    }
}

/// Per-table results of a full or incremental sync, keyed by table name.
pub type SyncReport = BTreeMap<String, TableSyncResult>;

/// Outcome of a conflict resolution pass over one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub table: String,
    /// Dirty rows examined.
    pub examined: usize,
    /// Rows where the local copy won and was pushed.
    pub kept_local: usize,
    /// Rows overwritten by a newer remote copy.
    pub took_remote: usize,
    /// Rows skipped because the remote copy could not be fetched or the push failed.
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Current sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether a sync is currently in progress.
    pub in_progress: bool,
    pub tables: Vec<TableStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatus {
    pub table: String,
    pub last_sync: Option<String>,
    /// Number of rows waiting to be pushed.
    pub pending_count: usize,
    /// Local deletions waiting to be propagated.
    pub pending_deletes: usize,
}
