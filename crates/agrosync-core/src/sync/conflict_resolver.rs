//! Last-writer-wins conflict resolution between local and remote rows.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use super::normalize::Normalizer;
use super::remote::RemoteStore;
use super::types::ResolveReport;
use crate::error::{StoreError, SyncError};
use crate::storage::schema::{ID_COLUMN, LAST_SYNC_COLUMN, UPDATED_AT_COLUMN};
use crate::storage::value::id_key;
use crate::storage::{timestamp, LocalStore, Row};

/// Merge decision for conflicting rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    UseLocal,
    UseRemote,
}

/// Remote wins only when strictly newer; a missing timestamp counts as the epoch.
pub fn decide_merge(
    local_updated: Option<DateTime<Utc>>,
    remote_updated: Option<DateTime<Utc>>,
) -> MergeDecision {
    let local = local_updated.unwrap_or(DateTime::UNIX_EPOCH);
    let remote = remote_updated.unwrap_or(DateTime::UNIX_EPOCH);
    if remote > local {
        MergeDecision::UseRemote
    } else {
        MergeDecision::UseLocal
    }
}

/// `updated_at` of a row, if present and parseable.
pub fn updated_at(row: &Row) -> Option<DateTime<Utc>> {
    row.get(UPDATED_AT_COLUMN)
        .and_then(Value::as_str)
        .and_then(timestamp::parse)
}

/// Row as sent to the remote store: everything but the local sync marker.
pub fn push_payload(row: &Row) -> Row {
    let mut payload = row.clone();
    payload.remove(LAST_SYNC_COLUMN);
    payload
}

/// Resolve every dirty row of `table` against its remote counterpart.
///
/// Per-row failures are logged and counted; the row is left dirty. Only local
/// store failures abort the pass.
pub(crate) async fn resolve_table(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    table: &str,
) -> Result<ResolveReport, StoreError> {
    let mut report = ResolveReport {
        table: table.to_string(),
        ..ResolveReport::default()
    };
    let dirty = store.unsynced_rows(table)?;
    let normalizer = Normalizer::new(table, &store.columns(table)?);

    for local in dirty {
        report.examined += 1;
        let Some((id_value, id)) = local
            .get(ID_COLUMN)
            .and_then(|v| id_key(v).map(|key| (v.clone(), key)))
        else {
            warn!(table, "dirty row without id skipped");
            report.skipped += 1;
            continue;
        };

        let remote_row = match remote.fetch_by_id(table, &id).await {
            Ok(row) => row,
            Err(source) => {
                let err = SyncError::ConflictResolution {
                    table: table.to_string(),
                    id: id.clone(),
                    source,
                };
                error!(table, id = %id, error = %err, "conflict resolution failed");
                report.errors.push(err.to_string());
                report.skipped += 1;
                continue;
            }
        };

        let stamp = timestamp::now();
        let decision = match &remote_row {
            None => MergeDecision::UseLocal,
            Some(remote_row) => decide_merge(updated_at(&local), updated_at(remote_row)),
        };

        match (decision, remote_row) {
            (MergeDecision::UseRemote, Some(remote_row)) => {
                let row = normalizer.normalize(remote_row);
                if store.apply_replicated(table, &[row], &stamp)?.rejected > 0 {
                    report.errors.push(format!("remote copy of {table}#{id} rejected locally"));
                    report.skipped += 1;
                } else {
                    report.took_remote += 1;
                }
            }
            _ => match remote.upsert(table, &push_payload(&local)).await {
                Ok(()) => {
                    store.mark_synced(table, &[id_value], &stamp)?;
                    report.kept_local += 1;
                }
                Err(err) => {
                    warn!(table, id = %id, error = %err, "push of local winner failed");
                    report.errors.push(err.to_string());
                    report.skipped += 1;
                }
            },
        }
    }

    info!(
        table,
        examined = report.examined,
        kept_local = report.kept_local,
        took_remote = report.took_remote,
        skipped = report.skipped,
        "conflict resolution finished"
    );
    Ok(report)
}
