//! Sync engine for bidirectional table synchronization.
//!
//! Each table goes through probe, remote deletes, pull, normalize, local
//! apply, dirty collection and push. Pulled rows never overwrite a local edit
//! that is newer than the remote copy; those rows are pushed instead.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::conflict_resolver::{self, decide_merge, push_payload, updated_at, MergeDecision};
use super::connectivity::{ConnectivityProbe, DEFAULT_PROBE_TIMEOUT};
use super::normalize::Normalizer;
use super::postgrest_client::PostgrestClient;
use super::remote::{row_id, RemoteStore};
use super::types::{
    ResolveReport, SyncPhase, SyncReport, SyncStatus, TableStatus, TableSyncResult,
};
use crate::error::{StoreError, SyncError};
use crate::storage::schema::{self, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::storage::{timestamp, Config, LocalStore, Row};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Rows per local transaction when applying pulls and stamping pushes.
    pub batch_size: usize,
    /// Tables synced by [`SyncEngine::full_sync`] after the registered ones.
    pub extra_tables: Vec<String>,
    pub probe_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            extra_tables: Vec::new(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.sync.batch_size as usize,
            extra_tables: config.sync.extra_tables.clone(),
            probe_timeout: Duration::from_secs(config.remote.probe_timeout_secs),
        }
    }
}

/// Pending pushes and deletes for every registered table present locally.
///
/// Reads only the local store, so it works without remote credentials.
pub fn pending_work(store: &LocalStore) -> Result<Vec<TableStatus>, StoreError> {
    let mut tables = Vec::new();
    for name in schema::table_names() {
        if !store.table_exists(name)? {
            continue;
        }
        tables.push(TableStatus {
            table: name.to_string(),
            last_sync: store.last_sync_marker(name),
            pending_count: store.unsynced_rows(name)?.len(),
            pending_deletes: store.pending_tombstones(name)?.len(),
        });
    }
    Ok(tables)
}

/// Split `items` into contiguous chunks of `size`; the last may be shorter.
/// A size of 0 is treated as 1.
pub fn chunk<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sync engine managing bidirectional sync.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    probe: ConnectivityProbe,
    options: SyncOptions,
    in_progress: AtomicBool,
    phase: Mutex<SyncPhase>,
}

impl SyncEngine {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        let probe = ConnectivityProbe::new(Arc::clone(&remote), options.probe_timeout);
        Self {
            store,
            remote,
            probe,
            options,
            in_progress: AtomicBool::new(false),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Engine against the configured PostgREST endpoint.
    ///
    /// # Errors
    /// `MissingKey` when the remote URL or key is not configured.
    pub fn from_config(store: Arc<LocalStore>, config: &Config) -> crate::error::Result<Self> {
        let remote = PostgrestClient::from_config(config)?;
        Ok(Self::new(store, Arc::new(remote), SyncOptions::from_config(config)))
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Phase of the table currently being synced.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn begin(&self) -> Result<RunGuard<'_>, SyncError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(RunGuard(&self.in_progress))
    }

    /// Sync one table.
    ///
    /// Failures inside the run are reported in the result; only a concurrent
    /// run is an `Err`.
    pub async fn sync_table(&self, table: &str) -> Result<TableSyncResult, SyncError> {
        let _guard = self.begin()?;
        Ok(self.sync_table_reported(table).await)
    }

    /// Sync the registered tables plus the configured extra tables.
    pub async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.begin()?;
        let mut tables: Vec<String> = schema::table_names().into_iter().map(String::from).collect();
        for extra in &self.options.extra_tables {
            if !tables.contains(extra) {
                tables.push(extra.clone());
            }
        }

        info!(tables = tables.len(), "starting full sync");
        let mut report = SyncReport::new();
        for table in tables {
            let result = match self.store.table_exists(&table) {
                Ok(true) => self.sync_table_reported(&table).await,
                Ok(false) => {
                    warn!(table = %table, "table missing locally");
                    TableSyncResult::missing(&table)
                }
                Err(err) => TableSyncResult::failed(&table, err),
            };
            report.insert(table, result);
        }
        log_report("full sync finished", &report);
        Ok(report)
    }

    /// Sync every user table found in the local catalog.
    pub async fn incremental_sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.begin()?;
        let tables = self.store.list_user_tables()?;

        info!(tables = tables.len(), "starting incremental sync");
        let mut report = SyncReport::new();
        for table in tables {
            let result = self.sync_table_reported(&table).await;
            report.insert(table, result);
        }
        log_report("incremental sync finished", &report);
        Ok(report)
    }

    /// Resolve every dirty row of `table` by last-writer-wins.
    pub async fn resolve_conflicts(&self, table: &str) -> Result<ResolveReport, SyncError> {
        let _guard = self.begin()?;
        if !self.store.table_exists(table)? {
            return Err(StoreError::validation(table, "table missing locally").into());
        }
        Ok(conflict_resolver::resolve_table(&self.store, self.remote.as_ref(), table).await?)
    }

    /// Pending work per registered table.
    pub fn status(&self) -> Result<SyncStatus, StoreError> {
        Ok(SyncStatus {
            in_progress: self.is_running(),
            tables: pending_work(&self.store)?,
        })
    }

    async fn sync_table_reported(&self, table: &str) -> TableSyncResult {
        let result = match self.run_table(table).await {
            Ok(result) => result,
            Err(err) => {
                error!(table, error = %err, "table sync failed");
                TableSyncResult::failed(table, err)
            }
        };
        self.set_phase(SyncPhase::Idle);
        result
    }

    async fn run_table(&self, table: &str) -> Result<TableSyncResult, SyncError> {
        self.set_phase(SyncPhase::ProbingConnectivity);
        if !self.probe.is_reachable().await {
            self.set_phase(SyncPhase::Offline);
            info!(table, "remote store offline, skipping table");
            return Ok(TableSyncResult::offline(table));
        }
        self.set_phase(SyncPhase::Online);

        let mut result = TableSyncResult::new(table);
        let marker = self.store.last_sync_marker(table);
        let stamp = timestamp::now();
        debug!(table, marker = ?marker, "syncing table");

        // Local deletions go out first so the pull cannot bring them back.
        self.set_phase(SyncPhase::DeletingRemote);
        let mut tombstoned = HashSet::new();
        for tombstone in self.store.pending_tombstones(table)? {
            match self.remote.delete_by_id(table, &tombstone.row_id).await {
                Ok(()) => {
                    self.store.clear_tombstone(table, &tombstone.row_id)?;
                    result.deleted_remote += 1;
                }
                Err(err) => {
                    warn!(table, id = %tombstone.row_id, error = %err, "remote delete failed");
                }
            }
            tombstoned.insert(tombstone.row_id);
        }

        self.set_phase(SyncPhase::Pulling);
        let since = if self.store.has_column(table, UPDATED_AT_COLUMN)? {
            marker.as_deref()
        } else {
            None
        };
        let remote_rows = self.remote.select_since(table, since).await?;

        self.set_phase(SyncPhase::Transforming);
        let normalizer = Normalizer::new(table, &self.store.columns(table)?);
        let dirty: HashMap<String, Row> = self
            .store
            .unsynced_rows(table)?
            .into_iter()
            .filter_map(|row| row_id(&row).map(|id| (id, row)))
            .collect();

        let mut incoming = Vec::with_capacity(remote_rows.len());
        for row in remote_rows {
            let row = normalizer.normalize(row);
            let Some(id) = row_id(&row) else {
                warn!(table, "remote row without id skipped");
                continue;
            };
            if tombstoned.contains(&id) {
                result.kept_local += 1;
                continue;
            }
            if let Some(local) = dirty.get(&id) {
                if decide_merge(updated_at(local), updated_at(&row)) == MergeDecision::UseLocal {
                    result.kept_local += 1;
                    continue;
                }
            }
            incoming.push(row);
        }

        self.set_phase(SyncPhase::ApplyingLocal);
        for batch in chunk(&incoming, self.options.batch_size) {
            match self.store.apply_replicated(table, batch, &stamp) {
                Ok(outcome) => {
                    result.pulled += outcome.applied;
                    result.rejected_pulls += outcome.rejected;
                }
                Err(err) => {
                    // Earlier batches carry this run's stamp; leaving it would
                    // move the marker past rows that were never applied.
                    match self.store.revert_stamp(table, &stamp) {
                        Ok(reverted) => debug!(table, reverted, "reverted partial pull"),
                        Err(revert) => warn!(table, error = %revert, "could not revert partial pull"),
                    }
                    return Err(err.into());
                }
            }
        }

        self.set_phase(SyncPhase::CollectingDirty);
        let to_push = self.store.unsynced_rows(table)?;

        self.set_phase(SyncPhase::Pushing);
        for batch in chunk(&to_push, self.options.batch_size) {
            let mut pushed_ids: Vec<Value> = Vec::with_capacity(batch.len());
            for row in batch {
                match self.remote.upsert(table, &push_payload(row)).await {
                    Ok(()) => pushed_ids.push(row.get(ID_COLUMN).cloned().unwrap_or(Value::Null)),
                    Err(err) => {
                        result.failed_pushes += 1;
                        warn!(table, id = ?row_id(row), error = %err, "push failed, row stays dirty");
                    }
                }
            }
            result.pushed += self.store.mark_synced(table, &pushed_ids, &stamp)?;
        }

        self.set_phase(SyncPhase::Resolved);
        result.success = true;
        result.last_sync = Some(stamp);
        info!(
            table,
            pulled = result.pulled,
            rejected_pulls = result.rejected_pulls,
            pushed = result.pushed,
            failed_pushes = result.failed_pushes,
            deleted_remote = result.deleted_remote,
            "table synced"
        );
        Ok(result)
    }
}

fn log_report(message: &str, report: &SyncReport) {
    let failed = report.values().filter(|r| !r.success).count();
    info!(tables = report.len(), failed, "{message}");
}
