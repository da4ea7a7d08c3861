//! Sync subcommand for the remote store.
//!
//! Every action except `status` resolves the remote credentials first, so a
//! missing URL or key fails before the database is touched.

use std::sync::Arc;

use agrosync_core::sync::{pending_work, ConnectivityProbe, SyncReport, SyncStatus};
use agrosync_core::{Config, PostgrestClient, SyncEngine, SyncOptions, TableSyncResult};
use clap::Subcommand;

use super::{open_store, print_json};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Synchronize one table
    Table {
        /// Table name
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synchronize every registered table
    Full {
        #[arg(long)]
        json: bool,
    },
    /// Synchronize every table found in the local database
    Incremental {
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts for a table by last-writer-wins
    Resolve {
        /// Table name
        table: String,
        #[arg(long)]
        json: bool,
    },
    /// Check whether the remote store is reachable
    Probe,
    /// Show pending work per table
    Status {
        #[arg(long)]
        json: bool,
    },
}

/// Run the sync command.
pub fn run(action: SyncAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    if let SyncAction::Status { json } = action {
        return print_status(&config, json);
    }
    let remote = Arc::new(PostgrestClient::from_config(&config)?);
    let runtime = tokio::runtime::Runtime::new()?;

    if let SyncAction::Probe = action {
        let probe = ConnectivityProbe::new(
            remote,
            std::time::Duration::from_secs(config.remote.probe_timeout_secs),
        );
        return match runtime.block_on(probe.check()) {
            Ok(()) => {
                println!("remote store reachable");
                Ok(())
            }
            Err(e) => Err(format!("remote store unreachable: {e}").into()),
        };
    }

    let store = Arc::new(open_store(&config)?);
    let engine = SyncEngine::new(store, remote, SyncOptions::from_config(&config));

    match action {
        SyncAction::Table { table, json } => {
            let result = runtime.block_on(engine.sync_table(&table))?;
            if json {
                print_json(&result)?;
            } else {
                print_result(&result);
            }
            if !result.success {
                return Err(format!("sync of {table} did not complete").into());
            }
        }
        SyncAction::Full { json } => {
            let report = runtime.block_on(engine.full_sync())?;
            print_report(&report, json)?;
        }
        SyncAction::Incremental { json } => {
            let report = runtime.block_on(engine.incremental_sync())?;
            print_report(&report, json)?;
        }
        SyncAction::Resolve { table, json } => {
            let report = runtime.block_on(engine.resolve_conflicts(&table))?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{table}: {} examined, {} kept local, {} took remote, {} skipped",
                    report.examined, report.kept_local, report.took_remote, report.skipped
                );
                for error in &report.errors {
                    println!("  {error}");
                }
            }
        }
        SyncAction::Probe | SyncAction::Status { .. } => {}
    }
    Ok(())
}

/// Local-only view of pending work; needs no remote credentials.
fn print_status(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config)?;
    let status = SyncStatus {
        in_progress: false,
        tables: pending_work(&store)?,
    };
    if json {
        return print_json(&status);
    }
    for table in &status.tables {
        println!(
            "{}\tpending: {}\tdeletes: {}\tlast sync: {}",
            table.table,
            table.pending_count,
            table.pending_deletes,
            table.last_sync.as_deref().unwrap_or("never")
        );
    }
    Ok(())
}

fn print_result(result: &TableSyncResult) {
    if result.offline {
        println!("{}: offline, skipped", result.table);
        return;
    }
    match &result.error {
        Some(error) => println!("{}: failed: {error}", result.table),
        None => println!(
            "{}: pulled {} (rejected {}), pushed {}, failed {}, deleted remotely {}",
            result.table,
            result.pulled,
            result.rejected_pulls,
            result.pushed,
            result.failed_pushes,
            result.deleted_remote
        ),
    }
}

fn print_report(report: &SyncReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        return print_json(report);
    }
    for result in report.values() {
        print_result(result);
    }
    let failed = report.values().filter(|r| !r.success).count();
    println!("{} table(s), {failed} not synced", report.len());
    Ok(())
}
