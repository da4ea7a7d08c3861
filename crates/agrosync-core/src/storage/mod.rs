mod config;
pub mod local_store;
pub mod query;
pub mod schema;
pub mod timestamp;
pub mod value;

pub use config::{Config, RemoteConfig, StoreConfig, SyncConfig, REMOTE_KEY_ENV, REMOTE_URL_ENV};
pub use local_store::{
    Completion, LocalStore, Statement, StatementOutcome, StoreLocation, StoreOptions, StorePhase,
};
pub use query::{generate_id, ApplyOutcome, ColumnInfo, GeneratedInsert, SelectQuery, Tombstone};
pub use schema::{ColumnDef, ColumnType, IdentityKind, TableDef, TABLES};
pub use value::Row;

use std::path::PathBuf;

/// Environment variable selecting the data directory flavor.
pub const ENV_VAR: &str = "AGROSYNC_ENV";

/// Returns `~/.config/agrosync[-dev]/` based on AGROSYNC_ENV.
///
/// Set AGROSYNC_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("agrosync-dev")
    } else {
        base_dir.join("agrosync")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
