//! # Agrosync Core Library
//!
//! Offline-first persistence for the farm-management app: an embedded SQLite
//! store that the app reads and writes directly, and a sync engine that
//! reconciles it with a remote PostgREST store whenever the network allows.
//!
//! ## Architecture
//!
//! - **Storage**: bootstrap of the embedded database from a static table
//!   registry, a table-agnostic query facade with sync bookkeeping, and
//!   TOML-based configuration
//! - **Sync**: per-table pull-then-push with last-writer-wins conflict
//!   resolution, tombstone-based delete propagation and a bounded
//!   connectivity probe
//!
//! ## Key Components
//!
//! - [`LocalStore`]: Embedded database handle and query facade
//! - [`SyncEngine`]: Table, full and incremental sync orchestration
//! - [`RemoteStore`]: Port to the remote store, implemented by [`PostgrestClient`]
//! - [`Config`]: Application configuration management

pub mod error;
pub mod storage;
pub mod sync;

pub use error::{ConfigError, CoreError, RemoteError, StoreError, SyncError};
pub use storage::{Config, LocalStore, Row, SelectQuery, Statement, StoreOptions};
pub use sync::{PostgrestClient, RemoteStore, SyncEngine, SyncOptions, TableSyncResult};
