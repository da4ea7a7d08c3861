//! Bidirectional synchronization between the local store and a remote
//! PostgREST store.
//!
//! Pull is applied before push; conflicts are settled by last-writer-wins on
//! `updated_at`.

pub mod conflict_resolver;
pub mod connectivity;
pub mod normalize;
pub mod postgrest_client;
pub mod remote;
pub mod sync_engine;
pub mod types;


pub use conflict_resolver::{decide_merge, MergeDecision};
pub use connectivity::ConnectivityProbe;
pub use normalize::Normalizer;
pub use postgrest_client::PostgrestClient;
pub use remote::RemoteStore;
pub use sync_engine::{chunk, pending_work, SyncEngine, SyncOptions};
pub use types::{ResolveReport, SyncPhase, SyncReport, SyncStatus, TableStatus, TableSyncResult};
