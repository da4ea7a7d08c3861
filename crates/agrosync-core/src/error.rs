//! Core error types for agrosync-core.
//!
//! Each layer owns its error enum: the embedded store ([`StoreError`]), the
//! remote store transport ([`RemoteError`]), the sync engine ([`SyncError`])
//! and configuration ([`ConfigError`]). [`CoreError`] wraps them all for
//! callers that only want one type.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for agrosync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Embedded store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote store errors
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Sync engine errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Embedded store errors.
///
/// Values are cloneable so that a single bootstrap failure can be handed to
/// every operation that was queued while the store was initializing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The current runtime has no filesystem-backed SQLite.
    #[error("Embedded database is not supported on this runtime")]
    EnvironmentUnsupported,

    /// The linked SQLite engine cannot serve the schema.
    #[error("SQLite engine unavailable: {0}")]
    ModuleUnavailable(String),

    /// An operation ran before `initialize()` completed.
    #[error("Local database is not initialized")]
    NotInitialized,

    /// The store was closed.
    #[error("Local database is closed")]
    Closed,

    /// Failed to open database connection
    #[error("Failed to open database at {path}: {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// A statement failed (malformed SQL, constraint violation, ...)
    #[error("Statement failed: {message}")]
    Statement { sql: String, message: String },

    /// Record or identifier rejected before any SQL was built
    #[error("Invalid input for '{table}': {message}")]
    Validation { table: String, message: String },

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Filesystem errors around the database file
    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Wrap a rusqlite failure for the statement that produced it.
    pub fn statement(sql: impl Into<String>, err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, _) = &err {
            if inner.code == rusqlite::ErrorCode::DatabaseBusy
                || inner.code == rusqlite::ErrorCode::DatabaseLocked
            {
                return StoreError::Locked;
            }
        }
        StoreError::Statement {
            sql: sql.into(),
            message: err.to_string(),
        }
    }

    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            table: table.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Remote store errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Probe failed or the host could not be reached
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Remote store returned {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Call exceeded its deadline
    #[error("Remote call timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Response body could not be decoded
    #[error("Failed to decode remote response: {0}")]
    Decode(String),

    /// Bad base URL
    #[error("Invalid remote URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

/// Sync engine errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote request error: {0}")]
    Remote(#[from] RemoteError),

    /// Fetching the remote counterpart of a dirty row failed for a reason
    /// other than not-found.
    #[error("Conflict resolution failed for {table}#{id}: {source}")]
    ConflictResolution {
        table: String,
        id: String,
        #[source]
        source: RemoteError,
    },

    #[error("A sync run is already in progress")]
    AlreadyRunning,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
