//! Embedded SQLite store: bootstrap, lifecycle and pending-operation queue.
//!
//! [`LocalStore`] owns exactly one connection. It moves through
//! `Uninitialized -> Initializing -> Ready | Failed`; statements submitted
//! before `Ready` are queued and resolved in submission order once the schema
//! exists, or rejected with the bootstrap error.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::config::Config;
use super::schema::{self, SENTINEL_TABLE};
use super::value::{read_row, to_sql, Row};
use crate::error::StoreError;

/// Oldest SQLite accepted (upsert syntax, `pragma_table_info`).
const MIN_SQLITE_VERSION: i32 = 3_024_000;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "{}", path.display()),
            StoreLocation::Memory => write!(f, ":memory:"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub location: StoreLocation,
    pub enforce_foreign_keys: bool,
}

impl StoreOptions {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            enforce_foreign_keys: true,
        }
    }

    pub fn memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            enforce_foreign_keys: true,
        }
    }

    /// Database file inside the data directory, per `store.*` settings.
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let path = super::data_dir()?.join(&config.store.file_name);
        Ok(Self {
            location: StoreLocation::File(path),
            enforce_foreign_keys: config.store.enforce_foreign_keys,
        })
    }
}

/// Lifecycle phase of a [`LocalStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

/// A parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// Build a statement binding JSON parameters.
    pub fn new(sql: impl Into<String>, params: &[Value]) -> Self {
        Self {
            sql: sql.into(),
            params: params.iter().map(|v| to_sql(v, None)).collect(),
        }
    }

    pub fn with_values(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Result of running one [`Statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    /// The statement produced a result set.
    Rows(Vec<Row>),
    /// The statement modified data.
    Changed { changes: usize, last_insert_rowid: i64 },
}

impl StatementOutcome {
    pub fn changes(&self) -> usize {
        match self {
            StatementOutcome::Rows(_) => 0,
            StatementOutcome::Changed { changes, .. } => *changes,
        }
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            StatementOutcome::Rows(rows) => rows,
            StatementOutcome::Changed { .. } => &[],
        }
    }
}

/// Completion handle for a submitted statement.
pub type Completion = oneshot::Receiver<Result<StatementOutcome, StoreError>>;

struct PendingOp {
    statement: Statement,
    reply: oneshot::Sender<Result<StatementOutcome, StoreError>>,
}

struct Inner {
    phase: StorePhase,
    conn: Option<Connection>,
    pending: VecDeque<PendingOp>,
    schema_creations: u32,
}

/// Handle to the embedded database.
pub struct LocalStore {
    options: StoreOptions,
    inner: Mutex<Inner>,
}

impl LocalStore {
    /// Create an uninitialized handle. Call [`LocalStore::initialize`] before use.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(Inner {
                phase: StorePhase::Uninitialized,
                conn: None,
                pending: VecDeque::new(),
                schema_creations: 0,
            }),
        }
    }

    /// Create and initialize in one step.
    ///
    /// # Errors
    /// Returns the bootstrap error if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let store = Self::new(options);
        store.initialize()?;
        Ok(store)
    }

    /// Open a ready in-memory database.
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::open(StoreOptions::memory())
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> StorePhase {
        self.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == StorePhase::Ready
    }

    /// How many times the full DDL script ran on this handle.
    pub fn schema_creations(&self) -> u32 {
        self.lock().schema_creations
    }

    /// Number of statements waiting for readiness.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Open the database, create the schema if needed and drain the queue.
    ///
    /// Calling this on a ready store only re-confirms the connection.
    ///
    /// # Errors
    /// `EnvironmentUnsupported` / `ModuleUnavailable` when SQLite cannot be
    /// used, `OpenFailed` / `Statement` when opening or DDL fails. Every
    /// queued statement receives the same error.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.phase == StorePhase::Ready {
            let conn = inner.conn.as_ref().ok_or(StoreError::NotInitialized)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| StoreError::statement("SELECT 1", e))?;
            debug!("local store already initialized");
            return Ok(());
        }

        info!(location = %self.options.location, "initializing local store");
        inner.phase = StorePhase::Initializing;

        match self.bootstrap() {
            Ok((conn, created)) => {
                if created {
                    inner.schema_creations += 1;
                }
                let conn = inner.conn.insert(conn);
                inner.phase = StorePhase::Ready;

                let pending = std::mem::take(&mut inner.pending);
                if !pending.is_empty() {
                    debug!(count = pending.len(), "draining queued statements");
                }
                for op in pending {
                    let result = run_statement(conn, &op.statement);
                    if op.reply.send(result).is_err() {
                        debug!("queued statement caller went away");
                    }
                }
                info!(created_schema = created, "local store ready");
                Ok(())
            }
            Err(err) => {
                inner.phase = StorePhase::Failed;
                for op in std::mem::take(&mut inner.pending) {
                    let _ = op.reply.send(Err(err.clone()));
                }
                error!(error = %err, "local store initialization failed");
                Err(err)
            }
        }
    }

    fn bootstrap(&self) -> Result<(Connection, bool), StoreError> {
        check_environment()?;

        let conn = match &self.options.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)
            }
            StoreLocation::Memory => Connection::open_in_memory(),
        }
        .map_err(|e| StoreError::OpenFailed {
            path: match &self.options.location {
                StoreLocation::File(path) => path.clone(),
                StoreLocation::Memory => PathBuf::from(":memory:"),
            },
            message: e.to_string(),
        })?;

        conn.pragma_update(None, "foreign_keys", self.options.enforce_foreign_keys)
            .map_err(|e| StoreError::statement("PRAGMA foreign_keys", e))?;

        let created = ensure_schema(&conn)?;
        Ok((conn, created))
    }

    /// Run a statement now if ready, otherwise queue it until initialization.
    pub fn submit(&self, statement: Statement) -> Completion {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.phase {
            StorePhase::Ready => {
                let result = match inner.conn.as_ref() {
                    Some(conn) => run_statement(conn, &statement),
                    None => Err(StoreError::NotInitialized),
                };
                let _ = tx.send(result);
            }
            StorePhase::Closed => {
                let _ = tx.send(Err(StoreError::Closed));
            }
            _ => {
                debug!(sql = %statement.sql, "queueing statement until store is ready");
                inner.pending.push_back(PendingOp {
                    statement,
                    reply: tx,
                });
            }
        }
        rx
    }

    /// Run a single statement on a ready store.
    pub fn execute(&self, statement: &Statement) -> Result<StatementOutcome, StoreError> {
        self.with_conn(|conn| run_statement(conn, statement))
    }

    /// Borrow the connection of a ready store.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock();
        match guard.phase {
            StorePhase::Ready => {}
            StorePhase::Closed => return Err(StoreError::Closed),
            _ => return Err(StoreError::NotInitialized),
        }
        let conn = guard.conn.as_mut().ok_or(StoreError::NotInitialized)?;
        f(conn)
    }

    /// Release the connection. Queued statements are rejected.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for op in std::mem::take(&mut inner.pending) {
            let _ = op.reply.send(Err(StoreError::Closed));
        }
        inner.phase = StorePhase::Closed;
        if let Some(conn) = inner.conn.take() {
            conn.close()
                .map_err(|(_, e)| StoreError::statement("close", e))?;
            info!("local store closed");
        }
        Ok(())
    }

    /// Close the store and remove its database file. Development helper.
    pub fn delete_database_file(&self) -> Result<(), StoreError> {
        self.close()?;
        if let StoreLocation::File(path) = &self.options.location {
            remove_if_exists(path)?;
            warn!(path = %path.display(), "local database deleted");
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn check_environment() -> Result<(), StoreError> {
    if cfg!(target_family = "wasm") {
        return Err(StoreError::EnvironmentUnsupported);
    }
    if rusqlite::version_number() < MIN_SQLITE_VERSION {
        return Err(StoreError::ModuleUnavailable(format!(
            "SQLite {} is older than the required 3.24.0",
            rusqlite::version()
        )));
    }
    Ok(())
}

/// Create the schema unless the sentinel table already exists.
///
/// Returns whether the DDL script ran.
fn ensure_schema(conn: &Connection) -> Result<bool, StoreError> {
    if table_exists(conn, SENTINEL_TABLE)? {
        debug!(sentinel = SENTINEL_TABLE, "schema already present");
        return Ok(false);
    }
    info!("creating local schema");
    let script = schema::schema_sql();
    conn.execute_batch(&script)
        .map_err(|e| StoreError::statement(script.clone(), e))?;
    Ok(true)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    const SQL: &str = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";
    let count: i64 = conn
        .query_row(SQL, [table], |row| row.get(0))
        .map_err(|e| StoreError::statement(SQL, e))?;
    Ok(count > 0)
}

/// Run one statement, reading rows when it produces a result set.
pub(crate) fn run_statement(
    conn: &Connection,
    statement: &Statement,
) -> Result<StatementOutcome, StoreError> {
    let sql = statement.sql.as_str();
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::statement(sql, e))?;
    let params = params_from_iter(statement.params.iter());

    if stmt.column_count() > 0 {
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params, |row| read_row(row, &names))
            .map_err(|e| StoreError::statement(sql, e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::statement(sql, e))?;
        Ok(StatementOutcome::Rows(rows))
    } else {
        let changes = stmt
            .execute(params)
            .map_err(|e| StoreError::statement(sql, e))?;
        Ok(StatementOutcome::Changed {
            changes,
            last_insert_rowid: conn.last_insert_rowid(),
        })
    }
}

/// Run statements atomically; rolls back and returns the first failure.
pub(crate) fn run_transaction(
    conn: &mut Connection,
    statements: &[Statement],
) -> Result<Vec<StatementOutcome>, StoreError> {
    let tx = conn
        .transaction()
        .map_err(|e| StoreError::statement("BEGIN", e))?;
    let mut outcomes = Vec::with_capacity(statements.len());
    for statement in statements {
        match run_statement(&tx, statement) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        }
    }
    tx.commit()
        .map_err(|e| StoreError::statement("COMMIT", e))?;
    Ok(outcomes)
}
