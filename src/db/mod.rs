//! SQLite database module
//!
//! One connection behind a mutex. Repository modules expose plain functions
//! over `&Connection`, so the same code runs standalone, inside a request
//! transaction, or inside a batch savepoint.
//!
//! ## Tables
//!
//! - `projects`, `sprints`, `stories`, `story_dependencies`, `notes`
//! - `files`, `agent_sessions`, `agent_events`
//! - `idempotency_records` - captured responses for retried writes
//! - `audit_events` - append-only changefeed

pub mod schema;
pub mod models;
pub mod projects;
pub mod sprints;
pub mod stories;
pub mod dependencies;
pub mod notes;
pub mod files;
pub mod sessions;
pub mod idempotency;
pub mod audit;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::clock;
use crate::error::StorageError;

/// SQLite database for the sprint domain
pub struct SprintDb {
    conn: Mutex<Connection>,
}

impl SprintDb {
    /// Open or create the database in `storage_dir`
    pub fn open(storage_dir: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        let db_path = storage_dir.join("sprint.db");
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        // WAL for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init(conn, busy_timeout)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");
        let conn = Connection::open_in_memory()?;
        Self::init(conn, Duration::from_millis(5_000))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StorageError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn)?;
        clock::observe_ms(schema::latest_write_ms(&conn)?);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read with shared access to the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` inside an IMMEDIATE transaction. `f` decides whether to commit
    /// by returning the transaction outcome; dropping it rolls back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(Transaction<'_>) -> Result<T, StorageError>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            f(tx)
        })
    }

    /// Liveness probe for the readiness endpoint
    pub fn ping(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| StorageError::ServiceUnavailable(format!("database unreachable: {}", e)))
        })
    }
}

/// Run `f` inside a named savepoint on `conn`.
///
/// The savepoint is released when `f` succeeds and rolled back when it fails.
/// Savepoints nest, and they work on a plain `&Connection`, which lets the
/// batch coordinator isolate items inside the request transaction.
pub fn with_savepoint<F, T>(conn: &Connection, name: &str, f: F) -> Result<T, StorageError>
where
    F: FnOnce(&Connection) -> Result<T, StorageError>,
{
    conn.execute_batch(&format!("SAVEPOINT {}", name))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))?;
            Ok(value)
        }
        Err(e) => {
            rollback_savepoint(conn, name)?;
            Err(e)
        }
    }
}

/// Undo everything since `SAVEPOINT name` and discard the savepoint.
pub fn rollback_savepoint(conn: &Connection, name: &str) -> Result<(), StorageError> {
    conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};", name = name))?;
    Ok(())
}

/// Read-side helper: map a row-level rusqlite error into a StorageError.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StorageError> {
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub project_count: u64,
    pub story_count: u64,
    pub dependency_count: u64,
    pub audit_event_count: u64,
    pub idempotency_record_count: u64,
}

impl SprintDb {
    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, StorageError> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                project_count: count("projects")?,
                story_count: count("stories")?,
                dependency_count: count("story_dependencies")?,
                audit_event_count: count("audit_events")?,
                idempotency_record_count: count("idempotency_records")?,
            })
        })
    }
}
