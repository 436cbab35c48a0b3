//! Shared SQLite handle for the persistent stores.
//!
//! Pending orders, settlements and tenant credentials live in one database
//! file. Each store holds a clone of [`SqliteDb`] and serializes access
//! through the same connection mutex.

use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PayError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS uploaded_print_jobs (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS scanned_documents (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS copy_requests (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS settlements (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL UNIQUE,
    provider TEXT NOT NULL,
    service_data TEXT NOT NULL,
    status TEXT NOT NULL,
    amount INTEGER NOT NULL,
    date INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_settlements_date ON settlements(date);
CREATE TABLE IF NOT EXISTS tenant_credentials (
    tenant_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    credentials TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, provider)
);
"#;

/// SQLite database wrapper shared by the persistent stores.
#[derive(Clone)]
pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDb {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// On Unix the file is restricted to 0600: it holds encrypted provider
    /// credentials and the settlement history.
    pub fn open(path: &str) -> Result<Self, PayError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path, error = %e, "failed to set database file permissions to 0600");
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests and tooling.
    pub fn open_in_memory() -> Result<Self, PayError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("database mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Cheap reachability probe used by the health endpoint.
    pub fn ping(&self) -> Result<(), PayError> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Current unix timestamp in seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
