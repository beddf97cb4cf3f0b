mod schema;
mod queries;

use std::sync::{Mutex, MutexGuard};
use commitstreak_types::{Result, StreakError};

/// SQLite-backed implementation of the [`commitstreak_types::CredentialStore`]
/// and [`commitstreak_types::AggregateStore`] traits.
pub struct SqliteStore {
    pub(crate) conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open a persistent on-disk database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Run all pragmas and schema DDL.
    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| StreakError::Storage("connection mutex poisoned".into()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
