//! SQLite-backed store: one `request_logs` row per instrumented request.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use super::TelemetryRecord;
use crate::error::StoreError;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS request_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dateTime TEXT,
        requestMethod TEXT,
        requestURL TEXT,
        status INTEGER,
        latency TEXT,
        cpuDelta REAL,
        memoryDelta REAL
    );";

const INSERT: &str = "
    INSERT INTO request_logs (dateTime, requestMethod, requestURL, status, latency, cpuDelta, memoryDelta)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);";

/// A record as read back from the store.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: TelemetryRecord,
}

/// Shared by every request task; the mutex serializes inserts.
pub struct TelemetryStore {
    conn: Mutex<Option<Connection>>,
}

impl TelemetryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Writes one row and returns its id.
    pub fn insert(&self, record: &TelemetryRecord) -> Result<i64, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        conn.prepare_cached(INSERT)?.execute(params![
            record.timestamp,
            record.method,
            record.path,
            record.status,
            record.latency,
            record.cpu_delta,
            record.memory_delta,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent rows first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, dateTime, requestMethod, requestURL, status, latency, cpuDelta, memoryDelta
             FROM request_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(StoredRecord {
                id: row.get(0)?,
                record: TelemetryRecord {
                    timestamp: row.get(1)?,
                    method: row.get(2)?,
                    path: row.get(3)?,
                    status: row.get(4)?,
                    latency: row.get(5)?,
                    cpu_delta: row.get(6)?,
                    memory_delta: row.get(7)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM request_logs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Closes the connection. Later calls are no-ops; later inserts fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) -> Result<(), StoreError> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}
