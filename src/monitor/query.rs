//! Query tracing and health monitoring for a SQLite connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::{error, info};

use super::{EventData, MonitoringService};
use crate::error::MonitorError;
use crate::event_data;

const PROBE_QUERY: &str = "SELECT name FROM sqlite_master WHERE type = 'table'";

/// Timing and outcome of one database call.
#[derive(Debug, Clone)]
pub struct QueryTrace {
    pub trace_id: String,
    pub span_id: String,
    pub query: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: std::time::Duration,
    /// Set exactly when the call failed.
    pub error: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl QueryTrace {
    fn run<T>(
        query: &str,
        query_type: &str,
        op: impl FnOnce() -> rusqlite::Result<T>,
    ) -> (rusqlite::Result<T>, Self) {
        let start_time = Utc::now();
        let started = Instant::now();
        let result = op();
        // Monotonic; end_time is derived from it so duration == end - start.
        let duration = started.elapsed();

        let end_time = start_time
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());

        let trace = Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            query: query.to_owned(),
            start_time,
            end_time,
            duration,
            error: result.as_ref().err().map(|e| e.to_string()),
            attributes: HashMap::from([("query_type".to_owned(), query_type.to_owned())]),
        };
        (result, trace)
    }
}

pub fn generate_trace_id() -> String {
    format!("trace-{}", uuid::Uuid::new_v4().simple())
}

pub fn generate_span_id() -> String {
    format!("span-{}", uuid::Uuid::new_v4().simple())
}

/// Health checks and traced queries over a shared SQLite connection.
pub struct SqliteQueryMonitor {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueryMonitor {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Runs a read query, returning every row as a vector of column values.
    pub fn query(&self, sql: &str) -> (rusqlite::Result<Vec<Vec<Value>>>, QueryTrace) {
        let (result, trace) = QueryTrace::run(sql, "SELECT", || {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let columns = stmt.column_count();
            let rows = stmt.query_map([], |row| {
                (0..columns).map(|i| row.get::<_, Value>(i)).collect::<rusqlite::Result<Vec<_>>>()
            })?;
            rows.collect()
        });
        if let Some(e) = &trace.error {
            error!(query = sql, "error executing query: {e}");
        }
        (result, trace)
    }

    /// Runs a statement, returning the number of rows changed.
    pub fn execute(&self, sql: &str) -> (rusqlite::Result<usize>, QueryTrace) {
        let (result, trace) = QueryTrace::run(sql, "EXEC", || self.conn.lock().execute(sql, []));
        if let Some(e) = &trace.error {
            error!(query = sql, "error executing statement: {e}");
        }
        (result, trace)
    }
}

impl MonitoringService for SqliteQueryMonitor {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn register(&self) -> Result<(), MonitorError> {
        info!("registering SQLite monitoring");
        Ok(())
    }

    fn track(&self, event: &str, data: &EventData) -> Result<(), MonitorError> {
        info!(event, "tracking SQLite event");
        for (key, value) in data {
            info!(event, "event data - {key}: {value}");
        }

        if event == "QueryExecution" {
            let field = |key: &str| {
                data.get(key).and_then(|v| v.as_str()).ok_or_else(|| MonitorError::Track {
                    service: self.name().to_owned(),
                    event: event.to_owned(),
                    reason: format!("missing string attribute '{key}'"),
                })
            };
            info!(
                "query: {} | execution time: {} | status: {}",
                field("query")?,
                field("execution_time")?,
                field("status")?
            );
        }
        Ok(())
    }

    fn monitor(&self) -> Result<(), MonitorError> {
        info!("monitoring SQLite");

        let ping: rusqlite::Result<i64> = self.conn.lock().query_row("SELECT 1", [], |row| row.get(0));
        if let Err(source) = ping {
            error!("SQLite connection is down: {source}");
            return Err(MonitorError::Unhealthy {
                service: self.name().to_owned(),
                source,
            });
        }
        info!("SQLite connection is healthy");

        let (result, trace) = self.query(PROBE_QUERY);
        if let Err(source) = result {
            return Err(MonitorError::Unhealthy {
                service: self.name().to_owned(),
                source,
            });
        }

        let data = event_data! {
            "query" => PROBE_QUERY,
            "execution_time" => format!("{:?}", trace.duration),
            "status" => "success",
        };
        if let Err(e) = self.track("QueryExecution", &data) {
            error!("error tracking query execution: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> SqliteQueryMonitor {
        let conn = Connection::open_in_memory().unwrap();
        SqliteQueryMonitor::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn successful_calls_have_no_error() {
        let m = monitor();
        let (res, trace) = m.execute("CREATE TABLE users (id INTEGER, active INTEGER)");
        res.unwrap();
        assert!(trace.error.is_none());
        assert_eq!(trace.attributes["query_type"], "EXEC");

        m.execute("INSERT INTO users VALUES (1, 1), (2, 0)").0.unwrap();
        let (rows, trace) = m.query("SELECT id FROM users WHERE active = 1");
        assert_eq!(rows.unwrap(), vec![vec![Value::Integer(1)]]);
        assert_eq!(trace.attributes["query_type"], "SELECT");
        assert_eq!(trace.query, "SELECT id FROM users WHERE active = 1");
    }

    #[test]
    fn failed_calls_carry_error() {
        let m = monitor();
        let (res, trace) = m.query("SELECT * FROM missing_table");
        assert!(res.is_err());
        assert!(trace.error.as_deref().unwrap().contains("missing_table"));
    }

    #[test]
    fn duration_matches_timestamps() {
        let m = monitor();
        let (_, trace) = m.query("SELECT 1");
        assert!(trace.end_time >= trace.start_time);
        assert_eq!((trace.end_time - trace.start_time).to_std().unwrap(), trace.duration);
        assert!(trace.trace_id.starts_with("trace-"));
        assert!(trace.span_id.starts_with("span-"));
        assert_ne!(trace.trace_id, m.query("SELECT 1").1.trace_id);
    }

    #[test]
    fn monitor_checks_health_and_tracks() {
        let m = monitor();
        m.register().unwrap();
        m.monitor().unwrap();
    }

    #[test]
    fn query_execution_requires_fields() {
        let m = monitor();
        let incomplete = event_data! { "query" => "SELECT 1" };
        assert!(m.track("QueryExecution", &incomplete).is_err());
        assert!(m.track("Other", &incomplete).is_ok());
    }
}
