//! Error types for the telemetry agent.
//!
//! Every error in the request path is fire-and-log: callers record it through
//! `tracing` and carry on. Only [`AgentError`] is returned to application code,
//! at startup.

use thiserror::Error;

/// The operating system could not report usage for this process.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("process {pid} is not visible to the sampler")]
    ProcessNotFound { pid: u32 },

    #[error("getrusage failed: {0}")]
    Rusage(#[source] std::io::Error),

    #[error("resource sampling is not supported on this platform")]
    Unsupported,

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("telemetry log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize telemetry line: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("telemetry log is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("telemetry store is closed")]
    Closed,
}

/// Startup failures of [`crate::RequestTelemetry`].
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to open telemetry log {path}: {source}")]
    LogOpen {
        path: String,
        #[source]
        source: LogError,
    },

    #[error("failed to open telemetry store {path}: {source}")]
    StoreOpen {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Failures reported by a [`crate::monitor::MonitoringService`].
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{service}: registration failed: {reason}")]
    Register { service: String, reason: String },

    #[error("{service}: failed to track '{event}': {reason}")]
    Track {
        service: String,
        event: String,
        reason: String,
    },

    #[error("{service}: health check failed: {source}")]
    Unhealthy {
        service: String,
        #[source]
        source: rusqlite::Error,
    },
}
