//! Agent configuration loaded from environment variables.
//!
//! Invalid values fall back to defaults with a warning rather than failing
//! startup.
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REQTRACE_LOG_PATH` | `trace.log` | JSON-lines telemetry file |
//! | `REQTRACE_DB_PATH` | `trace.db` | SQLite telemetry store |
//! | `REQTRACE_FLUSH_SECS` | 5 | Telemetry buffer flush interval |
//! | `REQTRACE_POOL_CAPACITY` | 256 | Idle records kept for reuse |
//! | `REQTRACE_EXIT_ON_SIGNAL` | true | Exit the process after a signal-driven drain |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::telemetry::pool::DEFAULT_POOL_CAPACITY;
use crate::telemetry::DEFAULT_FLUSH_INTERVAL;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub log_path: PathBuf,
    pub db_path: PathBuf,
    pub flush_interval: Duration,
    pub pool_capacity: usize,
    /// Install SIGINT/SIGTERM handlers at startup.
    pub handle_signals: bool,
    /// After a signal-driven drain, terminate the process.
    pub exit_on_signal: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("trace.log"),
            db_path: PathBuf::from("trace.db"),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            handle_signals: true,
            exit_on_signal: true,
        }
    }
}

impl AgentConfig {
    pub fn new(log_path: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_path: std::env::var_os("REQTRACE_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_path),
            db_path: std::env::var_os("REQTRACE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            flush_interval: env_parse::<u64>("REQTRACE_FLUSH_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            pool_capacity: env_parse("REQTRACE_POOL_CAPACITY").unwrap_or(defaults.pool_capacity),
            handle_signals: defaults.handle_signals,
            exit_on_signal: env_parse("REQTRACE_EXIT_ON_SIGNAL").unwrap_or(defaults.exit_on_signal),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {key}={raw:?}, using default");
            None
        }
    }
}
