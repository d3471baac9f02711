//! The request telemetry agent.
//!
//! [`RequestTelemetry`] owns the record pool, the sampler, the buffered log,
//! the store and the shutdown coordinator. The middleware calls
//! [`RequestTelemetry::begin`] before the handler and [`InFlight::finish`]
//! after it; everything between sampling and release happens on the request
//! task, and nothing in it can fail the request.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, SecondsFormat};
use tracing::{debug, error, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, LogError, StoreError};
use crate::telemetry::{
    compute_usage, spawn_flush_task, Pool, ProcessSampler, ResourceSample, ResourceSampler,
    ShutdownCoordinator, ShutdownState, TelemetryLog, TelemetryRecord, TelemetryStore,
};

/// Status recorded for requests whose handler future was dropped before it
/// produced a response (client went away).
pub const STATUS_CLIENT_CLOSED: u16 = 499;

pub struct RequestTelemetry {
    pool: Pool<TelemetryRecord>,
    sampler: Arc<dyn ResourceSampler>,
    log: Arc<TelemetryLog>,
    store: Arc<TelemetryStore>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RequestTelemetry {
    /// Opens the log and store, starts the flush task and, if configured, the
    /// signal listener. Must be called inside a tokio runtime.
    pub fn start(config: AgentConfig) -> Result<Arc<Self>, AgentError> {
        Self::start_with_sampler(config, Arc::new(ProcessSampler::new()))
    }

    pub fn start_with_sampler(
        config: AgentConfig,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Result<Arc<Self>, AgentError> {
        let log = TelemetryLog::open(&config.log_path).map_err(|source| AgentError::LogOpen {
            path: config.log_path.display().to_string(),
            source,
        })?;
        let store = TelemetryStore::open(&config.db_path).map_err(|source| AgentError::StoreOpen {
            path: config.db_path.display().to_string(),
            source,
        })?;
        let agent = Self::from_parts(config, sampler, Arc::new(log), Arc::new(store));
        tracing::info!(
            log = %agent.log.path().display(),
            "request telemetry started"
        );
        Ok(agent)
    }

    /// Assembles an agent around an already-open log and store.
    pub fn from_parts(
        config: AgentConfig,
        sampler: Arc<dyn ResourceSampler>,
        log: Arc<TelemetryLog>,
        store: Arc<TelemetryStore>,
    ) -> Arc<Self> {
        let flush_task = spawn_flush_task(log.clone(), config.flush_interval);
        let shutdown = Arc::new(ShutdownCoordinator::new(log.clone(), store.clone(), flush_task));
        if config.handle_signals {
            shutdown.listen_for_signals(config.exit_on_signal);
        }

        Arc::new(Self {
            pool: Pool::new(config.pool_capacity),
            sampler,
            log,
            store,
            shutdown,
        })
    }

    /// Takes the "before" sample and starts the clock. Returns `None` when
    /// sampling fails, in which case the request is served uninstrumented.
    pub fn begin(self: &Arc<Self>, method: &str, path: &str) -> Option<InFlight> {
        let record = self.pool.acquire();

        let before = match self.sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(method, path, "skipping request telemetry: initial sample failed: {e}");
                self.pool.release(record);
                return None;
            }
        };

        Some(InFlight {
            agent: Arc::clone(self),
            record: Some(record),
            before,
            method: method.to_owned(),
            path: path.to_owned(),
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
            start: Instant::now(),
        })
    }

    /// Drains and closes the pipeline. Idempotent.
    pub async fn close(&self) {
        self.shutdown.close().await;
    }

    pub fn state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn log(&self) -> &TelemetryLog {
        &self.log
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    fn emit(&self, record: &TelemetryRecord) {
        if let Err(e) = self.log.log(record) {
            match e {
                LogError::Closed => {
                    debug!(path = %record.path, "telemetry log closed, line dropped")
                }
                e => warn!(path = %record.path, "failed to write telemetry line: {e}"),
            }
        }
        if let Err(e) = self.store.insert(record) {
            match e {
                StoreError::Closed => {
                    debug!(path = %record.path, "telemetry store closed, row dropped")
                }
                e => warn!(path = %record.path, "failed to insert telemetry row: {e}"),
            }
        }
    }
}

/// A request that has been sampled and is being handled.
///
/// Consume it with [`InFlight::finish`]. If it is dropped instead (the
/// handler future was cancelled, or is unwinding), the record is still
/// emitted, with status 499 or 500 respectively.
pub struct InFlight {
    agent: Arc<RequestTelemetry>,
    record: Option<TelemetryRecord>,
    before: ResourceSample,
    method: String,
    path: String,
    timestamp: String,
    start: Instant,
}

impl InFlight {
    pub fn finish(mut self, status: u16) {
        self.complete(status);
    }

    fn complete(&mut self, status: u16) {
        let Some(mut record) = self.record.take() else {
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.record_into(&mut record, status)));
        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("unknown panic");
            error!(path = %self.path, "internal fault in request telemetry: {reason}");
        }

        self.agent.pool.release(record);
    }

    fn record_into(&self, record: &mut TelemetryRecord, status: u16) {
        let after = match self.agent.sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    method = %self.method,
                    path = %self.path,
                    "dropping request telemetry: final sample failed: {e}"
                );
                return;
            }
        };

        let elapsed = self.start.elapsed();
        let usage = compute_usage(&self.before, &after, elapsed);
        record.fill(&self.timestamp, &self.method, &self.path, status, elapsed, usage);
        self.agent.emit(record);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.record.is_none() {
            return;
        }
        let status = if std::thread::panicking() {
            500
        } else {
            debug!(path = %self.path, "request dropped before completion");
            STATUS_CLIENT_CLOSED
        };
        self.complete(status);
    }
}
