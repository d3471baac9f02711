//! Buffered JSON-lines telemetry log.
//!
//! Writers append to an in-memory buffer; a background task pushes it to disk
//! every few seconds, and shutdown does a final flush before closing the file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, SecondsFormat};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use super::TelemetryRecord;
use crate::error::LogError;

// ─── Configuration ───────────────────────────────────────────────

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Large enough that a burst of requests between ticks stays in memory.
const BUFFER_CAPACITY: usize = 64 * 1024;

const LINE_MESSAGE: &str = "Request details logged";

// ─── Line format ─────────────────────────────────────────────────

/// One line of the telemetry file. Field names are consumed by downstream
/// log tooling and must not change.
#[derive(Serialize)]
struct LogLine<'a> {
    #[serde(rename = "CPU Delta")]
    cpu_delta: f64,
    #[serde(rename = "DateTime")]
    date_time: &'a str,
    #[serde(rename = "Latency")]
    latency: &'a str,
    #[serde(rename = "Memory Delta (MB)")]
    memory_delta: f64,
    #[serde(rename = "RequestMethod")]
    request_method: &'a str,
    #[serde(rename = "RequestURL")]
    request_url: &'a str,
    #[serde(rename = "Status")]
    status: u16,
    level: &'static str,
    msg: &'static str,
    time: String,
}

impl<'a> LogLine<'a> {
    fn new(record: &'a TelemetryRecord) -> Self {
        Self {
            cpu_delta: record.cpu_delta,
            date_time: &record.timestamp,
            latency: &record.latency,
            memory_delta: record.memory_delta,
            request_method: &record.method,
            request_url: &record.path,
            status: record.status,
            level: "info",
            msg: LINE_MESSAGE,
            time: Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }
}

// ─── TelemetryLog ────────────────────────────────────────────────

pub struct TelemetryLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl TelemetryLog {
    /// Opens `path` for appending, creating it and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::with_capacity(BUFFER_CAPACITY, file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one JSON line to the buffer.
    pub fn log(&self, record: &TelemetryRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(&LogLine::new(record))?;
        line.push(b'\n');

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(LogError::Closed)?;
        writer.write_all(&line)?;
        Ok(())
    }

    /// Pushes buffered lines to the file. A no-op when nothing is buffered.
    pub fn flush(&self) -> Result<(), LogError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(LogError::Closed)?;
        writer.flush()?;
        Ok(())
    }

    /// Final flush, then close. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), LogError> {
        let Some(writer) = self.writer.lock().take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| LogError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

// ─── Periodic flush ──────────────────────────────────────────────

/// Handle to the background flush loop.
pub struct FlushTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushTask {
    /// Tells the loop to exit and waits until it has.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.handle.await {
            warn!("telemetry flush task ended abnormally: {e}");
        }
    }
}

/// Spawns a task that flushes `log` every `every` until stopped.
pub fn spawn_flush_task(log: Arc<TelemetryLog>, every: Duration) -> FlushTask {
    let (stop, mut stop_rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        // First tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = log.flush() {
                        warn!("periodic telemetry flush failed: {e}");
                    }
                }
                _ = &mut stop_rx => break,
            }
        }
    });

    FlushTask { stop, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: "2024-05-01T12:00:00+00:00".into(),
            method: "GET".into(),
            path: path.into(),
            status: 200,
            latency: "1.5ms".into(),
            cpu_delta: 12.5,
            memory_delta: -0.25,
        }
    }

    #[test]
    fn lines_stay_buffered_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let log = TelemetryLog::open(&path).unwrap();

        log.log(&record("/a")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        log.flush().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn line_uses_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let log = TelemetryLog::open(&path).unwrap();
        log.log(&record("/users/7")).unwrap();
        log.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(line["DateTime"], "2024-05-01T12:00:00+00:00");
        assert_eq!(line["RequestMethod"], "GET");
        assert_eq!(line["RequestURL"], "/users/7");
        assert_eq!(line["Status"], 200);
        assert_eq!(line["Latency"], "1.5ms");
        assert_eq!(line["CPU Delta"], 12.5);
        assert_eq!(line["Memory Delta (MB)"], -0.25);
        assert_eq!(line["level"], "info");
        assert_eq!(line["msg"], "Request details logged");
    }

    #[test]
    fn double_flush_writes_nothing_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let log = TelemetryLog::open(&path).unwrap();

        log.log(&record("/a")).unwrap();
        log.flush().unwrap();
        log.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn closed_log_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let log = TelemetryLog::open(dir.path().join("nested/dir/trace.log")).unwrap();
        log.close().unwrap();
        log.close().unwrap();

        assert!(log.is_closed());
        assert!(matches!(log.log(&record("/a")), Err(LogError::Closed)));
        assert!(matches!(log.flush(), Err(LogError::Closed)));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        for p in ["/one", "/two"] {
            let log = TelemetryLog::open(&path).unwrap();
            log.log(&record(p)).unwrap();
            log.close().unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_task_flushes_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let log = Arc::new(TelemetryLog::open(&path).unwrap());
        let task = spawn_flush_task(log.clone(), Duration::from_secs(5));

        log.log(&record("/a")).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);

        task.stop().await;
    }
}
