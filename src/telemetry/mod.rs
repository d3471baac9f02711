pub mod log;
pub mod pool;
pub mod sampler;
pub mod shutdown;
pub mod store;

use std::time::Duration;

use serde::Serialize;

pub use self::log::{spawn_flush_task, FlushTask, TelemetryLog, DEFAULT_FLUSH_INTERVAL};
pub use pool::Pool;
pub use sampler::{CpuTimes, ProcessSampler, ResourceSample, ResourceSampler};
pub use shutdown::{ShutdownCoordinator, ShutdownState};
pub use store::TelemetryStore;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One row of telemetry: what a single request cost the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Request start, RFC 3339 with offset, second precision.
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// `Debug` rendering of the wall-clock duration, e.g. `12.5ms`.
    ///
    /// Durations of a minute or more stay in seconds (`90s`), never `1m30s`;
    /// consumers parsing Go-style durations must account for that.
    pub latency: String,
    /// Process CPU-seconds per wall-second, as a percentage of one core.
    pub cpu_delta: f64,
    /// Change in resident set size, in MB. Negative when memory was freed.
    pub memory_delta: f64,
}

/// CPU and memory deltas between two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub cpu_delta: f64,
    pub memory_delta: f64,
}

impl TelemetryRecord {
    /// Overwrites every field, reusing the existing string buffers.
    ///
    /// Records come out of the pool dirty, so this is the only way the
    /// interceptor populates one.
    pub fn fill(
        &mut self,
        timestamp: &str,
        method: &str,
        path: &str,
        status: u16,
        latency: Duration,
        usage: Usage,
    ) {
        use std::fmt::Write;

        // Exhaustive so a new field can't be left stale.
        let TelemetryRecord {
            timestamp: ts,
            method: m,
            path: p,
            status: s,
            latency: l,
            cpu_delta,
            memory_delta,
        } = self;

        ts.clear();
        ts.push_str(timestamp);
        m.clear();
        m.push_str(method);
        p.clear();
        p.push_str(path);
        *s = status;
        l.clear();
        let _ = write!(l, "{latency:?}");
        *cpu_delta = usage.cpu_delta;
        *memory_delta = usage.memory_delta;
    }
}

/// Derives per-request deltas from the before/after samples.
///
/// `cpu_delta` is not scaled by the number of cores, so multi-threaded work
/// can push it above 100.
pub fn compute_usage(before: &ResourceSample, after: &ResourceSample, elapsed: Duration) -> Usage {
    let cpu_user = after.cpu.user - before.cpu.user;
    let cpu_system = after.cpu.system - before.cpu.system;
    let cpu_total = cpu_user + cpu_system;

    let elapsed_secs = elapsed.as_secs_f64();
    let cpu_delta = if elapsed_secs > 0.0 {
        (cpu_total / elapsed_secs) * 100.0
    } else {
        0.0
    };

    let memory_delta = (after.memory_rss as i64 - before.memory_rss as i64) as f64 / BYTES_PER_MB;

    Usage {
        cpu_delta,
        memory_delta,
    }
}
