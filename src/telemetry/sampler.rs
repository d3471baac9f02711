//! Process resource sampling.
//!
//! CPU time comes from `getrusage(RUSAGE_SELF)`, which splits user and kernel
//! time; resident memory comes from `sysinfo`, since `ru_maxrss` is a
//! high-water mark rather than the current RSS.

use std::cell::RefCell;

use sysinfo::{Pid, System};

use crate::error::SampleError;

/// Cumulative CPU seconds consumed by the process since it started.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu: CpuTimes,
    /// Resident set size in bytes.
    pub memory_rss: u64,
}

/// Point-in-time view of process resource usage. Implementations must be
/// side-effect free and must not retry.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> Result<ResourceSample, SampleError>;
}

thread_local! {
    // One sysinfo handle per worker thread; concurrent requests never share it.
    static SYSTEM: RefCell<System> = RefCell::new(System::new());
}

/// Samples the current process.
pub struct ProcessSampler {
    pid: Pid,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
        }
    }

    fn memory_rss(&self) -> Result<u64, SampleError> {
        let not_found = || SampleError::ProcessNotFound {
            pid: self.pid.as_u32(),
        };
        SYSTEM
            .try_with(|system| {
                let mut system = system.borrow_mut();
                if !system.refresh_process(self.pid) {
                    return Err(not_found());
                }
                system.process(self.pid).map(|p| p.memory()).ok_or_else(not_found)
            })
            .map_err(|e| SampleError::Other(e.to_string()))?
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&self) -> Result<ResourceSample, SampleError> {
        let cpu = cpu_times()?;
        let memory_rss = self.memory_rss()?;
        Ok(ResourceSample { cpu, memory_rss })
    }
}

#[cfg(unix)]
fn cpu_times() -> Result<CpuTimes, SampleError> {
    // SAFETY: `rusage` is plain old data and getrusage only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return Err(SampleError::Rusage(std::io::Error::last_os_error()));
    }
    Ok(CpuTimes {
        user: timeval_secs(usage.ru_utime),
        system: timeval_secs(usage.ru_stime),
    })
}

#[cfg(not(unix))]
fn cpu_times() -> Result<CpuTimes, SampleError> {
    Err(SampleError::Unsupported)
}

#[cfg(unix)]
fn timeval_secs(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
}
