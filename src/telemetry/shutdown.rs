//! Shutdown coordination for the telemetry pipeline.
//!
//! A single state machine, `Running -> Draining -> Closed`, entered either by
//! an explicit [`ShutdownCoordinator::close`] or by SIGINT/SIGTERM. Whichever
//! trigger wins the gate runs the drain; everyone else waits for `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info};

use super::log::{FlushTask, TelemetryLog};
use super::store::TelemetryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Closed,
}

pub struct ShutdownCoordinator {
    gate: AtomicBool,
    state: watch::Sender<ShutdownState>,
    flush_task: Mutex<Option<FlushTask>>,
    log: Arc<TelemetryLog>,
    store: Arc<TelemetryStore>,
}

impl ShutdownCoordinator {
    pub fn new(log: Arc<TelemetryLog>, store: Arc<TelemetryStore>, flush_task: FlushTask) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            gate: AtomicBool::new(false),
            state,
            flush_task: Mutex::new(Some(flush_task)),
            log,
            store,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Drains and closes everything. Safe to call any number of times, from
    /// any number of tasks; every call returns once the pipeline is `Closed`.
    ///
    /// The drain runs on its own task, so cancelling a caller (including the
    /// one that started it) never leaves the pipeline stuck in `Draining`.
    pub async fn close(self: &Arc<Self>) {
        let mut closed = self.state.subscribe();

        if self
            .gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move { coordinator.drain().await });
        }

        let _ = closed.wait_for(|s| *s == ShutdownState::Closed).await;
    }

    async fn drain(&self) {
        self.state.send_replace(ShutdownState::Draining);
        info!("draining telemetry pipeline");

        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        if let Err(e) = self.log.flush() {
            error!("final telemetry flush failed: {e}");
        }
        if let Err(e) = self.log.close() {
            error!("failed to close telemetry log {}: {e}", self.log.path().display());
        }
        if let Err(e) = self.store.close() {
            error!("failed to close telemetry store: {e}");
        }

        self.state.send_replace(ShutdownState::Closed);
        info!("telemetry pipeline closed");
    }

    /// Spawns the SIGINT/SIGTERM listener. On a signal the pipeline is
    /// drained, then the process exits if `exit_after` is set.
    pub fn listen_for_signals(self: &Arc<Self>, exit_after: bool) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("failed to install signal handlers: {e}");
                return;
            }
            info!("shutdown signal received, cleaning up");
            coordinator.close().await;
            if exit_after {
                info!("cleanup complete");
                std::process::exit(0);
            }
        })
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("received SIGINT");
            }
            _ = terminate.recv() => {
                info!("received SIGTERM");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::log::spawn_flush_task;
    use crate::telemetry::TelemetryRecord;
    use std::time::Duration;

    fn coordinator(dir: &tempfile::TempDir) -> Arc<ShutdownCoordinator> {
        let log = Arc::new(TelemetryLog::open(dir.path().join("trace.log")).unwrap());
        let store = Arc::new(TelemetryStore::open_in_memory().unwrap());
        let task = spawn_flush_task(log.clone(), Duration::from_secs(5));
        Arc::new(ShutdownCoordinator::new(log, store, task))
    }

    #[tokio::test]
    async fn close_flushes_and_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let sc = coordinator(&dir);
        assert!(sc.is_running());

        sc.log.log(&TelemetryRecord::default()).unwrap();
        sc.close().await;

        assert_eq!(sc.state(), ShutdownState::Closed);
        assert!(sc.log.is_closed());
        assert!(sc.store.is_closed());
        let written = std::fs::read_to_string(dir.path().join("trace.log")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test]
    async fn close_twice_returns() {
        let dir = tempfile::tempdir().unwrap();
        let sc = coordinator(&dir);
        sc.close().await;
        tokio::time::timeout(Duration::from_secs(1), sc.close())
            .await
            .expect("second close must not hang");
        assert_eq!(sc.state(), ShutdownState::Closed);
    }

    #[tokio::test]
    async fn cancelled_close_still_completes_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let sc = coordinator(&dir);
        sc.log.log(&TelemetryRecord::default()).unwrap();

        // Polled once, then dropped while waiting for `Closed`.
        let first_completed = tokio::select! {
            biased;
            _ = sc.close() => true,
            _ = std::future::ready(()) => false,
        };
        assert!(!first_completed);

        tokio::time::timeout(Duration::from_secs(2), sc.close())
            .await
            .expect("close after a cancelled close must not hang");
        assert_eq!(sc.state(), ShutdownState::Closed);
        assert!(sc.log.is_closed());
        assert!(sc.store.is_closed());
        let written = std::fs::read_to_string(dir.path().join("trace.log")).unwrap();
        assert_eq!(written.lines().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_closes_drain_once() {
        let dir = tempfile::tempdir().unwrap();
        let sc = coordinator(&dir);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sc = sc.clone();
                tokio::spawn(async move { sc.close().await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(sc.state(), ShutdownState::Closed);
        assert!(sc.flush_task.lock().is_none());
    }
}
