//! Pluggable monitoring services.
//!
//! A [`ServiceRegistry`] holds any number of [`MonitoringService`]s and drives
//! their lifecycle in registration order.

pub mod query;

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::error::MonitorError;

pub use query::{QueryTrace, SqliteQueryMonitor};

// ─── Event data ──────────────────────────────────────────────────

/// Value of one event attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl EventValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for EventValue {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<i64> for EventValue {
    fn from(n: i64) -> Self {
        Self::Num(n as f64)
    }
}

impl From<bool> for EventValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

pub type EventData = BTreeMap<String, EventValue>;

/// Builds an [`EventData`] from `key => value` pairs.
#[macro_export]
macro_rules! event_data {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut data = $crate::monitor::EventData::new();
        $( data.insert(String::from($key), $crate::monitor::EventValue::from($value)); )*
        data
    }};
}

// ─── Service trait ───────────────────────────────────────────────

pub trait MonitoringService: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self) -> Result<(), MonitorError>;

    fn track(&self, event: &str, data: &EventData) -> Result<(), MonitorError>;

    fn monitor(&self) -> Result<(), MonitorError>;
}

// ─── Registry ────────────────────────────────────────────────────

#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Box<dyn MonitoringService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&mut self, service: impl MonitoringService + 'static) {
        self.services.push(Box::new(service));
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Registers every service; stops at the first failure.
    pub fn initialize(&self) -> Result<(), MonitorError> {
        for service in &self.services {
            service.register()?;
        }
        info!(count = self.services.len(), "all monitoring services registered");
        Ok(())
    }

    /// Sends the event to every service, even after one fails. Returns the
    /// first failure, if any.
    pub fn track_event(&self, event: &str, data: &EventData) -> Result<(), MonitorError> {
        let mut first_err = None;
        for service in &self.services {
            if let Err(e) = service.track(event, data) {
                tracing::warn!("{e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Runs every service's health check; stops at the first failure.
    pub fn start_monitoring(&self) -> Result<(), MonitorError> {
        for service in &self.services {
            service.monitor()?;
        }
        Ok(())
    }
}

// ─── Generic code monitor ────────────────────────────────────────

/// A service with no backing resource; it only reports its lifecycle.
pub struct CodeMonitor {
    name: String,
}

impl CodeMonitor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MonitoringService for CodeMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self) -> Result<(), MonitorError> {
        info!(service = %self.name, "registering monitoring");
        Ok(())
    }

    fn track(&self, event: &str, data: &EventData) -> Result<(), MonitorError> {
        info!(service = %self.name, event, attributes = data.len(), "tracking event");
        Ok(())
    }

    fn monitor(&self) -> Result<(), MonitorError> {
        info!(service = %self.name, "monitoring generic code");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Records call order into a shared log and fails on demand.
    struct Probe {
        name: &'static str,
        fail: bool,
        calls: Arc<parking_lot::Mutex<Vec<String>>>,
        tracked: Arc<AtomicUsize>,
    }

    impl Probe {
        fn err(&self, event: &str) -> MonitorError {
            MonitorError::Track {
                service: self.name.into(),
                event: event.into(),
                reason: "boom".into(),
            }
        }
    }

    impl MonitoringService for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn register(&self) -> Result<(), MonitorError> {
            self.calls.lock().push(format!("register:{}", self.name));
            if self.fail {
                return Err(MonitorError::Register {
                    service: self.name.into(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }

        fn track(&self, event: &str, _data: &EventData) -> Result<(), MonitorError> {
            self.tracked.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(self.err(event));
            }
            Ok(())
        }

        fn monitor(&self) -> Result<(), MonitorError> {
            self.calls.lock().push(format!("monitor:{}", self.name));
            if self.fail {
                return Err(self.err("monitor"));
            }
            Ok(())
        }
    }

    fn registry(fail: &[bool]) -> (ServiceRegistry, Arc<parking_lot::Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        const NAMES: [&str; 3] = ["a", "b", "c"];
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let tracked = Arc::new(AtomicUsize::new(0));
        let mut reg = ServiceRegistry::new();
        for (i, &f) in fail.iter().enumerate() {
            reg.add_service(Probe {
                name: NAMES[i],
                fail: f,
                calls: calls.clone(),
                tracked: tracked.clone(),
            });
        }
        (reg, calls, tracked)
    }

    #[test]
    fn initialize_stops_at_first_failure() {
        let (reg, calls, _) = registry(&[false, true, false]);
        assert!(matches!(reg.initialize(), Err(MonitorError::Register { .. })));
        assert_eq!(*calls.lock(), ["register:a", "register:b"]);
    }

    #[test]
    fn monitoring_stops_at_first_failure() {
        let (reg, calls, _) = registry(&[true, false]);
        assert!(reg.start_monitoring().is_err());
        assert_eq!(*calls.lock(), ["monitor:a"]);
    }

    #[test]
    fn tracking_reaches_every_service() {
        let (reg, _, tracked) = registry(&[true, false, true]);
        let err = reg.track_event("deploy", &event_data! { "version" => "1.0.0" }).unwrap_err();
        assert_eq!(tracked.load(Ordering::SeqCst), 3);
        assert!(err.to_string().starts_with("a:"));
    }

    #[test]
    fn code_monitor_lifecycle() {
        let mut reg = ServiceRegistry::new();
        reg.add_service(CodeMonitor::new("MyApp"));
        reg.initialize().unwrap();
        reg.start_monitoring().unwrap();
        reg.track_event("App started", &event_data! { "version" => "1.0.0", "canary" => false })
            .unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn event_values_display() {
        let data = event_data! { "n" => 1.5, "s" => "x", "b" => true, "i" => 3i64 };
        let rendered: Vec<_> = data.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(rendered, ["b=true", "i=3", "n=1.5", "s=x"]);
    }
}
