//! Per-request process telemetry for axum services.
//!
//! [`RequestTelemetry`] samples the process's CPU time and resident memory
//! around every request, turns the difference into a [`TelemetryRecord`], and
//! writes it to a buffered JSON-lines file and a SQLite table. Failures in any
//! of that are logged through `tracing` and never reach the request.
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use reqtrace::{telemetry_middleware, AgentConfig, RequestTelemetry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = RequestTelemetry::start(AgentConfig::new("trace.log", "trace.db"))?;
//! let app: Router = Router::new()
//!     .route("/ping", get(|| async { "pong" }))
//!     .layer(middleware::from_fn_with_state(agent.clone(), telemetry_middleware));
//! # let _ = app;
//! agent.close().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod monitor;
pub mod observability;
pub mod server;
pub mod telemetry;

pub use agent::{InFlight, RequestTelemetry};
pub use config::AgentConfig;
pub use error::{AgentError, LogError, MonitorError, SampleError, StoreError};
pub use middleware::telemetry_middleware;
pub use telemetry::{ResourceSample, ResourceSampler, ShutdownState, TelemetryRecord};
