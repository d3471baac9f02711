use std::sync::Arc;

use reqtrace::observability::{init_tracing, LogFormat};
use reqtrace::server::{self, AppState};
use reqtrace::{AgentConfig, RequestTelemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // ── 1. Operator logging ──────────────────────────────────────
    init_tracing(LogFormat::from_env())?;

    // ── 2. Telemetry agent (also installs SIGINT/SIGTERM handling) ─
    let config = AgentConfig::from_env();
    info!(
        log = %config.log_path.display(),
        db = %config.db_path.display(),
        flush_secs = config.flush_interval.as_secs(),
        "starting request telemetry"
    );
    let telemetry = RequestTelemetry::start(config)?;

    // ── 3. Build Axum router ─────────────────────────────────────
    let state = Arc::new(AppState {
        telemetry: telemetry.clone(),
    });
    let app = server::create_router(state);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = std::env::var("REQTRACE_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("listening on http://{addr}");
    info!("ping      → http://{addr}/ping");
    info!("telemetry → http://{addr}/api/telemetry");

    let result = axum::serve(listener, app).await;

    // Only reached if the server stops on its own; signals exit from the
    // telemetry shutdown path.
    telemetry.close().await;
    result?;
    Ok(())
}
