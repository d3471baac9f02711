use axum::{
    middleware as axum_mw,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::agent::RequestTelemetry;
use crate::handlers;
use crate::middleware::telemetry;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Per-request telemetry agent; also serves reads of the stored rows.
    pub telemetry: Arc<RequestTelemetry>,
}

/// Builds the demo `Router`: a few routes, all instrumented.
pub fn create_router(state: Arc<AppState>) -> Router {
    let agent = state.telemetry.clone();

    Router::new()
        // ── Demo endpoints ──────────────────────────────────────
        .route("/ping", get(handlers::demo::ping))
        .route("/api/work/:millis", get(handlers::demo::burn_cpu))
        // ── Telemetry ───────────────────────────────────────────
        .route("/api/telemetry", get(handlers::telemetry::recent))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        // Panics become 500s before telemetry sees the response.
        .layer(CatchPanicLayer::new())
        .layer(axum_mw::from_fn_with_state(agent, telemetry::telemetry_middleware))
        .layer(CorsLayer::permissive())
}
