use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::agent::RequestTelemetry;

/// Records CPU and memory usage for every request passing through.
///
/// The request and response pass through untouched; telemetry failures are
/// only ever logged. Install with
/// `axum::middleware::from_fn_with_state(agent, telemetry_middleware)`.
pub async fn telemetry_middleware(
    State(agent): State<Arc<RequestTelemetry>>,
    req: Request,
    next: Next,
) -> Response {
    let in_flight = agent.begin(req.method().as_str(), req.uri().path());

    let response = next.run(req).await;

    if let Some(in_flight) = in_flight {
        in_flight.finish(response.status().as_u16());
    }
    response
}
