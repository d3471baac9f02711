use std::time::{Duration, Instant};

use axum::{extract::Path, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use super::AppError;

/// Upper bound for `/api/work/:millis` so a single call can't pin a core.
const MAX_WORK_MS: u64 = 5_000;

// ─── GET /ping ───────────────────────────────────────────────────

pub async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

// ─── GET /api/work/:millis ───────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WorkResult {
    pub requested_ms: u64,
    pub iterations: u64,
}

/// Spins on the CPU for roughly `millis` milliseconds, giving the telemetry
/// something to measure.
pub async fn burn_cpu(Path(millis): Path<u64>) -> Result<Json<WorkResult>, AppError> {
    if millis > MAX_WORK_MS {
        return Err(AppError::BadRequest(format!(
            "millis must be at most {MAX_WORK_MS}"
        )));
    }

    let iterations = tokio::task::spawn_blocking(move || spin(Duration::from_millis(millis)))
        .await
        .map_err(|e| {
            warn!(millis, "cpu burn worker failed: {e}");
            AppError::Internal("cpu burn worker failed".into())
        })?;

    Ok(Json(WorkResult {
        requested_ms: millis,
        iterations,
    }))
}

fn spin(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut acc = 0u64;
    let mut iterations = 0u64;
    while start.elapsed() < budget {
        for i in 0..1_000u64 {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i);
        }
        iterations += 1;
    }
    std::hint::black_box(acc);
    iterations
}
