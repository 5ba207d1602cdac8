//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use core_kernel::{AdapterHealth, HealthCheckResult};

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: AdapterHealth,
    pub version: String,
    pub adapters: Vec<HealthCheckResult>,
}

/// Health check endpoint
///
/// Pings every registered adapter. Any unhealthy adapter turns the
/// response into a 503; a degraded one (open circuit) does not.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let mut adapters = Vec::with_capacity(state.health_checks.len());
    for adapter in &state.health_checks {
        adapters.push(adapter.health_check().await);
    }

    let status = if adapters.iter().any(|r| r.status == AdapterHealth::Unhealthy) {
        AdapterHealth::Unhealthy
    } else if adapters.iter().any(|r| r.status == AdapterHealth::Degraded) {
        AdapterHealth::Degraded
    } else {
        AdapterHealth::Healthy
    };

    let code = if status == AdapterHealth::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            adapters,
        }),
    )
}
