//! HTTP API Layer
//!
//! Axum surface and process wiring for the billing cycle.
//!
//! # Architecture
//!
//! - **Handlers**: manual run trigger, invoice listing/cancellation, statistics, health
//! - **Middleware**: request ids, tracing, audit logging
//! - **DTOs**: Request/Response data transfer objects
//! - **Error Handling**: Consistent error responses
//! - **Bootstrap**: configuration, database and adapter wiring shared by both binaries
//!
//! # Example
//!
//! ```rust,ignore
//! use interface_api::{bootstrap, create_router};
//!
//! let state = bootstrap::connect(&config).await?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod telemetry;

use std::sync::Arc;

use axum::{
    http::HeaderName,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use core_kernel::HealthCheckable;
use domain_billing::DailyCycle;

use crate::handlers::{billing, health};
use crate::middleware::{audit_middleware, REQUEST_ID_HEADER};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cycle: DailyCycle,
    /// Adapters pinged by `/health`
    pub health_checks: Vec<Arc<dyn HealthCheckable>>,
    /// Business timezone that decides which day "today" is
    pub timezone: Tz,
    run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(cycle: DailyCycle, timezone: Tz) -> Self {
        Self {
            cycle,
            health_checks: Vec::new(),
            timezone,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_health_check(mut self, adapter: Arc<dyn HealthCheckable>) -> Self {
        self.health_checks.push(adapter);
        self
    }
}

/// Creates the main API router
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let billing_routes = Router::new()
        .route("/cycle/run", post(billing::run_cycle))
        .route("/invoices", get(billing::list_invoices))
        .route("/invoices/:id/cancel", post(billing::cancel_invoice))
        .route("/statistics", get(billing::statistics))
        .layer(axum_middleware::from_fn(audit_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1/billing", billing_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
