//! Billing API Server Binary
//!
//! Starts the HTTP surface: manual run trigger, invoice listing and
//! cancellation, statistics and health.
//!
//! # Usage
//!
//! ```bash
//! BILLING_DATABASE_URL=postgres://... BILLING_PORT=8080 cargo run --bin billing-api
//! ```
//!
//! # Environment Variables
//!
//! * `BILLING_HOST` / `BILLING_PORT` - Bind address (default: 0.0.0.0:8080)
//! * `BILLING_DATABASE_URL` - PostgreSQL connection string
//! * `BILLING_TIMEZONE` - Business timezone (default: America/Sao_Paulo)
//! * `BILLING_PROCESSOR__CLIENT_ID`, `BILLING_PROCESSOR__CERTIFICATE_PATH`, ... - Payment processor
//! * `BILLING_MAIL__ENDPOINT`, `BILLING_MAIL__API_KEY` - Transactional mail
//! * `BILLING_LOG_LEVEL` / `BILLING_LOG_JSON` - Logging

use std::net::SocketAddr;

use tokio::net::TcpListener;

use interface_api::config::BillingAppConfig;
use interface_api::{bootstrap, create_router, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let config = BillingAppConfig::from_env()?;
    telemetry::init_tracing(&config.log_level, config.log_json);

    tracing::info!(
        host = %config.host,
        port = %config.port,
        timezone = %config.timezone,
        "Starting billing API server"
    );

    let state = bootstrap::connect(&config).await?;
    let app = create_router(state);

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!(%addr, "Server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
