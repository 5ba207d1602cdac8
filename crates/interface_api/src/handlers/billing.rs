//! Billing handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use core_kernel::{calendar, InvoiceId};
use domain_billing::{CycleSummary, InvoiceQuery, InvoiceStatistics};

use crate::dto::billing::*;
use crate::{error::ApiError, AppState};

const DEFAULT_STATISTICS_DAYS: u32 = 30;

/// Runs the daily cycle now
///
/// Only one manual run may be in flight; a second request gets a 409.
pub async fn run_cycle(
    State(state): State<AppState>,
    request: Option<Json<RunCycleRequest>>,
) -> Result<Json<CycleSummary>, ApiError> {
    let _guard = state
        .run_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("A billing run is already in progress".to_string()))?;

    let date = request
        .and_then(|Json(body)| body.date)
        .unwrap_or_else(|| calendar::today_in(state.timezone));
    info!(%date, "Manual billing run requested");

    let summary = state.cycle.run(date).await?;
    Ok(Json(summary))
}

/// Cancels an open invoice locally and at the processor
pub async fn cancel_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelInvoiceRequest>>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    let reason = request
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| "cancelled via API".to_string());

    let config = state.cycle.load_config().await?;
    let invoice = state
        .cycle
        .invoice_service(&config)
        .cancel(InvoiceId::from_uuid(id), &reason)
        .await?;
    Ok(Json(invoice.into()))
}

/// Lists invoices
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<ListInvoicesParams>,
) -> Result<Json<Vec<InvoiceResponse>>, ApiError> {
    params.validate()?;
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(ApiError::BadRequest("'from' must not be after 'to'".to_string()));
        }
    }

    let query = InvoiceQuery::from(params);
    let config = state.cycle.load_config().await?;
    let invoices = state.cycle.invoice_service(&config).list(&query).await?;
    Ok(Json(invoices.into_iter().map(InvoiceResponse::from).collect()))
}

/// Invoice figures for the `days` days up to `until` (default today)
pub async fn statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<InvoiceStatistics>, ApiError> {
    params.validate()?;
    let days = params.days.unwrap_or(DEFAULT_STATISTICS_DAYS);

    let config = state.cycle.load_config().await?;
    let today = params.until.unwrap_or_else(|| calendar::today_in(state.timezone));
    let report = state
        .cycle
        .invoice_service(&config)
        .statistics(today, days, config.currency)
        .await?;
    Ok(Json(report))
}
