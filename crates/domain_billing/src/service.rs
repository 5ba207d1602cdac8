//! Invoice issuing and administration
//!
//! `InvoiceService` is the single path through which invoices come into
//! existence: the generator uses it for recurring invoices, and callers use
//! it directly for one-off invoices. It also owns cancellation, listing and
//! the statistics report.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;

use core_kernel::{calendar, Currency, InvoiceId, PortError};

use crate::error::BillingError;
use crate::events::{BillingEvent, BillingEvents, TracingEvents};
use crate::invoice::{generate_reference, Invoice, InvoiceQuery, InvoiceRequest, InvoiceStatistics, InvoiceStatus};
use crate::ports::{InvoiceStore, PayerInfo, PaymentGateway, RemoteInvoiceRequest};
use crate::workers::with_timeout;

const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues, cancels and reports on invoices
#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn InvoiceStore>,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<dyn BillingEvents>,
    gateway_timeout: Duration,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn InvoiceStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            gateway,
            events: Arc::new(TracingEvents),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn BillingEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Creates the invoice at the processor, then stores it with its artifacts
    ///
    /// Nothing is sent to the processor when validation fails. If the
    /// processor accepted the invoice but storing it failed, the remote
    /// invoice is cancelled so no payable document is left without a local
    /// record.
    pub async fn issue(&self, request: &InvoiceRequest, today: NaiveDate) -> Result<Invoice, BillingError> {
        request.validate(today)?;

        let reference = generate_reference(today);
        let remote_request = RemoteInvoiceRequest {
            reference: reference.clone(),
            amount: request.amount,
            due_date: request.due_date,
            description: request.description.clone(),
            payer: PayerInfo::from(&request.customer),
            terms: request.terms,
        };

        let remote = with_timeout(
            "create_invoice",
            self.gateway_timeout,
            self.gateway.create_invoice(&remote_request),
        )
        .await
        .map_err(BillingError::Gateway)?;

        let invoice = Invoice::issued(request, reference, today, remote.external_id, remote.artifacts);

        if let Err(e) = self.store.insert_invoice(&invoice).await {
            let voided = with_timeout(
                "cancel_invoice",
                self.gateway_timeout,
                self.gateway.cancel_invoice(&invoice.reference),
            )
            .await
            .is_ok();
            self.events.emit(BillingEvent::OrphanCompensated {
                reference: invoice.reference.clone(),
                succeeded: voided,
            });
            return Err(BillingError::Persistence(e));
        }

        self.events.emit(BillingEvent::InvoiceIssued {
            invoice_id: invoice.id,
            reference: invoice.reference.clone(),
            subscription_id: invoice.subscription_id,
            due_date: invoice.due_date,
            amount: invoice.amount,
        });
        Ok(invoice)
    }

    /// Cancels an open invoice
    ///
    /// Already-cancelled invoices are returned unchanged. The processor is
    /// asked to void the invoice too; if it refuses, the local cancellation
    /// still goes through.
    pub async fn cancel(&self, id: InvoiceId, reason: &str) -> Result<Invoice, BillingError> {
        let mut invoice = self.store.get_invoice(id).await.map_err(|e| not_found_or_persistence(id, e))?;

        match invoice.status {
            InvoiceStatus::Cancelled => return Ok(invoice),
            InvoiceStatus::Paid => {
                return Err(BillingError::InvalidOperation(format!(
                    "invoice {} is paid and cannot be cancelled",
                    invoice.reference
                )))
            }
            InvoiceStatus::Pending | InvoiceStatus::Overdue => {}
        }

        if invoice.external_id.is_some() {
            let remote = with_timeout(
                "cancel_invoice",
                self.gateway_timeout,
                self.gateway.cancel_invoice(&invoice.reference),
            )
            .await;
            if let Err(e) = remote {
                self.events.emit(BillingEvent::RemoteCancelFailed {
                    reference: invoice.reference.clone(),
                    message: e.to_string(),
                });
            }
        }

        let change = invoice.transition_to(InvoiceStatus::Cancelled, Utc::now())?;
        self.store
            .apply_status_change(&change, None)
            .await
            .map_err(BillingError::Persistence)?;

        self.events.emit(BillingEvent::InvoiceCancelled {
            invoice_id: invoice.id,
            reason: reason.to_string(),
        });
        Ok(invoice)
    }

    pub async fn get(&self, id: InvoiceId) -> Result<Invoice, BillingError> {
        self.store.get_invoice(id).await.map_err(|e| not_found_or_persistence(id, e))
    }

    pub async fn list(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, BillingError> {
        self.store.list_invoices(query).await.map_err(BillingError::Persistence)
    }

    /// Figures over invoices issued in the last `window_days` days up to `today`
    pub async fn statistics(
        &self,
        today: NaiveDate,
        window_days: u32,
        currency: Currency,
    ) -> Result<InvoiceStatistics, BillingError> {
        let since = calendar::offset_days(today, -i64::from(window_days))?;
        let totals = self
            .store
            .status_totals(since, today)
            .await
            .map_err(BillingError::Persistence)?;
        Ok(InvoiceStatistics::from_totals(since, today, currency, &totals))
    }
}

fn not_found_or_persistence(id: InvoiceId, error: PortError) -> BillingError {
    if error.is_not_found() {
        BillingError::InvoiceNotFound(id.to_string())
    } else {
        BillingError::Persistence(error)
    }
}
