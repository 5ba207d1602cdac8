//! Recurring invoice generation
//!
//! Walks the billable subscriptions and issues at most one invoice per
//! subscription per due month. The existence check on (subscription, due
//! month) makes the phase safe to re-run on the same day; cancelled invoices
//! do not count, so a cancelled month can be billed again.

use chrono::NaiveDate;
use std::sync::Arc;

use core_kernel::YearMonth;

use crate::config::BillingConfig;
use crate::cycle::PhaseReport;
use crate::error::{BillingError, FailureKind, ItemFailure, Stage};
use crate::events::{BillingEvent, BillingEvents, TracingEvents};
use crate::invoice::{Invoice, InvoiceKind, InvoiceRequest, PaymentTerms};
use crate::ports::InvoiceStore;
use crate::service::InvoiceService;
use crate::subscription::BillableSubscription;
use crate::workers::run_bounded;

/// Issues the invoices due from subscription schedules
#[derive(Clone)]
pub struct Generator {
    store: Arc<dyn InvoiceStore>,
    service: InvoiceService,
    events: Arc<dyn BillingEvents>,
}

impl Generator {
    pub fn new(store: Arc<dyn InvoiceStore>, service: InvoiceService) -> Self {
        Self {
            store,
            service,
            events: Arc::new(TracingEvents),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn BillingEvents>) -> Self {
        self.events = events;
        self
    }

    /// Generates the invoices due on `today`
    ///
    /// Fails only when the candidate subscriptions cannot be listed; every
    /// per-subscription problem is reported in the returned `PhaseReport`.
    pub async fn generate(&self, today: NaiveDate, config: &BillingConfig) -> Result<PhaseReport, BillingError> {
        let candidates = self
            .store
            .billable_subscriptions(today)
            .await
            .map_err(BillingError::Persistence)?;

        let items = candidates
            .into_iter()
            .map(|candidate| (candidate.subscription.id.to_string(), candidate))
            .collect();

        let store = Arc::clone(&self.store);
        let service = self.service.clone();
        let terms = config.default_terms();
        let results = run_bounded(items, config.worker_concurrency, move |candidate| {
            let store = Arc::clone(&store);
            let service = service.clone();
            async move { generate_one(store.as_ref(), &service, &candidate, today, terms).await }
        })
        .await;

        let mut report = PhaseReport::default();
        for (item, result) in results {
            match result {
                Ok(Ok(Some(_))) => report.processed += 1,
                Ok(Ok(None)) => report.skipped += 1,
                Ok(Err(e)) => self.fail(&mut report, ItemFailure::from_error(item, Stage::Generation, &e)),
                Err(aborted) => self.fail(
                    &mut report,
                    ItemFailure::new(item, Stage::Generation, FailureKind::Internal, aborted),
                ),
            }
        }
        Ok(report)
    }

    fn fail(&self, report: &mut PhaseReport, failure: ItemFailure) {
        self.events.emit(BillingEvent::ItemFailed(failure.clone()));
        report.errors.push(failure);
    }
}

/// Issues the subscription's invoice for this cycle, if one is due and missing
async fn generate_one(
    store: &dyn InvoiceStore,
    service: &InvoiceService,
    candidate: &BillableSubscription,
    today: NaiveDate,
    terms: PaymentTerms,
) -> Result<Option<Invoice>, BillingError> {
    candidate.validate()?;
    let subscription = &candidate.subscription;

    let last_due = store
        .last_due_date(subscription.id)
        .await
        .map_err(BillingError::Persistence)?;
    let Some(due_date) = candidate.scheduled_due_date(last_due, today)? else {
        return Ok(None);
    };

    let exists = store
        .invoice_exists_for_month(subscription.id, YearMonth::of(due_date))
        .await
        .map_err(BillingError::Persistence)?;
    if exists {
        return Ok(None);
    }

    let request = InvoiceRequest {
        customer: candidate.customer.clone(),
        subscription_id: Some(subscription.id),
        plan_id: Some(candidate.plan.id),
        kind: InvoiceKind::Recurring,
        amount: candidate.amount(),
        description: candidate.description_for(due_date),
        due_date,
        terms,
    };
    service.issue(&request, today).await.map(Some)
}
